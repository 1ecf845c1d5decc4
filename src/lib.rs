//! Velbus field-bus gateway.
//!
//! - [`protocol`]: Frame codec, outbound packet kinds and the decoder registry.
//! - [`link`]: Byte transports to the bus (serial interface or TCP bridge).
//! - [`bridge`]: Session that keeps a link up and routes packets to device handlers.
pub mod bridge;
pub mod link;
pub mod protocol;

pub use bridge::{BridgeConfig, BridgeHandle, BridgeSession, DeviceHandler, LinkConfig};
pub use link::LinkTransport;
pub use protocol::{Event, Packet, PacketTypeRegistry, Priority};
