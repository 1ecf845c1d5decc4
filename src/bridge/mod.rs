//! Bridge session between device handlers and the bus.
//!
//! A [`BridgeSession`] owns one [`LinkTransport`](crate::link::LinkTransport) and a single
//! worker thread. The worker opens the link, writes queued packets one frame at a time,
//! reassembles incoming bytes into frames and dispatches them to registered
//! [`DeviceHandler`]s.
//!
//! # State Machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Closing -> Disconnected
//!                     |             |
//!                     +-------------+--> Disconnected (open failure / link loss, then
//!                                        reconnect after a backoff delay)
//! ```
//!
//! # Outbound Queue
//!
//! Packets are sent in `(priority, enqueue order)` order. Enqueueing never blocks: once
//! [`BridgeConfig::max_queue_depth`] packets are pending the oldest one is dropped. On link
//! loss the packet being written is dropped, pending fire-and-forget packets are discarded
//! and the remaining packets wait for the next connection.
//!
//! # Handlers
//!
//! Handlers register for one or more exact addresses (at most one handler per address) or
//! for every address. They are held weakly and called on the worker thread in registration
//! order; failures and panics are logged and never reach the worker.
use std::io;

use thiserror::Error;

use crate::protocol::error::{EncodeError, MalformedPacketError};

mod clock;
mod config;
mod handler;
mod queue;
mod session;

pub use clock::{clock_sync_packets, local_clock_sync_packets};
pub use config::{BridgeConfig, LinkConfig, ReconnectPolicy};
pub use handler::{
    DeviceHandler, Dispatch, HandlerDispatchError, HandlerError, HandlerId, HandlerTarget,
};
pub use queue::{OutboundQueue, PendingSend};
pub use session::{BridgeHandle, BridgeSession};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Link state as reported to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge session is already running")]
    AlreadyRunning,

    #[error("bridge transport was lost by a crashed worker")]
    TransportLost,

    #[error("failed to spawn bridge worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("address {0:#04x} already has a handler")]
    AddressTaken(u8),

    #[error("handler registration names no target")]
    NoTargets,

    #[error("cannot encode packet: {0}")]
    Encode(#[from] EncodeError),

    #[error("invalid raw packet: {0}")]
    Malformed(#[from] MalformedPacketError),
}
