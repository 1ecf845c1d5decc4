//! Velbus wire protocol.
//!
//! This module defines the binary frame shared by every Velbus packet, the outbound packet
//! kinds the bridge knows how to build, and the registry that turns received packets into
//! typed events.
//!
//! # Frame Format
//!
//! Every packet on the bus is framed as:
//!
//! ```text
//! STX(0x0F) | PRIO | ADDR | RTR/LEN | DATA(0..8) | CHK | ETX(0x04)
//! ```
//!
//! - `PRIO` is `0xF8` for high priority and `0xFB` for low priority traffic.
//! - `RTR/LEN` carries the data length in its low nibble and the remote transmit request
//!   flag in bit `0x40`. RTR frames carry no data.
//! - The first data byte is the command, the remaining bytes are its payload.
//! - `CHK` is the two's complement of the 8-bit sum of every preceding byte.
//!
//! # Key Components
//!
//! - [`Packet`]: An immutable decoded packet, with [`Packet::encode`] and [`Packet::decode`].
//! - [`PacketBuffer`]: Reassembles a noisy byte stream into frames.
//! - [`commands`]: Per-kind builders (set clock, status request, ...).
//! - [`PacketTypeRegistry`]: Maps command bytes to decoders producing an [`Event`].
//!
//! # See Also
//!
//! - [`bridge`](crate::bridge): Session that moves these frames over a link.
pub mod commands;
mod packet;
mod reassembly;
mod registry;

pub use packet::{Packet, Priority, checksum};
pub use reassembly::{Frame, PacketBuffer};
pub use registry::{Decoder, Event, PacketTypeRegistry};

/// Start of a frame.
pub const STX: u8 = 0x0F;
/// End of a frame.
pub const ETX: u8 = 0x04;
/// Wire value of [`Priority::High`].
pub const PRIO_HIGH: u8 = 0xF8;
/// Wire value of [`Priority::Low`] and [`Priority::FireAndForget`].
pub const PRIO_LOW: u8 = 0xFB;
/// Remote transmit request flag in the length byte.
pub const RTR: u8 = 0x40;
/// Mask of the data length in the length byte.
pub const LENGTH_MASK: u8 = 0x0F;
/// Maximum number of data bytes (command included).
pub const MAX_DATA_LENGTH: usize = 8;
/// STX, priority, address, length, checksum and ETX.
pub const FRAME_OVERHEAD: usize = 6;
/// Size of the largest possible frame.
pub const MAX_FRAME_LENGTH: usize = FRAME_OVERHEAD + MAX_DATA_LENGTH;

/// Address every module listens to.
pub const BROADCAST_ADDRESS: u8 = 0x00;

pub mod command {
    //! Command bytes, the first data byte of a non-RTR frame.
    pub const PUSH_BUTTON_STATUS: u8 = 0x00;
    pub const SWITCH_RELAY_OFF: u8 = 0x01;
    pub const SWITCH_RELAY_ON: u8 = 0x02;
    pub const LIGHT_VALUE_REQUEST: u8 = 0xAA;
    pub const SET_DAYLIGHT_SAVING: u8 = 0xAF;
    pub const SET_REALTIME_DATE: u8 = 0xB7;
    pub const COUNTER_STATUS_REQUEST: u8 = 0xBD;
    pub const COUNTER_STATUS: u8 = 0xBE;
    pub const SET_REALTIME_CLOCK: u8 = 0xD8;
    pub const SENSOR_TEMPERATURE_REQUEST: u8 = 0xE5;
    pub const SENSOR_TEMPERATURE: u8 = 0xE6;
    pub const BLIND_STATUS: u8 = 0xEC;
    pub const MODULE_STATUS: u8 = 0xED;
    pub const DIMMER_STATUS: u8 = 0xEE;
    pub const MODULE_NAME_REQUEST: u8 = 0xEF;
    pub const MODULE_NAME_PART1: u8 = 0xF0;
    pub const MODULE_NAME_PART2: u8 = 0xF1;
    pub const MODULE_NAME_PART3: u8 = 0xF2;
    pub const STATUS_REQUEST: u8 = 0xFA;
    pub const RELAY_STATUS: u8 = 0xFB;
    pub const READ_MEMORY: u8 = 0xFD;
    pub const MEMORY_DATA: u8 = 0xFE;
    pub const MODULE_TYPE: u8 = 0xFF;
}

pub mod module_type {
    //! Module family identifiers reported in module type packets.
    pub const VMB4RYLD: u8 = 0x10;
    pub const VMB4RYNO: u8 = 0x11;
    pub const VMBDME: u8 = 0x14;
    pub const VMB7IN: u8 = 0x22;
    pub const VMBPIRO: u8 = 0x2C;
}

pub mod error {
    use thiserror::Error;

    /// Reasons a byte sequence is not a valid frame or packet.
    #[derive(Debug, Error, Clone, PartialEq, Eq)]
    pub enum MalformedPacketError {
        #[error("short buffer: frame needs {needed} bytes, {available} available")]
        ShortBuffer { needed: usize, available: usize },

        #[error("bad framing: expected STX at offset 0, found {0:#04x}")]
        BadStx(u8),

        #[error("bad framing: unknown priority byte {0:#04x}")]
        BadPriority(u8),

        #[error("bad framing: invalid length byte {0:#04x}")]
        BadLength(u8),

        #[error("bad checksum: expected {expected:#04x}, found {found:#04x}")]
        BadChecksum { expected: u8, found: u8 },

        #[error("bad framing: expected ETX, found {0:#04x}")]
        BadEtx(u8),

        #[error("bad framing: {0} trailing bytes after ETX")]
        TrailingBytes(usize),

        #[error("unexpected command {found:#04x}, expected {expected:#04x}")]
        UnexpectedCommand { expected: u8, found: u8 },

        #[error("command {command:#04x} payload too short: need {needed} bytes, found {found}")]
        ShortPayload {
            command: u8,
            needed: usize,
            found: usize,
        },

        #[error("command {command:#04x} has invalid {field} value {value:#04x}")]
        InvalidField {
            command: u8,
            field: &'static str,
            value: u8,
        },
    }

    impl MalformedPacketError {
        /// Whether more bytes could still turn the buffer into a valid frame.
        pub fn is_incomplete(&self) -> bool {
            matches!(self, MalformedPacketError::ShortBuffer { .. })
        }
    }

    /// Caller supplied values a packet cannot carry; nothing is encoded.
    #[derive(Debug, Error, Clone, PartialEq, Eq)]
    pub enum EncodeError {
        #[error("payload of {0} bytes does not fit in a frame")]
        PayloadTooLong(usize),

        #[error("{0} is not a valid weekday, expected 1 (Monday) to 7 (Sunday)")]
        InvalidWeekday(u32),

        #[error("invalid time {hour:02}:{minute:02}")]
        InvalidTime { hour: u32, minute: u32 },

        #[error("invalid date {year:04}-{month:02}-{day:02}")]
        InvalidDate { year: i32, month: u32, day: u32 },

        #[error("channel mask must select at least one channel")]
        EmptyChannelMask,
    }
}
