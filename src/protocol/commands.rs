//! Outbound packet kinds.
//!
//! Each kind validates its fields when constructed, so a value that exists can always be
//! turned into a [`Packet`]. Invalid caller input is rejected with an [`EncodeError`] before
//! any bytes are produced.
//!
//! # Example
//! ```rust
//! use chrono::Weekday;
//! use velbus::protocol::commands::{PacketKind, SetRealtimeClock};
//!
//! let clock = SetRealtimeClock::new(0x00, Weekday::Wed, 14, 30).unwrap();
//! let packet = clock.to_packet();
//!
//! assert_eq!(packet.payload(), &[0x02, 14, 30]);
//! assert!(SetRealtimeClock::from_iso_weekday(0x00, 8, 14, 30).is_err());
//! ```
use chrono::{Datelike, NaiveDate, Timelike, Weekday};

use super::{
    Packet, Priority, command,
    error::{EncodeError, MalformedPacketError},
};

/// A packet kind that maps onto a [`Packet`] and back.
pub trait PacketKind: Sized {
    fn to_packet(&self) -> Packet;

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError>;
}

/// Velbus weekday code, Monday is `0x00` through Sunday `0x06`.
pub fn weekday_code(day: Weekday) -> u8 {
    match day {
        Weekday::Mon => 0x00,
        Weekday::Tue => 0x01,
        Weekday::Wed => 0x02,
        Weekday::Thu => 0x03,
        Weekday::Fri => 0x04,
        Weekday::Sat => 0x05,
        Weekday::Sun => 0x06,
    }
}

/// Maps an ISO weekday number (1 = Monday .. 7 = Sunday).
pub fn weekday_from_iso(day: u32) -> Result<Weekday, EncodeError> {
    match day {
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        7 => Ok(Weekday::Sun),
        other => Err(EncodeError::InvalidWeekday(other)),
    }
}

fn weekday_from_code(code: u8) -> Option<Weekday> {
    weekday_from_iso(code as u32 + 1).ok()
}

/// Checks the command byte and minimum payload size of a received packet.
fn expect<'a>(
    packet: &'a Packet,
    command: u8,
    needed: usize,
) -> Result<&'a [u8], MalformedPacketError> {
    if packet.is_rtr() || packet.command() != command {
        return Err(MalformedPacketError::UnexpectedCommand {
            expected: command,
            found: packet.command(),
        });
    }

    let payload = packet.payload();
    if payload.len() < needed {
        return Err(MalformedPacketError::ShortPayload {
            command,
            needed,
            found: payload.len(),
        });
    }
    Ok(payload)
}

/// Builds a packet whose payload is known to fit.
fn packet(address: u8, priority: Priority, command: u8, payload: &[u8]) -> Packet {
    match Packet::new(address, priority, command, payload) {
        Ok(packet) => packet,
        Err(e) => unreachable!("fixed size payload for {command:#04x} rejected: {e}"),
    }
}

/// Sets the time of day of a module (or every module, via the broadcast address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetRealtimeClock {
    address: u8,
    weekday: Weekday,
    hour: u8,
    minute: u8,
}

impl SetRealtimeClock {
    pub fn new(
        address: u8,
        weekday: Weekday,
        hour: u32,
        minute: u32,
    ) -> Result<Self, EncodeError> {
        if hour > 23 || minute > 59 {
            return Err(EncodeError::InvalidTime { hour, minute });
        }

        Ok(Self {
            address,
            weekday,
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn from_iso_weekday(
        address: u8,
        weekday: u32,
        hour: u32,
        minute: u32,
    ) -> Result<Self, EncodeError> {
        Self::new(address, weekday_from_iso(weekday)?, hour, minute)
    }

    pub fn at<T: Datelike + Timelike>(address: u8, time: &T) -> Self {
        Self {
            address,
            weekday: time.weekday(),
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }
}

impl PacketKind for SetRealtimeClock {
    fn to_packet(&self) -> Packet {
        packet(
            self.address,
            Priority::Low,
            command::SET_REALTIME_CLOCK,
            &[weekday_code(self.weekday), self.hour, self.minute],
        )
    }

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
        let payload = expect(packet, command::SET_REALTIME_CLOCK, 3)?;
        let invalid = |field: &'static str, value: u8| MalformedPacketError::InvalidField {
            command: command::SET_REALTIME_CLOCK,
            field,
            value,
        };

        let weekday = weekday_from_code(payload[0]).ok_or(invalid("weekday", payload[0]))?;
        Self::new(
            packet.address(),
            weekday,
            payload[1] as u32,
            payload[2] as u32,
        )
        .map_err(|_| invalid("time", payload[1]))
    }
}

/// Sets the calendar date of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetRealtimeDate {
    address: u8,
    day: u8,
    month: u8,
    year: u16,
}

impl SetRealtimeDate {
    pub fn new(address: u8, year: i32, month: u32, day: u32) -> Result<Self, EncodeError> {
        let valid = (0..=u16::MAX as i32).contains(&year)
            && NaiveDate::from_ymd_opt(year, month, day).is_some();
        if !valid {
            return Err(EncodeError::InvalidDate { year, month, day });
        }

        Ok(Self {
            address,
            day: day as u8,
            month: month as u8,
            year: year as u16,
        })
    }

    pub fn at<T: Datelike>(address: u8, date: &T) -> Self {
        Self {
            address,
            day: date.day() as u8,
            month: date.month() as u8,
            year: date.year().clamp(0, u16::MAX as i32) as u16,
        }
    }
}

impl PacketKind for SetRealtimeDate {
    fn to_packet(&self) -> Packet {
        let [high, low] = self.year.to_be_bytes();
        packet(
            self.address,
            Priority::Low,
            command::SET_REALTIME_DATE,
            &[self.day, self.month, high, low],
        )
    }

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
        let payload = expect(packet, command::SET_REALTIME_DATE, 4)?;
        let year = u16::from_be_bytes([payload[2], payload[3]]);

        Self::new(
            packet.address(),
            year as i32,
            payload[1] as u32,
            payload[0] as u32,
        )
        .map_err(|_| MalformedPacketError::InvalidField {
            command: command::SET_REALTIME_DATE,
            field: "date",
            value: payload[0],
        })
    }
}

/// Enables or disables daylight saving time on a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetDaylightSaving {
    pub address: u8,
    pub enabled: bool,
}

impl PacketKind for SetDaylightSaving {
    fn to_packet(&self) -> Packet {
        packet(
            self.address,
            Priority::Low,
            command::SET_DAYLIGHT_SAVING,
            &[self.enabled as u8],
        )
    }

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
        let payload = expect(packet, command::SET_DAYLIGHT_SAVING, 1)?;
        match payload[0] {
            0x00 | 0x01 => Ok(Self {
                address: packet.address(),
                enabled: payload[0] == 0x01,
            }),
            value => Err(MalformedPacketError::InvalidField {
                command: command::SET_DAYLIGHT_SAVING,
                field: "daylight saving",
                value,
            }),
        }
    }
}

/// Packet kinds made of a command byte and a channel bitmask.
macro_rules! channel_request {
    ($(#[$meta:meta])* $name:ident, $command:expr, $priority:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            address: u8,
            channels: u8,
        }

        impl $name {
            pub fn new(address: u8, channels: u8) -> Result<Self, EncodeError> {
                if channels == 0 {
                    return Err(EncodeError::EmptyChannelMask);
                }
                Ok(Self { address, channels })
            }

            pub fn channels(&self) -> u8 {
                self.channels
            }
        }

        impl PacketKind for $name {
            fn to_packet(&self) -> Packet {
                packet(self.address, $priority, $command, &[self.channels])
            }

            fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
                let payload = expect(packet, $command, 1)?;
                Self::new(packet.address(), payload[0]).map_err(|_| {
                    MalformedPacketError::InvalidField {
                        command: $command,
                        field: "channels",
                        value: payload[0],
                    }
                })
            }
        }
    };
}

channel_request!(
    /// Asks a module to report the status of the selected channels.
    StatusRequest,
    command::STATUS_REQUEST,
    Priority::Low
);

channel_request!(
    /// Asks a module for the name of the selected channels.
    ModuleNameRequest,
    command::MODULE_NAME_REQUEST,
    Priority::Low
);

channel_request!(
    /// Switches the selected relay channels on.
    SwitchRelayOn,
    command::SWITCH_RELAY_ON,
    Priority::High
);

channel_request!(
    /// Switches the selected relay channels off.
    SwitchRelayOff,
    command::SWITCH_RELAY_OFF,
    Priority::High
);

/// Asks a light sensing module (VMBPIRO) for its current light value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightValueRequest {
    pub address: u8,
}

impl PacketKind for LightValueRequest {
    fn to_packet(&self) -> Packet {
        packet(
            self.address,
            Priority::Low,
            command::LIGHT_VALUE_REQUEST,
            &[],
        )
    }

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
        expect(packet, command::LIGHT_VALUE_REQUEST, 0)?;
        Ok(Self {
            address: packet.address(),
        })
    }
}

/// Asks a module for its temperature, optionally enabling periodic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorTemperatureRequest {
    pub address: u8,
    /// Seconds between automatic reports, `0` disables them.
    pub auto_send_interval: u8,
}

impl PacketKind for SensorTemperatureRequest {
    fn to_packet(&self) -> Packet {
        packet(
            self.address,
            Priority::Low,
            command::SENSOR_TEMPERATURE_REQUEST,
            &[self.auto_send_interval],
        )
    }

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
        let payload = expect(packet, command::SENSOR_TEMPERATURE_REQUEST, 1)?;
        Ok(Self {
            address: packet.address(),
            auto_send_interval: payload[0],
        })
    }
}

/// Asks a counter module (VMB7IN) for the counter of the selected channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterStatusRequest {
    address: u8,
    channels: u8,
    auto_send_interval: u8,
}

impl CounterStatusRequest {
    pub fn new(address: u8, channels: u8, auto_send_interval: u8) -> Result<Self, EncodeError> {
        if channels == 0 {
            return Err(EncodeError::EmptyChannelMask);
        }
        Ok(Self {
            address,
            channels,
            auto_send_interval,
        })
    }
}

impl PacketKind for CounterStatusRequest {
    fn to_packet(&self) -> Packet {
        packet(
            self.address,
            Priority::Low,
            command::COUNTER_STATUS_REQUEST,
            &[self.channels, self.auto_send_interval],
        )
    }

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
        let payload = expect(packet, command::COUNTER_STATUS_REQUEST, 2)?;
        Self::new(packet.address(), payload[0], payload[1]).map_err(|_| {
            MalformedPacketError::InvalidField {
                command: command::COUNTER_STATUS_REQUEST,
                field: "channels",
                value: payload[0],
            }
        })
    }
}

/// Reads one byte of module memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMemory {
    pub address: u8,
    pub memory_address: u16,
}

impl PacketKind for ReadMemory {
    fn to_packet(&self) -> Packet {
        packet(
            self.address,
            Priority::Low,
            command::READ_MEMORY,
            &self.memory_address.to_be_bytes(),
        )
    }

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
        let payload = expect(packet, command::READ_MEMORY, 2)?;
        Ok(Self {
            address: packet.address(),
            memory_address: u16::from_be_bytes([payload[0], payload[1]]),
        })
    }
}

/// Asks the module at `address` to report its type. Sent as a remote transmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleTypeRequest {
    pub address: u8,
}

impl PacketKind for ModuleTypeRequest {
    fn to_packet(&self) -> Packet {
        Packet::remote_request(self.address, Priority::High)
    }

    fn from_packet(packet: &Packet) -> Result<Self, MalformedPacketError> {
        if !packet.is_rtr() {
            return Err(MalformedPacketError::UnexpectedCommand {
                expected: 0x00,
                found: packet.command(),
            });
        }
        Ok(Self {
            address: packet.address(),
        })
    }
}
