use std::collections::HashMap;

use log::debug;

use super::{Packet, command, error::MalformedPacketError, module_type};

/// Semantic meaning of a received packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Channel bitmasks of buttons that were just pressed, released or held.
    PushButtonStatus {
        pressed: u8,
        released: u8,
        long_pressed: u8,
    },
    RelayStatus {
        channel: u8,
        on: bool,
    },
    DimmerStatus {
        channel: u8,
        value: u8,
    },
    BlindStatus {
        channel: u8,
        status: u8,
        position: Option<u8>,
    },
    /// Temperatures in degrees Celsius.
    SensorTemperature {
        current: f64,
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    ModuleStatus {
        data: Vec<u8>,
    },
    LightValue {
        value: u16,
    },
    CounterStatus {
        channel: u8,
        counter: u32,
        period_ms: u16,
    },
    ModuleType {
        module_type: u8,
        details: Vec<u8>,
    },
    ModuleNamePart {
        part: u8,
        channel: u8,
        text: Vec<u8>,
    },
    MemoryData {
        memory_address: u16,
        data: Vec<u8>,
    },
    /// A remote transmit request seen on the bus.
    ModuleTypeRequest,
    /// No decoder claimed the packet, or its decoder rejected it.
    Raw,
}

/// Turns a packet carrying a known command into an [`Event`].
pub type Decoder = fn(&Packet) -> Result<Event, MalformedPacketError>;

/// Maps command bytes (optionally per module family) to decoders.
#[derive(Debug, Clone, Default)]
pub struct PacketTypeRegistry {
    generic: HashMap<u8, Decoder>,
    family: HashMap<(u8, u8), Decoder>,
}

impl PacketTypeRegistry {
    /// Creates an empty registry; every packet resolves to [`Event::Raw`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with decoders for every status report the bridge understands.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(command::PUSH_BUTTON_STATUS, decode_push_button_status);
        registry.register(command::RELAY_STATUS, decode_relay_status);
        registry.register(command::DIMMER_STATUS, decode_dimmer_status);
        registry.register(command::BLIND_STATUS, decode_blind_status);
        registry.register(command::SENSOR_TEMPERATURE, decode_sensor_temperature);
        registry.register(command::MODULE_STATUS, decode_module_status);
        registry.register(command::COUNTER_STATUS, decode_counter_status);
        registry.register(command::MODULE_TYPE, decode_module_type);
        registry.register(command::MODULE_NAME_PART1, decode_module_name_part);
        registry.register(command::MODULE_NAME_PART2, decode_module_name_part);
        registry.register(command::MODULE_NAME_PART3, decode_module_name_part);
        registry.register(command::MEMORY_DATA, decode_memory_data);

        registry.register_for_family(
            module_type::VMBPIRO,
            command::MODULE_STATUS,
            decode_light_value,
        );
        registry
    }

    /// Registers the decoder of a command, returning the one it replaces.
    pub fn register(&mut self, command: u8, decoder: Decoder) -> Option<Decoder> {
        self.generic.insert(command, decoder)
    }

    /// Registers a decoder used only for modules of the given family.
    pub fn register_for_family(
        &mut self,
        family: u8,
        command: u8,
        decoder: Decoder,
    ) -> Option<Decoder> {
        self.family.insert((family, command), decoder)
    }

    /// Finds the decoder of a command, preferring a family specific one.
    pub fn lookup(&self, command: u8, family: Option<u8>) -> Option<Decoder> {
        family
            .and_then(|family| self.family.get(&(family, command)))
            .or_else(|| self.generic.get(&command))
            .copied()
    }

    /// Resolves the event of a packet. Unknown commands and packets their decoder rejects
    /// become [`Event::Raw`].
    pub fn resolve(&self, packet: &Packet, family: Option<u8>) -> Event {
        if packet.is_rtr() {
            return Event::ModuleTypeRequest;
        }

        let Some(decoder) = self.lookup(packet.command(), family) else {
            return Event::Raw;
        };

        match decoder(packet) {
            Ok(event) => event,
            Err(e) => {
                debug!(
                    "passing packet from {:#04x} through undecoded: {e}",
                    packet.address()
                );
                Event::Raw
            }
        }
    }
}

fn payload(packet: &Packet, needed: usize) -> Result<&[u8], MalformedPacketError> {
    let payload = packet.payload();
    if payload.len() < needed {
        return Err(MalformedPacketError::ShortPayload {
            command: packet.command(),
            needed,
            found: payload.len(),
        });
    }
    Ok(payload)
}

/// Temperatures are 11-bit signed values in 1/16 °C, left aligned in two bytes.
fn temperature(high: u8, low: u8) -> f64 {
    (i16::from_be_bytes([high, low]) >> 5) as f64 * 0.0625
}

fn decode_push_button_status(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 3)?;
    Ok(Event::PushButtonStatus {
        pressed: data[0],
        released: data[1],
        long_pressed: data[2],
    })
}

fn decode_relay_status(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 3)?;
    Ok(Event::RelayStatus {
        channel: data[0],
        on: data[2] & 0x01 != 0,
    })
}

fn decode_dimmer_status(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 3)?;
    Ok(Event::DimmerStatus {
        channel: data[0],
        value: data[2],
    })
}

fn decode_blind_status(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 3)?;
    Ok(Event::BlindStatus {
        channel: data[0],
        status: data[2],
        position: data.get(4).copied(),
    })
}

fn decode_sensor_temperature(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 2)?;
    let pair = |index: usize| {
        data.get(index..index + 2)
            .map(|bytes| temperature(bytes[0], bytes[1]))
    };

    Ok(Event::SensorTemperature {
        current: temperature(data[0], data[1]),
        minimum: pair(2),
        maximum: pair(4),
    })
}

fn decode_module_status(packet: &Packet) -> Result<Event, MalformedPacketError> {
    Ok(Event::ModuleStatus {
        data: packet.payload().to_vec(),
    })
}

fn decode_light_value(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 2)?;
    Ok(Event::LightValue {
        value: u16::from_be_bytes([data[0], data[1]]),
    })
}

fn decode_counter_status(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 7)?;
    Ok(Event::CounterStatus {
        channel: data[0] & 0x03,
        counter: u32::from_be_bytes([data[1], data[2], data[3], data[4]]),
        period_ms: u16::from_be_bytes([data[5], data[6]]),
    })
}

fn decode_module_type(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 1)?;
    Ok(Event::ModuleType {
        module_type: data[0],
        details: data[1..].to_vec(),
    })
}

fn decode_module_name_part(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 1)?;
    let text = data[1..]
        .iter()
        .copied()
        .take_while(|byte| *byte != 0xFF)
        .collect();

    Ok(Event::ModuleNamePart {
        part: packet
            .command()
            .wrapping_sub(command::MODULE_NAME_PART1)
            .wrapping_add(1),
        channel: data[0],
        text,
    })
}

fn decode_memory_data(packet: &Packet) -> Result<Event, MalformedPacketError> {
    let data = payload(packet, 2)?;
    Ok(Event::MemoryData {
        memory_address: u16::from_be_bytes([data[0], data[1]]),
        data: data[2..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use crate::protocol::Priority;

    use super::*;

    fn packet(command: u8, payload: &[u8]) -> Packet {
        Packet::new(0x2C, Priority::Low, command, payload).unwrap()
    }

    #[test]
    fn unknown_command_is_raw() {
        let registry = PacketTypeRegistry::with_defaults();

        assert!(registry.lookup(0x42, None).is_none());
        assert_eq!(registry.resolve(&packet(0x42, &[0x01]), None), Event::Raw);
    }

    #[test]
    fn empty_registry_passes_everything_through() {
        let registry = PacketTypeRegistry::new();

        assert_eq!(
            registry.resolve(&packet(command::RELAY_STATUS, &[0x01, 0x00, 0x01]), None),
            Event::Raw
        );
    }

    #[test]
    fn short_payload_degrades_to_raw() {
        let registry = PacketTypeRegistry::with_defaults();

        assert_eq!(
            registry.resolve(&packet(command::COUNTER_STATUS, &[0x01, 0x02]), None),
            Event::Raw
        );
    }

    #[test]
    fn relay_status() {
        let registry = PacketTypeRegistry::with_defaults();
        let status = packet(
            command::RELAY_STATUS,
            &[0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
        );

        assert_eq!(
            registry.resolve(&status, None),
            Event::RelayStatus {
                channel: 0x04,
                on: true
            }
        );
    }

    #[test]
    fn sensor_temperature() {
        let registry = PacketTypeRegistry::with_defaults();
        // 21.5 °C = 344 sixteenths, -0.5 °C = -8 sixteenths.
        let current = (344i16 << 5).to_be_bytes();
        let minimum = (-8i16 << 5).to_be_bytes();
        let status = packet(
            command::SENSOR_TEMPERATURE,
            &[current[0], current[1], minimum[0], minimum[1]],
        );

        assert_eq!(
            registry.resolve(&status, None),
            Event::SensorTemperature {
                current: 21.5,
                minimum: Some(-0.5),
                maximum: None,
            }
        );
    }

    #[test]
    fn family_decoder_takes_precedence() {
        let registry = PacketTypeRegistry::with_defaults();
        let status = packet(command::MODULE_STATUS, &[0x01, 0x2C]);

        assert_eq!(
            registry.resolve(&status, Some(module_type::VMBPIRO)),
            Event::LightValue { value: 300 }
        );
        assert_eq!(
            registry.resolve(&status, Some(module_type::VMB4RYLD)),
            Event::ModuleStatus {
                data: vec![0x01, 0x2C]
            }
        );
        assert_eq!(
            registry.resolve(&status, None),
            Event::ModuleStatus {
                data: vec![0x01, 0x2C]
            }
        );
    }

    #[test]
    fn register_replaces_decoder() {
        fn always_raw(_: &Packet) -> Result<Event, MalformedPacketError> {
            Ok(Event::Raw)
        }

        let mut registry = PacketTypeRegistry::with_defaults();
        assert!(registry.register(command::RELAY_STATUS, always_raw).is_some());
        assert!(registry.register(0x99, always_raw).is_none());
        assert!(registry.lookup(0x99, None).is_some());
    }

    #[test]
    fn counter_status() {
        let registry = PacketTypeRegistry::with_defaults();
        let status = packet(
            command::COUNTER_STATUS,
            &[0x06, 0x00, 0x01, 0x00, 0x00, 0x03, 0xE8],
        );

        assert_eq!(
            registry.resolve(&status, None),
            Event::CounterStatus {
                channel: 0x02,
                counter: 65536,
                period_ms: 1000,
            }
        );
    }

    #[test]
    fn module_name_part() {
        let registry = PacketTypeRegistry::with_defaults();
        let name = packet(command::MODULE_NAME_PART2, &[0x01, b'H', b'a', b'l', 0xFF]);

        assert_eq!(
            registry.resolve(&name, None),
            Event::ModuleNamePart {
                part: 2,
                channel: 0x01,
                text: b"Hal".to_vec(),
            }
        );
    }

    #[test]
    fn remote_request_resolves() {
        let registry = PacketTypeRegistry::with_defaults();

        assert_eq!(
            registry.resolve(&Packet::remote_request(0x10, Priority::High), None),
            Event::ModuleTypeRequest
        );
    }
}
