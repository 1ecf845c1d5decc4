use super::{
    ETX, FRAME_OVERHEAD, LENGTH_MASK, MAX_DATA_LENGTH, PRIO_HIGH, PRIO_LOW, RTR, STX,
    error::{EncodeError, MalformedPacketError},
};

/// Scheduling class of a packet.
///
/// Ordering follows transmission order: `High < Low < FireAndForget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    High,
    Low,
    /// Sent with the low priority byte, never requeued after a link loss.
    FireAndForget,
}

impl Priority {
    pub fn wire_byte(self) -> u8 {
        match self {
            Priority::High => PRIO_HIGH,
            Priority::Low | Priority::FireAndForget => PRIO_LOW,
        }
    }

    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            PRIO_HIGH => Some(Priority::High),
            PRIO_LOW => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A single Velbus packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    address: u8,
    priority: Priority,
    rtr: bool,
    command: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Creates a data packet. The command and payload together may not exceed
    /// [`MAX_DATA_LENGTH`] bytes.
    pub fn new(
        address: u8,
        priority: Priority,
        command: u8,
        payload: &[u8],
    ) -> Result<Self, EncodeError> {
        if payload.len() + 1 > MAX_DATA_LENGTH {
            return Err(EncodeError::PayloadTooLong(payload.len()));
        }

        Ok(Self {
            address,
            priority,
            rtr: false,
            command,
            payload: payload.to_vec(),
        })
    }

    /// Creates a remote transmit request, which asks a module to report its type.
    pub fn remote_request(address: u8, priority: Priority) -> Self {
        Self {
            address,
            priority,
            rtr: true,
            command: 0,
            payload: Vec::new(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_rtr(&self) -> bool {
        self.rtr
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Number of data bytes on the wire, command included.
    pub fn data_length(&self) -> usize {
        if self.rtr { 0 } else { self.payload.len() + 1 }
    }

    pub fn frame_length(&self) -> usize {
        FRAME_OVERHEAD + self.data_length()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.frame_length());
        let length = self.data_length() as u8;

        bytes.push(STX);
        bytes.push(self.priority.wire_byte());
        bytes.push(self.address);
        if self.rtr {
            bytes.push(RTR | length);
        } else {
            bytes.push(length);
            bytes.push(self.command);
            bytes.extend_from_slice(&self.payload);
        }
        bytes.push(checksum(&bytes));
        bytes.push(ETX);
        bytes
    }

    /// Decodes exactly one frame; any byte after the ETX is an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedPacketError> {
        let (packet, consumed) = Self::decode_prefix(bytes)?;
        if consumed != bytes.len() {
            return Err(MalformedPacketError::TrailingBytes(bytes.len() - consumed));
        }
        Ok(packet)
    }

    /// Decodes the frame at the start of `bytes`, returning the packet and the number of
    /// bytes it occupied.
    pub fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), MalformedPacketError> {
        let frame_length = frame_length(bytes)?;
        let priority =
            Priority::from_wire(bytes[1]).ok_or(MalformedPacketError::BadPriority(bytes[1]))?;
        let address = bytes[2];
        let rtr = bytes[3] & RTR != 0;
        let data = &bytes[4..frame_length - 2];

        let expected = checksum(&bytes[..frame_length - 2]);
        let found = bytes[frame_length - 2];
        if expected != found {
            return Err(MalformedPacketError::BadChecksum { expected, found });
        }

        let etx = bytes[frame_length - 1];
        if etx != ETX {
            return Err(MalformedPacketError::BadEtx(etx));
        }

        let packet = if rtr {
            Self::remote_request(address, priority)
        } else {
            Self {
                address,
                priority,
                rtr: false,
                command: data[0],
                payload: data[1..].to_vec(),
            }
        };

        Ok((packet, frame_length))
    }
}

/// Two's complement of the 8-bit sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}

/// Validates the fixed header and returns the full length of the frame it announces.
fn frame_length(bytes: &[u8]) -> Result<usize, MalformedPacketError> {
    match bytes.first() {
        None => {
            return Err(MalformedPacketError::ShortBuffer {
                needed: FRAME_OVERHEAD,
                available: 0,
            });
        }
        Some(&STX) => {}
        Some(&other) => return Err(MalformedPacketError::BadStx(other)),
    }

    if bytes.len() < 4 {
        return Err(MalformedPacketError::ShortBuffer {
            needed: FRAME_OVERHEAD,
            available: bytes.len(),
        });
    }

    if Priority::from_wire(bytes[1]).is_none() {
        return Err(MalformedPacketError::BadPriority(bytes[1]));
    }

    let length_byte = bytes[3];
    let length = (length_byte & LENGTH_MASK) as usize;
    let rtr = length_byte & RTR != 0;
    let reserved = length_byte & !(RTR | LENGTH_MASK) != 0;
    if reserved || length > MAX_DATA_LENGTH || (rtr && length != 0) || (!rtr && length == 0) {
        return Err(MalformedPacketError::BadLength(length_byte));
    }

    let needed = FRAME_OVERHEAD + length;
    if bytes.len() < needed {
        return Err(MalformedPacketError::ShortBuffer {
            needed,
            available: bytes.len(),
        });
    }

    Ok(needed)
}
