use log::{debug, trace};

use super::{Packet, STX, error::MalformedPacketError};

/// A validated frame pulled from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub packet: Packet,
}

/// Reassembles the raw byte stream of a link into frames.
///
/// Bytes that cannot start a valid frame are discarded up to the next STX candidate, so
/// line noise never stalls the stream.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buffer: Vec<u8>,
    discarded: usize,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Total number of bytes dropped while resynchronising.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Extracts the next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            self.skip_to_stx();
            if self.buffer.is_empty() {
                return None;
            }

            match Packet::decode_prefix(&self.buffer) {
                Ok((packet, length)) => {
                    let bytes: Vec<u8> = self.buffer.drain(..length).collect();
                    trace!("frame received: {bytes:02x?}");
                    return Some(Frame { bytes, packet });
                }
                Err(MalformedPacketError::ShortBuffer { .. }) => {
                    return self.frame_behind_header();
                }
                Err(e) => {
                    debug!("resynchronising after malformed frame: {e}");
                    self.drop_front(1);
                }
            }
        }
    }

    /// A header at the front announces more bytes than are buffered. If a complete frame
    /// already follows a later STX the header was noise, so everything before that frame
    /// is dropped. Otherwise the header may be genuine and the buffer waits for more bytes.
    fn frame_behind_header(&mut self) -> Option<Frame> {
        let (offset, packet, length) = self
            .buffer
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, byte)| **byte == STX)
            .find_map(|(offset, _)| {
                Packet::decode_prefix(&self.buffer[offset..])
                    .ok()
                    .map(|(packet, length)| (offset, packet, length))
            })?;

        debug!("dropping {offset} bytes of an unterminated header");
        self.drop_front(offset);
        let bytes: Vec<u8> = self.buffer.drain(..length).collect();
        trace!("frame received: {bytes:02x?}");
        Some(Frame { bytes, packet })
    }

    fn skip_to_stx(&mut self) {
        let skip = self
            .buffer
            .iter()
            .position(|byte| *byte == STX)
            .unwrap_or(self.buffer.len());
        if skip > 0 {
            trace!("skipping {skip} bytes of noise");
            self.drop_front(skip);
        }
    }

    fn drop_front(&mut self, count: usize) {
        self.buffer.drain(..count);
        self.discarded += count;
    }
}

impl Iterator for PacketBuffer {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::Priority;

    use super::*;

    fn relay_status(address: u8) -> Packet {
        Packet::new(
            address,
            Priority::Low,
            0xFB,
            &[0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
        )
        .unwrap()
    }

    #[test]
    fn resynchronises_around_garbage() {
        let first = relay_status(0x10);
        let second = Packet::remote_request(0x20, Priority::High);

        let mut stream = vec![0x00, 0x42, 0x0F, 0x13, 0xFF];
        stream.extend(first.encode());
        stream.extend([0x04, 0x0F, 0xFB, 0x0F]);
        stream.extend(second.encode());

        let mut buffer = PacketBuffer::new();
        buffer.extend(&stream);

        let packets: Vec<Packet> = buffer.by_ref().map(|frame| frame.packet).collect();
        assert_eq!(packets, vec![first, second]);
        assert!(buffer.discarded() > 0);
    }

    #[test]
    fn waits_for_split_frame() {
        let packet = relay_status(0x31);
        let bytes = packet.encode();
        let (head, tail) = bytes.split_at(5);

        let mut buffer = PacketBuffer::new();
        buffer.extend(head);
        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.pending(), head.len());

        buffer.extend(tail);
        let frame = buffer.next_frame().unwrap();
        assert_eq!(frame.packet, packet);
        assert_eq!(frame.bytes, bytes);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn false_stx_inside_noise_is_skipped() {
        let packet = relay_status(0x02);

        // An STX followed by a plausible header that fails its checksum.
        let mut stream = vec![0x0F, 0xF8, 0x01, 0x01, 0x00, 0x00, 0x04];
        stream.extend(packet.encode());

        let mut buffer = PacketBuffer::new();
        buffer.extend(&stream);

        assert_eq!(buffer.next_frame().map(|f| f.packet), Some(packet));
        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.discarded(), 7);
    }

    #[test]
    fn unterminated_header_does_not_hold_back_buffered_frame() {
        let first = Packet::new(0x10, Priority::Low, 0xAA, &[]).unwrap();
        let second = Packet::new(0x20, Priority::Low, 0xAA, &[]).unwrap();

        // The second garbage run looks like the header of an eight byte frame.
        let mut stream = vec![0x13];
        stream.extend(first.encode());
        stream.extend([0x0F, 0xFB, 0x00, 0x08]);
        stream.extend(second.encode());

        let mut buffer = PacketBuffer::new();
        buffer.extend(&stream);

        let packets: Vec<Packet> = buffer.by_ref().map(|frame| frame.packet).collect();
        assert_eq!(packets, vec![first, second]);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.discarded(), 5);
    }

    #[test]
    fn unterminated_header_alone_waits() {
        let mut buffer = PacketBuffer::new();
        buffer.extend(&[0x0F, 0xFB, 0x00, 0x08, 0x0F, 0xFB]);

        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.pending(), 6);
    }

    #[test]
    fn noise_only_is_dropped() {
        let mut buffer = PacketBuffer::new();
        buffer.extend(&[0x01, 0x02, 0x03]);

        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.discarded(), 3);
    }
}
