use std::{collections::VecDeque, time::Instant};

use crate::protocol::{Packet, Priority};

/// A packet waiting for the link.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub packet: Packet,
    pub enqueued_at: Instant,
    sequence: u64,
}

/// Outbound packets ordered by priority, first in first out within a priority.
///
/// The queue holds at most `max_depth` packets; pushing onto a full queue drops the oldest
/// pending packet regardless of its priority.
#[derive(Debug)]
pub struct OutboundQueue {
    lanes: [VecDeque<PendingSend>; 3],
    max_depth: usize,
    next_sequence: u64,
}

fn lane(priority: Priority) -> usize {
    match priority {
        Priority::High => 0,
        Priority::Low => 1,
        Priority::FireAndForget => 2,
    }
}

impl OutboundQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            lanes: Default::default(),
            max_depth: max_depth.max(1),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    /// Queues a packet, returning the entry dropped to make room for it.
    pub fn push(&mut self, packet: Packet) -> Option<PendingSend> {
        let dropped = if self.len() >= self.max_depth {
            self.pop_oldest()
        } else {
            None
        };

        let pending = PendingSend {
            enqueued_at: Instant::now(),
            sequence: self.next_sequence,
            packet,
        };
        self.next_sequence += 1;
        self.lanes[lane(pending.packet.priority())].push_back(pending);
        dropped
    }

    /// Takes the next packet to transmit.
    pub fn pop(&mut self) -> Option<PendingSend> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Drops pending fire-and-forget packets, returning how many were dropped.
    pub fn discard_fire_and_forget(&mut self) -> usize {
        let fire_and_forget = &mut self.lanes[lane(Priority::FireAndForget)];
        let count = fire_and_forget.len();
        fire_and_forget.clear();
        count
    }

    /// Drops every pending packet, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.lanes.iter_mut().for_each(VecDeque::clear);
        count
    }

    fn pop_oldest(&mut self) -> Option<PendingSend> {
        let oldest = self
            .lanes
            .iter()
            .enumerate()
            .filter_map(|(index, lane)| lane.front().map(|pending| (pending.sequence, index)))
            .min()?
            .1;
        self.lanes[oldest].pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(address: u8, priority: Priority) -> Packet {
        Packet::new(address, priority, 0xFA, &[0xFF]).unwrap()
    }

    fn drain(queue: &mut OutboundQueue) -> Vec<u8> {
        std::iter::from_fn(|| queue.pop())
            .map(|pending| pending.packet.address())
            .collect()
    }

    #[test]
    fn high_priority_first_then_fifo() {
        let mut queue = OutboundQueue::new(16);
        queue.push(packet(1, Priority::Low));
        queue.push(packet(2, Priority::High));
        queue.push(packet(3, Priority::Low));
        queue.push(packet(4, Priority::FireAndForget));
        queue.push(packet(5, Priority::High));

        assert_eq!(queue.len(), 5);
        assert_eq!(drain(&mut queue), vec![2, 5, 1, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut queue = OutboundQueue::new(3);
        queue.push(packet(1, Priority::Low));
        queue.push(packet(2, Priority::High));
        queue.push(packet(3, Priority::Low));

        let dropped = queue.push(packet(4, Priority::High)).unwrap();
        assert_eq!(dropped.packet.address(), 1);
        assert_eq!(queue.len(), 3);
        assert_eq!(drain(&mut queue), vec![2, 4, 3]);
    }

    #[test]
    fn link_loss_keeps_acknowledged_traffic() {
        let mut queue = OutboundQueue::new(8);
        queue.push(packet(1, Priority::FireAndForget));
        queue.push(packet(2, Priority::Low));
        queue.push(packet(3, Priority::FireAndForget));

        assert_eq!(queue.discard_fire_and_forget(), 2);
        assert_eq!(drain(&mut queue), vec![2]);
    }

    #[test]
    fn clear_counts_cancelled() {
        let mut queue = OutboundQueue::new(0);
        queue.push(packet(1, Priority::Low));
        queue.push(packet(2, Priority::Low));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }
}
