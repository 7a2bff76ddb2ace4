//! Out-of-order reassembly for the 1..=127 index space.
//!
//! [`ReorderBuffer`] accepts packets in any order and releases them strictly
//! in index order.  Unlike a cumulative-ACK receiver it *does* buffer future
//! packets, so a single lost frame only costs one retry.
//!
//! # Layout
//!
//! ```text
//!  cursor (last delivered)
//!     │
//!     ▼   current[0]  current[1]  ...            next_wrap[0] ...
//!  ───┼──────┬───────────┬──────── ... ──┤127│   ┌────┬────┬───
//!     │ c+1  │    c+2    │               │   │   │ 1  │ 2  │
//! ```
//!
//! `current` only ever holds indices reachable from the cursor without
//! passing 127.  Once the sender has wrapped, packets for the next cycle
//! land in `next_wrap` until `current` drains, at which point the buffers
//! rotate and the cursor restarts at 0.
//!
//! This module only manages state; acknowledgements are the reader's job.

use crate::packet::{Packet, MAX_INDEX};

/// An offset this far below the cursor belongs to the next index cycle.
const WRAP_THRESHOLD: i16 = -100;

/// Two sparse slot arrays plus the index of the last delivered packet.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    /// Index of the most recently delivered packet (0 before the first).
    cursor: u8,
    current: Vec<Option<Packet>>,
    next_wrap: Vec<Option<Packet>>,
    /// `current` has already been padded out to index 127 this cycle.
    wrap_padded: bool,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the most recently delivered packet.
    pub fn cursor(&self) -> u8 {
        self.cursor
    }

    /// `true` when no packet is waiting for a gap to fill.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.next_wrap.is_empty()
    }

    /// Number of buffered (non-hole) packets.
    pub fn buffered(&self) -> usize {
        self.current
            .iter()
            .chain(self.next_wrap.iter())
            .filter(|slot| slot.is_some())
            .count()
    }

    /// File `packet` into its slot.
    ///
    /// Packets with index 0 (no data) and duplicates of already delivered
    /// indices are dropped.  A later copy of a buffered index replaces the
    /// earlier one.
    pub fn insert(&mut self, packet: Packet) {
        let index = packet.send_index;
        if index == 0 || index > MAX_INDEX {
            return;
        }
        let offset = i16::from(index) - i16::from(self.cursor) - 1;

        if offset < WRAP_THRESHOLD {
            if !self.wrap_padded {
                let to_end = usize::from(MAX_INDEX - self.cursor);
                if self.current.len() < to_end {
                    self.current.resize_with(to_end, || None);
                }
                self.wrap_padded = true;
            }
            log::trace!("index {index} wraps past cursor {}", self.cursor);
            place(&mut self.next_wrap, usize::from(index - 1), packet);
        } else if offset < 0 {
            log::trace!("dropping duplicate index {index} (cursor {})", self.cursor);
        } else {
            place(&mut self.current, offset as usize, packet);
        }
    }

    /// Release every packet that is now contiguous with the cursor.
    ///
    /// Returns an empty vector when the next expected index is still missing.
    pub fn drain(&mut self) -> Vec<Packet> {
        let mut released = Vec::new();
        loop {
            let run = self.current.iter().take_while(|slot| slot.is_some()).count();
            for packet in self.current.drain(..run).flatten() {
                self.cursor = packet.send_index;
                released.push(packet);
            }
            if !self.current.is_empty() || self.next_wrap.is_empty() {
                break;
            }
            log::trace!("rotating reorder buffers after index {}", self.cursor);
            self.current = std::mem::take(&mut self.next_wrap);
            self.cursor = 0;
            self.wrap_padded = false;
        }
        released
    }
}

/// Grow `slots` with holes up to `offset` and store `packet` there.
fn place(slots: &mut Vec<Option<Packet>>, offset: usize, packet: Packet) {
    if slots.len() <= offset {
        slots.resize_with(offset + 1, || None);
    }
    slots[offset] = Some(packet);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(index: u8) -> Packet {
        Packet::with_data(index, vec![index]).unwrap()
    }

    fn indices(packets: &[Packet]) -> Vec<u8> {
        packets.iter().map(|p| p.send_index).collect()
    }

    /// Index sequence 1..=127, 1..=127, ... as the sender assigns it.
    fn nth_index(n: usize) -> u8 {
        (n % 127) as u8 + 1
    }

    #[test]
    fn in_order_packets_release_immediately() {
        let mut r = ReorderBuffer::new();
        for i in 1..=5 {
            r.insert(pkt(i));
            assert_eq!(indices(&r.drain()), vec![i]);
        }
        assert_eq!(r.cursor(), 5);
        assert!(r.is_empty());
    }

    #[test]
    fn gap_holds_later_packets() {
        let mut r = ReorderBuffer::new();
        r.insert(pkt(2));
        r.insert(pkt(3));
        assert!(r.drain().is_empty());
        assert_eq!(r.buffered(), 2);

        r.insert(pkt(1));
        assert_eq!(indices(&r.drain()), vec![1, 2, 3]);
        assert!(r.is_empty());
    }

    #[test]
    fn index_zero_ignored() {
        let mut r = ReorderBuffer::new();
        r.insert(Packet::default());
        assert!(r.is_empty());
    }

    #[test]
    fn duplicate_of_delivered_index_dropped() {
        let mut r = ReorderBuffer::new();
        r.insert(pkt(1));
        r.insert(pkt(2));
        r.drain();
        r.insert(pkt(1));
        r.insert(pkt(2));
        assert!(r.drain().is_empty());
        assert!(r.is_empty());
    }

    #[test]
    fn duplicate_of_buffered_index_replaces_it() {
        let mut r = ReorderBuffer::new();
        r.insert(pkt(3));
        let mut dup = pkt(3);
        dup.payload = vec![0xff];
        r.insert(dup);
        r.insert(pkt(1));
        r.insert(pkt(2));
        let out = r.drain();
        assert_eq!(indices(&out), vec![1, 2, 3]);
        assert_eq!(out[2].payload, vec![0xff]);
    }

    #[test]
    fn far_ahead_packet_is_buffered() {
        let mut r = ReorderBuffer::new();
        r.insert(pkt(102));
        assert!(r.drain().is_empty());
        assert_eq!(r.buffered(), 1);

        let mut delivered = Vec::new();
        for i in 1..=101 {
            r.insert(pkt(i));
            delivered.extend(indices(&r.drain()));
        }
        let expected: Vec<u8> = (1..=102).collect();
        assert_eq!(delivered, expected);
        assert!(r.is_empty());
    }

    #[test]
    fn sequential_delivery_across_many_wraps() {
        let mut r = ReorderBuffer::new();
        let mut delivered = Vec::new();
        for n in 0..1000 {
            r.insert(pkt(nth_index(n)));
            delivered.extend(indices(&r.drain()));
        }
        let expected: Vec<u8> = (0..1000).map(nth_index).collect();
        assert_eq!(delivered, expected);
    }

    #[test]
    fn next_cycle_packet_waits_for_current_to_drain() {
        let mut r = ReorderBuffer::new();
        for i in 1..=124 {
            r.insert(pkt(i));
        }
        assert_eq!(r.drain().len(), 124);

        // 125 is lost; 126, 127, 1, 2 arrive.
        for i in [126, 127, 1, 2] {
            r.insert(pkt(i));
            assert!(r.drain().is_empty());
        }
        r.insert(pkt(125));
        assert_eq!(indices(&r.drain()), vec![125, 126, 127, 1, 2]);
        assert_eq!(r.cursor(), 2);
        assert!(r.is_empty());
    }

    #[test]
    fn wrap_before_end_of_cycle_pads_holes() {
        let mut r = ReorderBuffer::new();
        for i in 1..=123 {
            r.insert(pkt(i));
        }
        r.drain();

        // 124..=127 all missing; next cycle starts arriving.
        r.insert(pkt(1));
        r.insert(pkt(2));
        assert!(r.drain().is_empty());
        for i in [127, 125, 126] {
            r.insert(pkt(i));
            assert!(r.drain().is_empty());
        }
        r.insert(pkt(124));
        assert_eq!(indices(&r.drain()), vec![124, 125, 126, 127, 1, 2]);
    }

    #[test]
    fn padding_does_not_overshoot_existing_slots() {
        let mut r = ReorderBuffer::new();
        for i in 1..=124 {
            r.insert(pkt(i));
        }
        r.drain();
        // 126 buffered first, so `current` already spans two slots.
        r.insert(pkt(126));
        r.insert(pkt(1));
        r.insert(pkt(2));
        r.insert(pkt(127));
        r.insert(pkt(125));
        assert_eq!(indices(&r.drain()), vec![125, 126, 127, 1, 2]);
        r.insert(pkt(3));
        assert_eq!(indices(&r.drain()), vec![3]);
    }

    #[test]
    fn previous_cycle_copy_is_replaced_by_fresh_one() {
        let mut r = ReorderBuffer::new();
        for n in 0..129 {
            r.insert(pkt(nth_index(n)));
            r.drain();
        }
        assert_eq!(r.cursor(), 2);

        // A late retry of 126 from the cycle that just ended.
        let mut late = pkt(126);
        late.payload = vec![0xee];
        r.insert(late);
        assert_eq!(r.buffered(), 1);

        let mut delivered = Vec::new();
        for n in 129..(129 + 127) {
            r.insert(pkt(nth_index(n)));
            delivered.extend(r.drain());
        }
        let expected: Vec<u8> = (129..(129 + 127)).map(nth_index).collect();
        assert_eq!(indices(&delivered), expected);
        assert!(delivered.iter().all(|p| p.payload == vec![p.send_index]));
    }

    #[test]
    fn shuffled_windows_deliver_in_order() {
        // Deliver blocks of four in reverse order, crossing several wraps.
        let mut r = ReorderBuffer::new();
        let mut delivered = Vec::new();
        for block in 0..100 {
            for k in (0..4).rev() {
                r.insert(pkt(nth_index(block * 4 + k)));
                delivered.extend(indices(&r.drain()));
            }
        }
        let expected: Vec<u8> = (0..400).map(nth_index).collect();
        assert_eq!(delivered, expected);
    }
}
