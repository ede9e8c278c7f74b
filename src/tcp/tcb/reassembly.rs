//! Out-of-order segment reassembly.
//!
//! Fragments that arrive ahead of `RCV.NXT` are held in a map keyed by their
//! starting sequence number. Insertion merges overlapping and adjacent
//! fragments so the map always holds disjoint, non-adjacent ranges. When the
//! receive cursor advances, leading fragments are drained in order.

use crate::payload::Payload;
use crate::tcp::seq::SeqNum;
use std::collections::BTreeMap;

/// Sequence-keyed store of out-of-order fragments.
///
/// Keys are offsets from the initial receive sequence number so that the map
/// order matches wrap-safe sequence order for the life of the connection.
#[derive(Debug, Default)]
pub struct OutOfOrder {
    base: u32,
    map: BTreeMap<u32, Payload>,
}

impl OutOfOrder {
    /// Creates an empty store anchored at the initial receive sequence.
    pub fn new(initial: SeqNum) -> Self {
        Self {
            base: initial.raw(),
            map: BTreeMap::new(),
        }
    }

    fn rel(&self, seq: SeqNum) -> u32 {
        seq.raw().wrapping_sub(self.base)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Inserts a fragment, merging it with any fragments it overlaps or
    /// abuts.
    pub fn insert(&mut self, seq: SeqNum, payload: Payload) {
        if payload.is_empty() {
            return;
        }
        let mut beg = self.rel(seq);
        let mut merged = payload;

        // Absorb a predecessor that reaches our start.
        if let Some((&prev_beg, prev)) = self.map.range(..=beg).next_back() {
            let prev_end = prev_beg + prev.len() as u32;
            if prev_end >= beg {
                let overlap = (prev_end - beg) as usize;
                if overlap >= merged.len() {
                    // Entirely contained in an existing fragment.
                    return;
                }
                merged.trim_front(overlap);
                let mut prev = self.map.remove(&prev_beg).expect("fragment just found");
                prev.append(merged);
                merged = prev;
                beg = prev_beg;
            }
        }

        // Absorb successors that start inside or right at our end.
        let mut end = beg + merged.len() as u32;
        while let Some((&next_beg, next)) = self.map.range(beg..).next() {
            if next_beg > end {
                break;
            }
            let next_end = next_beg + next.len() as u32;
            let next = self.map.remove(&next_beg).expect("fragment just found");
            if next_end > end {
                let mut tail = next;
                tail.trim_front((end - next_beg) as usize);
                merged.append(tail);
                end = next_end;
            }
        }

        self.map.insert(beg, merged);
    }

    /// Drains fragments made deliverable by the receive cursor standing at
    /// `next`. Returns the in-order payloads, the advanced cursor, and
    /// whether anything was merged out (which obliges an immediate ACK).
    pub fn pop_in_order(&mut self, mut next: SeqNum) -> (Vec<Payload>, SeqNum, bool) {
        let mut delivered = Vec::new();
        let mut merged = false;
        loop {
            let Some((&beg, front)) = self.map.iter().next() else {
                break;
            };
            let cursor = self.rel(next);
            let end = beg + front.len() as u32;
            if end <= cursor {
                // Already received through other segments.
                self.map.remove(&beg);
            } else if beg <= cursor {
                let mut payload = self.map.remove(&beg).expect("fragment just found");
                payload.trim_front((cursor - beg) as usize);
                next += payload.len() as u32;
                delivered.push(payload);
                merged = true;
            } else {
                // A gap remains before the first fragment.
                break;
            }
        }
        (delivered, next, merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(byte: u8, len: usize) -> Payload {
        Payload::new(vec![byte; len])
    }

    fn collect(delivered: Vec<Payload>) -> Vec<u8> {
        delivered.iter().flat_map(|p| p.iter()).collect()
    }

    #[test]
    fn gap_then_fill_delivers_in_order() {
        let mut ooo = OutOfOrder::new(SeqNum(1000));
        ooo.insert(SeqNum(1011), payload(b'b', 10));
        let (delivered, next, merged) = ooo.pop_in_order(SeqNum(1001));
        assert!(delivered.is_empty());
        assert_eq!(next, SeqNum(1001));
        assert!(!merged);

        ooo.insert(SeqNum(1001), payload(b'a', 10));
        let (delivered, next, merged) = ooo.pop_in_order(SeqNum(1001));
        assert_eq!(next, SeqNum(1021));
        assert!(merged);
        let bytes = collect(delivered);
        assert_eq!(&bytes[..10], &[b'a'; 10]);
        assert_eq!(&bytes[10..], &[b'b'; 10]);
        assert!(ooo.is_empty());
    }

    #[test]
    fn overlapping_fragments_merge() {
        let mut ooo = OutOfOrder::new(SeqNum(0));
        ooo.insert(SeqNum(10), Payload::new(&b"cdef"[..]));
        ooo.insert(SeqNum(8), Payload::new(&b"abcd"[..]));
        ooo.insert(SeqNum(14), Payload::new(&b"ghij"[..]));
        let (delivered, next, merged) = ooo.pop_in_order(SeqNum(8));
        assert!(merged);
        assert_eq!(next, SeqNum(18));
        assert_eq!(collect(delivered), b"abcdefghij");
    }

    #[test]
    fn contained_fragment_is_dropped() {
        let mut ooo = OutOfOrder::new(SeqNum(0));
        ooo.insert(SeqNum(10), Payload::new(&b"0123456789"[..]));
        ooo.insert(SeqNum(12), Payload::new(&b"xxx"[..]));
        let (delivered, next, _) = ooo.pop_in_order(SeqNum(10));
        assert_eq!(next, SeqNum(20));
        assert_eq!(collect(delivered), b"0123456789");
    }

    #[test]
    fn stale_fragments_are_discarded() {
        let mut ooo = OutOfOrder::new(SeqNum(100));
        ooo.insert(SeqNum(110), payload(b'x', 5));
        // The cursor has already moved past the fragment.
        let (delivered, next, merged) = ooo.pop_in_order(SeqNum(120));
        assert!(delivered.is_empty());
        assert_eq!(next, SeqNum(120));
        assert!(!merged);
        assert!(ooo.is_empty());
    }

    #[test]
    fn partially_stale_fragment_is_trimmed() {
        let mut ooo = OutOfOrder::new(SeqNum(100));
        ooo.insert(SeqNum(110), Payload::new(&b"abcdef"[..]));
        let (delivered, next, merged) = ooo.pop_in_order(SeqNum(113));
        assert!(merged);
        assert_eq!(next, SeqNum(116));
        assert_eq!(collect(delivered), b"def");
    }

    #[test]
    fn works_across_sequence_wrap() {
        let initial = SeqNum(u32::MAX - 4);
        let mut ooo = OutOfOrder::new(initial);
        // Starts before the wrap, ends after it.
        ooo.insert(initial + 8, payload(b'y', 8));
        ooo.insert(initial + 1, payload(b'x', 7));
        let (delivered, next, merged) = ooo.pop_in_order(initial + 1);
        assert!(merged);
        assert_eq!(next, initial + 16);
        assert_eq!(collect(delivered).len(), 15);
    }
}
