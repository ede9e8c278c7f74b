//! Byte collections with efficient operations for segment payloads.
//!
//! This module implements the [`Payload`] collection.

use bytes::Bytes;
use std::collections::VecDeque;

/// A byte collection tuned to what a TCP send and receive path actually does
/// with bytes: append chunks, trim acknowledged or duplicated prefixes, and
/// hand slices to the retransmission queue. All operations are zero-copy;
/// chunks are reference-counted and sharing a range only bumps counts.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl Payload {
    /// Creates a payload with the given body content.
    ///
    /// # Examples
    ///
    /// ```
    /// # use usertcp::payload::Payload;
    /// let payload = Payload::new(&b"body"[..]);
    /// assert_eq!(payload.len(), 4);
    /// ```
    pub fn new(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let len = body.len();
        let mut chunks = VecDeque::new();
        if !body.is_empty() {
            chunks.push_back(body);
        }
        Self { chunks, len }
    }

    /// The number of bytes in the payload.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the payload contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a chunk of bytes to the end of the payload.
    pub fn push(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        self.len += chunk.len();
        if !chunk.is_empty() {
            self.chunks.push_back(chunk);
        }
    }

    /// Appends another payload, taking ownership of its chunks.
    pub fn append(&mut self, mut other: Payload) {
        self.len += other.len;
        self.chunks.append(&mut other.chunks);
    }

    /// Removes the first `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the payload length.
    pub fn trim_front(&mut self, mut n: usize) {
        assert!(n <= self.len);
        self.len -= n;
        while n > 0 {
            let front = self.chunks.front_mut().expect("length accounting broken");
            if front.len() <= n {
                n -= front.len();
                self.chunks.pop_front();
            } else {
                *front = front.slice(n..);
                n = 0;
            }
        }
    }

    /// Shortens the payload to at most `len` bytes, dropping the tail.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        let mut keep = len;
        let mut kept_chunks = 0;
        for chunk in self.chunks.iter_mut() {
            if keep == 0 {
                break;
            }
            if chunk.len() > keep {
                *chunk = chunk.slice(..keep);
            }
            keep -= chunk.len().min(keep);
            kept_chunks += 1;
        }
        self.chunks.truncate(kept_chunks);
        self.len = len;
    }

    /// Returns a payload sharing `len` bytes starting at `offset` without
    /// copying. The chunks are reference-counted with the original.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the end of the payload.
    pub fn share(&self, offset: usize, len: usize) -> Payload {
        assert!(offset + len <= self.len);
        let mut out = Payload::default();
        let mut skip = offset;
        let mut take = len;
        for chunk in &self.chunks {
            if take == 0 {
                break;
            }
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            let available = chunk.len() - skip;
            let n = available.min(take);
            out.push(chunk.slice(skip..skip + n));
            skip = 0;
            take -= n;
        }
        out
    }

    /// Splits off and returns the first `n` bytes, leaving the rest.
    pub fn split_front(&mut self, n: usize) -> Payload {
        let front = self.share(0, n);
        self.trim_front(n);
        front
    }

    /// Returns an iterator over the bytes of the payload.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter().copied())
    }

    /// The payload's chunks, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.chunks.iter()
    }

    /// Copies the payload into a contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }
}

impl From<Vec<u8>> for Payload {
    fn from(val: Vec<u8>) -> Self {
        Payload::new(val)
    }
}

impl From<&[u8]> for Payload {
    fn from(val: &[u8]) -> Self {
        Payload::new(Bytes::copy_from_slice(val))
    }
}

impl<const L: usize> From<[u8; L]> for Payload {
    fn from(val: [u8; L]) -> Self {
        Payload::new(Bytes::copy_from_slice(&val))
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl Eq for Payload {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_trim() {
        let mut payload = Payload::new(&b"hello, "[..]);
        payload.push(Bytes::from_static(b"world"));
        assert_eq!(payload.len(), 12);
        payload.trim_front(7);
        assert_eq!(payload.to_vec(), b"world");
    }

    #[test]
    fn trim_across_chunks() {
        let mut payload = Payload::new(&b"abc"[..]);
        payload.push(Bytes::from_static(b"def"));
        payload.push(Bytes::from_static(b"ghi"));
        payload.trim_front(4);
        assert_eq!(payload.to_vec(), b"efghi");
        payload.trim_front(5);
        assert!(payload.is_empty());
    }

    #[test]
    fn share_does_not_disturb_original() {
        let mut payload = Payload::new(&b"0123"[..]);
        payload.push(Bytes::from_static(b"4567"));
        let shared = payload.share(2, 4);
        assert_eq!(shared.to_vec(), b"2345");
        assert_eq!(payload.to_vec(), b"01234567");
    }

    #[test]
    fn split_front_takes_prefix() {
        let mut payload = Payload::new(&b"segment one and more"[..]);
        let front = payload.split_front(11);
        assert_eq!(front.to_vec(), b"segment one");
        assert_eq!(payload.to_vec(), b" and more");
    }

    #[test]
    fn truncate_drops_tail() {
        let mut payload = Payload::new(&b"abcd"[..]);
        payload.push(Bytes::from_static(b"efgh"));
        payload.truncate(6);
        assert_eq!(payload.to_vec(), b"abcdef");
        payload.truncate(6);
        assert_eq!(payload.len(), 6);
    }

    #[test]
    fn append_concatenates() {
        let mut a = Payload::new(&b"first"[..]);
        let b = Payload::new(&b"second"[..]);
        a.append(b);
        assert_eq!(a.to_vec(), b"firstsecond");
    }
}
