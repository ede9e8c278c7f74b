//! Wrap-safe TCP sequence numbers.

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A TCP sequence number: an integer modulo 2<sup>32</sup>.
///
/// Ordering is defined through the signed difference, so comparisons stay
/// correct across the unsigned wrap. Every sequence comparison in this crate
/// goes through this relation, never through raw `u32` ordering. The relation
/// is not a total order over the full ring, so only `PartialOrd` is
/// implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(pub u32);

impl SeqNum {
    /// The raw 32-bit value, for encoding on the wire.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u32> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: u32) -> SeqNum {
        SeqNum(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNum {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SeqNum {
    type Output = SeqNum;

    fn sub(self, rhs: u32) -> SeqNum {
        SeqNum(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u32> for SeqNum {
    fn sub_assign(&mut self, rhs: u32) {
        *self = *self - rhs;
    }
}

/// The signed distance between two sequence numbers.
impl Sub for SeqNum {
    type Output = i32;

    fn sub(self, rhs: SeqNum) -> i32 {
        self.0.wrapping_sub(rhs.0) as i32
    }
}

impl PartialOrd for SeqNum {
    fn partial_cmp(&self, other: &SeqNum) -> Option<Ordering> {
        (*self - *other).partial_cmp(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_without_wrap() {
        assert!(SeqNum(10) < SeqNum(20));
        assert!(!(SeqNum(20) < SeqNum(10)));
        assert!(SeqNum(5) <= SeqNum(5));
        assert!(!(SeqNum(5) < SeqNum(5)));
        assert!(SeqNum(20) > SeqNum(10));
        assert!(SeqNum(5) >= SeqNum(5));
    }

    #[test]
    fn ordering_across_wrap() {
        assert!(SeqNum(2_000_000_000) < SeqNum(3_000_000_000));
        assert!(!(SeqNum(3_000_000_000) < SeqNum(2_000_000_000)));
        assert!(SeqNum(3_000_000_000) < SeqNum(4_000_000_000));
        assert!(SeqNum(u32::MAX - 5) < SeqNum(5));
        assert!(SeqNum(5) > SeqNum(u32::MAX - 5));
    }

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(SeqNum(u32::MAX) + 2, SeqNum(1));
        assert_eq!(SeqNum(1) - 2, SeqNum(u32::MAX));
        assert_eq!(SeqNum(1) - SeqNum(u32::MAX), 2);
        assert_eq!(SeqNum(u32::MAX) - SeqNum(1), -2);
    }

    #[test]
    fn distance_is_signed() {
        assert_eq!(SeqNum(1000) - SeqNum(900), 100);
        assert_eq!(SeqNum(900) - SeqNum(1000), -100);
    }
}
