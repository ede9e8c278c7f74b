//! One-shot deadline timers for the retransmission, persist, and delayed-ACK
//! machinery.
//!
//! Timers here are plain deadlines over the tokio clock. The per-connection
//! driver task sleeps until the earliest armed deadline and feeds expirations
//! back into the connection, which keeps the protocol state machine itself
//! synchronous and testable under a paused clock.

use tokio::time::Instant;

/// A one-shot timer. Arming while already armed replaces the deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneShot {
    deadline: Option<Instant>,
}

impl OneShot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to fire at `deadline`, replacing any earlier deadline.
    pub fn rearm(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Arms the timer only if it is not already pending.
    pub fn arm_if_idle(&mut self, deadline: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(deadline);
        }
    }

    /// Disarms the timer.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether the timer is pending.
    pub fn armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The pending deadline, if any.
    pub fn expires_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consumes an expiration: if the timer is armed and its deadline is at
    /// or before `now`, disarms it and returns `true`.
    pub fn take_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// The earliest of a set of optional deadlines.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn expiry_consumes_the_deadline() {
        let mut timer = OneShot::new();
        let now = Instant::now();
        timer.rearm(now + Duration::from_millis(200));
        assert!(timer.armed());
        assert!(!timer.take_expired(now));
        assert!(timer.take_expired(now + Duration::from_millis(200)));
        assert!(!timer.armed());
        assert!(!timer.take_expired(now + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn arm_if_idle_is_idempotent() {
        let mut timer = OneShot::new();
        let now = Instant::now();
        timer.arm_if_idle(now + Duration::from_millis(100));
        timer.arm_if_idle(now + Duration::from_millis(500));
        assert_eq!(timer.expires_at(), Some(now + Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_skips_idle_timers() {
        let now = Instant::now();
        let mut a = OneShot::new();
        let b = OneShot::new();
        let mut c = OneShot::new();
        a.rearm(now + Duration::from_secs(3));
        c.rearm(now + Duration::from_secs(1));
        assert_eq!(
            earliest([a.expires_at(), b.expires_at(), c.expires_at()]),
            Some(now + Duration::from_secs(1)),
        );
    }
}
