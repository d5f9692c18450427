use std::time::{Duration, Instant};

/// First flight resend timeout.
pub(crate) const INITIAL_RESEND: Duration = Duration::from_millis(1000);

/// Resend timeouts never grow beyond this.
pub(crate) const MAX_RESEND: Duration = Duration::from_millis(60_000);

/// Exponential backoff for flight retransmission: doubles on every attempt,
/// capped, never resets except at flight boundaries.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff {
            current: INITIAL_RESEND,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the timeout after a resend, up to the cap.
    pub fn advance(&mut self) {
        self.current = (self.current * 2).min(MAX_RESEND);
    }
}

/// An optional absolute deadline. `None` means wait forever.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub fn never() -> Self {
        Deadline(None)
    }

    pub fn after(timeout: Duration) -> Self {
        if timeout.is_zero() {
            // Zero is the configured "wait forever".
            Deadline(None)
        } else {
            Deadline(Some(Instant::now() + timeout))
        }
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    /// Time left until the deadline, `None` if unbounded.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.0.map(|d| d.saturating_duration_since(now))
    }

    pub fn expired(&self, now: Instant) -> bool {
        matches!(self.0, Some(d) if now >= d)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new();
        let mut previous = Duration::ZERO;

        for _ in 0..10 {
            let current = b.current();
            assert!(current >= previous, "backoff must be monotone");
            assert!(current <= MAX_RESEND);
            if previous != Duration::ZERO && current < MAX_RESEND {
                assert_eq!(current, previous * 2);
            }
            previous = current;
            b.advance();
        }

        assert_eq!(b.current(), MAX_RESEND);
        b.advance();
        assert_eq!(b.current(), MAX_RESEND);
    }

    #[test]
    fn backoff_starts_at_one_second() {
        assert_eq!(Backoff::new().current(), Duration::from_millis(1000));
    }

    #[test]
    fn zero_timeout_means_forever() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.remaining(Instant::now()).is_none());
        assert!(!d.expired(Instant::now()));
    }

    #[test]
    fn deadline_expires() {
        let now = Instant::now();
        let d = Deadline::at(now + Duration::from_millis(10));
        assert!(!d.expired(now));
        assert!(d.expired(now + Duration::from_millis(11)));
        assert_eq!(d.remaining(now), Some(Duration::from_millis(10)));
    }
}
