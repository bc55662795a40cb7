//! Exponential reconnect backoff.

use std::time::Duration;

/// Doubling delay with a cap, plus the attempt counter of one reconnect
/// episode.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u8,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn delay(&self) -> Duration {
        self.current
    }

    /// Attempts made in this episode.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Count an attempt and return the new total.
    pub fn record_attempt(&mut self) -> u8 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// Double the delay, up to the cap.
    pub fn grow(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    /// Start a new episode.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Change the limits; takes effect from the next reset.
    pub fn reconfigure(&mut self, initial: Duration, max: Duration) {
        self.initial = initial;
        self.max = max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_to_cap() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(32));
        let mut seen = vec![b.delay().as_secs()];
        for _ in 0..8 {
            b.grow();
            seen.push(b.delay().as_secs());
        }
        assert_eq!(seen, [1, 2, 4, 8, 16, 32, 32, 32, 32]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_reset() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_secs(32));
        b.grow();
        b.record_attempt();
        b.record_attempt();
        assert_eq!(b.attempts(), 2);
        b.reset();
        assert_eq!(b.attempts(), 0);
        assert_eq!(b.delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_attempts_saturate() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(2));
        for _ in 0..300 {
            b.record_attempt();
        }
        assert_eq!(b.attempts(), u8::MAX);
    }
}
