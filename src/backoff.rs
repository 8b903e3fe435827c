//! Exponential cool-down timer for penalized clients.

use std::time::{Duration, Instant};

/// Growth parameters of an [`ExponentialBackoff`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Cool-down after the first attempt
    pub initial_delay: Duration,
    /// Factor applied per additional attempt
    pub multiplier: f64,
    /// Upper bound of a single cool-down
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Cool-down granted for the given attempt (1-based).
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Attempt counter with a cool-down deadline.
///
/// Touching while still backed off extends the deadline; it never moves
/// earlier.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    attempts: u32,
    deadline: Option<Instant>,
}

impl ExponentialBackoff {
    /// A backoff with no recorded attempt.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            deadline: None,
        }
    }

    /// A backoff whose first attempt is recorded at `now`.
    pub fn started(policy: BackoffPolicy, now: Instant) -> Self {
        let mut backoff = Self::new(policy);
        backoff.touch(now);
        backoff
    }

    /// Record an attempt and extend the cool-down.
    pub fn touch(&mut self, now: Instant) {
        self.attempts = self.attempts.saturating_add(1);
        let candidate = now + self.policy.delay_for(self.attempts);
        self.deadline = Some(match self.deadline {
            Some(current) => current.max(candidate),
            None => candidate,
        });
    }

    /// True while `now` is before the cool-down deadline.
    pub fn is_backed_off(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now < deadline)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn test_delay_growth_and_cap() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(4), Duration::from_millis(800));
        assert_eq!(p.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_fresh_backoff_is_not_backed_off() {
        let backoff = ExponentialBackoff::new(policy());
        assert!(!backoff.is_backed_off(Instant::now()));
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.deadline().is_none());
    }

    #[test]
    fn test_started_backoff_window() {
        let now = Instant::now();
        let backoff = ExponentialBackoff::started(policy(), now);

        assert_eq!(backoff.attempts(), 1);
        assert!(backoff.is_backed_off(now));
        assert!(backoff.is_backed_off(now + Duration::from_millis(99)));
        assert!(!backoff.is_backed_off(now + Duration::from_millis(100)));
    }

    #[test]
    fn test_touch_extends_deadline() {
        let start = Instant::now();
        let mut backoff = ExponentialBackoff::started(policy(), start);
        let first = backoff.deadline().unwrap();

        backoff.touch(start + Duration::from_millis(50));
        let second = backoff.deadline().unwrap();
        assert_eq!(second, start + Duration::from_millis(250));
        assert!(second > first);

        backoff.touch(start + Duration::from_millis(60));
        assert_eq!(backoff.deadline().unwrap(), start + Duration::from_millis(460));
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_deadline_never_moves_backwards() {
        let start = Instant::now();
        let mut backoff = ExponentialBackoff::new(BackoffPolicy {
            initial_delay: Duration::from_millis(500),
            multiplier: 1.0,
            max_delay: Duration::from_millis(500),
        });

        backoff.touch(start + Duration::from_millis(100));
        let later = backoff.deadline().unwrap();

        // A touch stamped earlier than the previous one cannot shorten the penalty
        backoff.touch(start);
        assert_eq!(backoff.deadline().unwrap(), later);
    }
}
