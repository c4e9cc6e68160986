use std::time::Duration;

use tokio::time::Instant;

/// Drop-on-overflow rate limiter.
///
/// Permits at most one event per interval. Events arriving too early are rejected, never deferred.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_rate` events per second.
    ///
    /// # Panics
    ///
    /// Panics if `max_rate` is not a positive, finite number.
    pub fn new(max_rate: f32) -> Self {
        assert!(
            max_rate > 0.0 && max_rate.is_finite(),
            "invalid rate {max_rate}"
        );
        Self {
            interval: Duration::from_secs_f32(1.0 / max_rate),
            last: None,
        }
    }

    /// Returns whether an event at `now` may pass, and records it if so.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forgets the last permitted event.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_60hz_input_at_20hz() {
        let mut limiter = RateLimiter::new(20.0);
        let start = Instant::now();
        let frame = Duration::from_secs_f64(1.0 / 60.0);

        let passed = (0..60)
            .filter(|&i| limiter.try_acquire(start + frame * i))
            .count();
        assert!(passed <= 20, "{passed} events passed");
        assert!(passed >= 15, "{passed} events passed");
    }

    #[test]
    fn first_event_passes() {
        let mut limiter = RateLimiter::new(1.0);
        let now = Instant::now();
        assert!(limiter.try_acquire(now));
        assert!(!limiter.try_acquire(now + Duration::from_millis(999)));
        assert!(limiter.try_acquire(now + Duration::from_secs(1)));

        limiter.reset();
        assert!(limiter.try_acquire(now + Duration::from_millis(1001)));
    }
}
