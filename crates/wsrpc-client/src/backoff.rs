//! Exponential reconnection backoff with symmetric jitter.

use std::time::Duration;

use rand::Rng;

/// Next delay = min(max, prev * 2), jittered as `delay * (1 ± jitter * rand)`
/// and clamped to `[0, max]`.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            current: base,
        }
    }

    /// The delay to sleep before the next attempt; advances the schedule.
    pub fn duration(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);

        let spread = self.jitter * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);
        let jittered = delay.mul_f64((1.0 + spread).max(0.0));
        jittered.min(self.max)
    }

    /// Back to the initial delay, after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn delays_stay_within_the_jitter_band() {
        let base = Duration::from_millis(1_000);
        let max = Duration::from_millis(5_000);
        let mut backoff = Backoff::new(base, max, 0.5);
        let mut floor = base;
        for _ in 0..16 {
            let d = backoff.duration();
            assert!(d >= floor.mul_f64(0.5), "below jitter floor: {d:?}");
            assert!(d <= max, "above cap: {d:?}");
            floor = (floor * 2).min(max);
        }
    }

    #[test]
    fn no_jitter_is_pure_doubling() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(450), 0.0);
        assert_eq!(backoff.duration(), Duration::from_millis(100));
        assert_eq!(backoff.duration(), Duration::from_millis(200));
        assert_eq!(backoff.duration(), Duration::from_millis(400));
        assert_eq!(backoff.duration(), Duration::from_millis(450));
        assert_eq!(backoff.duration(), Duration::from_millis(450));
    }

    #[test]
    fn reset_restores_the_initial_delay() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), 0.0);
        backoff.duration();
        backoff.duration();
        backoff.reset();
        assert_eq!(backoff.duration(), Duration::from_millis(100));
    }
}
