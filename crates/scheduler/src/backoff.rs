//! Exponential backoff with bounded jitter

use std::time::Duration;

use contracts::SchedulerSettings;
use rand::Rng;

/// Per-task retry delay generator
///
/// Delays grow geometrically from `initial` and are capped at `max`. Jitter
/// spreads each delay by up to `±jitter` of itself but never past `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 0.99),
            attempt: 0,
        }
    }

    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self::new(
            settings.initial_backoff(),
            settings.max_backoff(),
            settings.backoff_multiplier,
            settings.backoff_jitter,
        )
    }

    /// Delay before the next retry; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let max = self.max.as_secs_f64();
        let growth = self.multiplier.powi(self.attempt as i32);
        let base = (self.initial.as_secs_f64() * growth).min(max);
        self.attempt = self.attempt.saturating_add(1);

        let secs = if self.jitter > 0.0 {
            let spread = rand::rng().random_range(-self.jitter..=self.jitter);
            (base * (1.0 + spread)).min(max)
        } else {
            base
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Consecutive retries since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometric_growth_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0, 0.0);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 3.0, 0.0);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_below_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4), 2.0, 0.5);
        for _ in 0..200 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(4), "{delay:?}");
            assert!(delay >= Duration::from_millis(500), "{delay:?}");
        }
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let mut backoff = Backoff::from_settings(&SchedulerSettings::default());
        for _ in 0..5_000 {
            backoff.next_delay();
        }
        assert!(backoff.next_delay() <= Duration::from_millis(300_000));
    }
}
