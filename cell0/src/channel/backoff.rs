//! Shared reconnect strategy: exponential backoff, max 30s, jittered
//! (spec §4.1 "Failure handling").

use rand::Rng;
use std::time::Duration;

pub struct Backoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }

    /// Duration to wait before the next reconnect attempt, with +/-20%
    /// jitter, and advance the internal attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << self.attempt.min(10));
        let capped = exp.min(self.max.as_millis());
        self.attempt = self.attempt.saturating_add(1);
        let jitter_frac = rand::thread_rng().gen_range(0.8..1.2);
        let jittered = (capped as f64 * jitter_frac) as u64;
        Duration::from_millis(jittered.min(self.max.as_millis() as u64))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap_at_max() {
        let mut backoff = Backoff::new();
        let mut last = Duration::from_millis(0);
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(30) + Duration::from_secs(1));
            last = delay;
        }
        assert!(last <= Duration::from_secs(31));
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = Backoff::new();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let first = backoff.next_delay();
        assert!(first <= Duration::from_millis(700));
    }
}
