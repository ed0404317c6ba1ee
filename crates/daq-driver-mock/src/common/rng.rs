//! Seeded RNG wrapper for reproducible chaos.
//!
//! Used by the error injection framework for random failure decisions and by
//! the simulated scan controller for start-latency jitter.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Seeded RNG wrapper for reproducible random behavior
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG with optional seed.
    /// If seed is None, uses a random seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Check if an operation should fail based on the given failure rate.
    ///
    /// `rate` runs from 0.0 (never fail) to 1.0 (always fail).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().r#gen::<f64>() < rate
    }

    /// Uniform random delay in `[0, max]`.
    pub fn jitter(&self, max: Duration) -> Duration {
        let max_us = max.as_micros() as u64;
        if max_us == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.inner.lock().gen_range(0..=max_us))
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_jitter_deterministic() {
        let rng1 = MockRng::new(Some(42));
        let rng2 = MockRng::new(Some(42));
        let max = Duration::from_millis(50);

        assert_eq!(rng1.jitter(max), rng2.jitter(max));
    }

    #[test]
    fn test_jitter_bounded() {
        let rng = MockRng::new(Some(7));
        let max = Duration::from_millis(5);
        for _ in 0..100 {
            assert!(rng.jitter(max) <= max);
        }
        assert_eq!(rng.jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_should_fail_extremes() {
        let rng = MockRng::new(Some(42));
        for _ in 0..100 {
            assert!(!rng.should_fail(0.0));
            assert!(rng.should_fail(1.0));
        }
    }
}
