//! Operational modes for mock devices.
//!
//! - **Instant**: Zero delays, deterministic behavior for unit tests
//! - **Realistic**: Hardware-like timing (settling, scan duration from the trajectory)
//! - **Chaos**: Realistic timing plus start-latency jitter and random failures

use std::time::Duration;

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Jitter and failures on top of realistic timing - for resilience testing
    Chaos,
}

impl MockMode {
    /// Delay actually applied for a nominal hardware delay.
    pub fn delay(self, nominal: Duration) -> Duration {
        match self {
            MockMode::Instant => Duration::ZERO,
            MockMode::Realistic | MockMode::Chaos => nominal,
        }
    }

    /// Whether random behavior is enabled.
    pub fn is_chaotic(self) -> bool {
        self == MockMode::Chaos
    }
}
