//! Timing configuration for realistic mode.
//!
//! Defines hardware-like delays to simulate real device behavior in integration tests.

use std::time::Duration;

/// Timing configuration for realistic mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Per-request round trip in milliseconds (Channel Access put/get)
    pub communication_delay_ms: u64,
    /// Time for a written setpoint to appear on its readback
    pub settling_time_ms: u64,
    /// Delay between the start command and the scan-in-progress rise
    pub start_latency_ms: u64,
}

impl TimingConfig {
    /// Timing for the HXN motion controller
    pub fn scan_controller() -> Self {
        Self {
            communication_delay_ms: 2,
            settling_time_ms: 20,
            start_latency_ms: 50,
        }
    }

    /// Timing for an area detector
    pub fn area_detector() -> Self {
        Self {
            communication_delay_ms: 2,
            settling_time_ms: 0,
            start_latency_ms: 0,
        }
    }

    pub fn communication_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }

    pub fn settling_time(&self) -> Duration {
        Duration::from_millis(self.settling_time_ms)
    }

    pub fn start_latency(&self) -> Duration {
        Duration::from_millis(self.start_latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let config = TimingConfig::default();
        assert_eq!(config.communication_delay(), Duration::ZERO);
        assert_eq!(config.settling_time(), Duration::ZERO);
        assert_eq!(config.start_latency(), Duration::ZERO);
    }

    #[test]
    fn test_scan_controller_timing() {
        let config = TimingConfig::scan_controller();
        assert_eq!(config.communication_delay_ms, 2);
        assert_eq!(config.settling_time(), Duration::from_millis(20));
        assert_eq!(config.start_latency(), Duration::from_millis(50));
    }
}
