//! Error injection framework for mock devices.
//!
//! Enables configurable failures for resilience testing. Operations are named
//! after the request the simulated device is serving, e.g. `"set cam.acquire"`,
//! `"get XF:03IDC-CT{MC:01}NX-RB"`, `"stage"`. A scenario matches an operation
//! exactly, or every operation when its name is `"*"`.

use super::rng::MockRng;
use daq_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration for mock devices
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), `"*"` for all operations
    failure_rates: Arc<HashMap<String, f64>>,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<MockRng>,
    /// State tracking for scenarios
    state: Arc<Mutex<ErrorState>>,
}

#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail after N successful operations
    FailAfterN { operation: String, count: u32 },
    /// Timeout on specific operation
    Timeout { operation: String },
    /// Simulate communication loss (every later operation fails too)
    CommunicationLoss,
    /// Hardware fault with specific code
    HardwareFault { code: u32 },
}

impl ErrorScenario {
    /// Fail every call of `operation`.
    pub fn always(operation: impl Into<String>) -> Self {
        ErrorScenario::FailAfterN {
            operation: operation.into(),
            count: 0,
        }
    }

    /// Time out every call of `operation`.
    pub fn timeout(operation: impl Into<String>) -> Self {
        ErrorScenario::Timeout {
            operation: operation.into(),
        }
    }
}

fn matches(pattern: &str, operation: &str) -> bool {
    pattern == "*" || pattern == operation
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Operation counters for FailAfterN scenarios
    operation_counts: HashMap<String, u32>,
    /// Whether communication is lost
    communication_lost: bool,
    /// Hardware fault code (0 = no fault)
    hardware_fault_code: u32,
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// Create error config with uniform random failures and specific seed
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*".to_string(), rate);
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            failure_rates: Arc::new(HashMap::new()),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(None)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Check if an operation should fail and return appropriate error
    pub fn check_operation(&self, driver_type: &str, operation: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                "Communication lost",
            ));
        }

        if state.hardware_fault_code != 0 {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Hardware fault: {}", state.hardware_fault_code),
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN { operation: op, count } if matches(op, operation) => {
                    let current = state.operation_counts.entry(op.clone()).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(DriverError::new(
                            driver_type,
                            DriverErrorKind::Hardware,
                            format!(
                                "Injected failure on '{}' after {} operations",
                                operation, count
                            ),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if matches(op, operation) => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Hardware fault: {}", code),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Reset error state (clear counters, faults)
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("mock_signal_bus", "get NX-RB").is_ok());
        }
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("mock_signal_bus", "set NX").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "stage".to_string(),
            count: 2,
        });

        assert!(config.check_operation("mock_area_detector", "stage").is_ok());
        assert!(config.check_operation("mock_area_detector", "stage").is_ok());
        assert!(config.check_operation("mock_area_detector", "stage").is_err());
        // Other operations are unaffected
        assert!(config.check_operation("mock_area_detector", "unstage").is_ok());

        config.reset();
        assert!(config.check_operation("mock_area_detector", "stage").is_ok());
    }

    #[test]
    fn test_always_and_wildcard() {
        let config = ErrorConfig::scenario(ErrorScenario::always("set cam.acquire"));
        assert!(config.check_operation("det", "set cam.acquire").is_err());
        assert!(config.check_operation("det", "set cam.num_images").is_ok());

        let everything = ErrorConfig::scenario(ErrorScenario::timeout("*"));
        let err = everything.check_operation("det", "anything").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn test_communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);

        let err = config.check_operation("bus", "get X").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
        assert!(config.check_operation("bus", "set Y").is_err());
    }

    #[test]
    fn test_hardware_fault() {
        let config = ErrorConfig::scenario(ErrorScenario::HardwareFault { code: 0x42 });

        let err = config.check_operation("bus", "get X").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        assert!(err.message.contains("66"));
    }
}
