//! Error types for the fly-scan stack.
//!
//! Two families live here:
//!
//! - **`FlyScanError`**: the coordinator's error taxonomy. Every failure a caller
//!   of the flyer can observe maps to exactly one variant, so orchestration code
//!   can tell state-machine misuse apart from hardware trouble.
//! - **`DriverError`**: a structured error raised by device implementations
//!   (including the simulated devices in `daq-driver-mock`). Capability traits
//!   return `anyhow::Result`, so a `DriverError` usually travels wrapped in an
//!   `anyhow::Error` until the coordinator folds it into
//!   `FlyScanError::HardwareCommandFailed`.
//!
//! ## Recovery
//!
//! None of these errors are retried by the coordinator. After any error the
//! flyer only accepts `unstage()`, which always returns it to `Idle`.

use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Configuration,
    Communication,
    Hardware,
    Timeout,
    InvalidParameter,
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    pub driver_type: String,
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Fly-scan Errors
// =============================================================================

/// Convenience alias for results using the fly-scan error type.
pub type FlyResult<T> = std::result::Result<T, FlyScanError>;

/// Errors surfaced by the fly-scan coordinator and its components.
///
/// # Error Categories
///
/// 1. **Misuse** - `InvalidTransition`, `DuplicateSynthesis`
///    - A phase was called out of order. Never caused by hardware.
///    - Recovery: `unstage()` and start over.
///
/// 2. **Hardware** - `HardwareCommandFailed`, `ConfigUnavailable`, `MonitorClosed`,
///    `ResourceUnavailable`
///    - A signal write/read failed, or the detector did not produce what staging
///      promised.
///    - Recovery: `unstage()` (always attempted), inspect hardware.
///
/// 3. **Caller timeouts** - `ScanNeverStarted`, `ScanNeverCompleted`
///    - Raised by whoever bounds the `kickoff()`/`complete()` futures. The
///      coordinator itself never imposes these, scan duration depends on the
///      trajectory.
#[derive(Error, Debug)]
pub enum FlyScanError {
    /// A phase was requested from a state that does not allow it.
    #[error("Cannot {operation} while flyer is {state}")]
    InvalidTransition {
        /// Phase that was requested (e.g. "kickoff")
        operation: &'static str,
        /// State the coordinator was in
        state: String,
    },

    /// A signal write or read failed while executing a phase.
    #[error("Hardware command '{operation}' failed: {cause}")]
    HardwareCommandFailed {
        /// The command that failed (e.g. "set cam.acquire")
        operation: String,
        /// Rendered cause from the transport or device
        cause: String,
    },

    /// A trajectory readback could not be obtained within the read timeout.
    #[error("Trajectory readback '{signal}' unavailable: {cause}")]
    ConfigUnavailable {
        /// Readback signal name
        signal: String,
        /// Why the read failed
        cause: String,
    },

    /// Trajectory parameters were read but do not describe a raster.
    #[error("Invalid trajectory: {0}")]
    InvalidTrajectory(String),

    /// Asset collection was requested but staging produced no resource.
    #[error("Detector did not produce a storage resource during stage")]
    ResourceUnavailable,

    /// Datum documents were already generated for this scan.
    #[error("Asset documents already synthesized for resource {resource_uid}")]
    DuplicateSynthesis {
        /// Resource the first synthesis used
        resource_uid: String,
    },

    /// The external scan did not start within the caller's timeout.
    #[error("External scan did not start within {0:?}")]
    ScanNeverStarted(Duration),

    /// The external scan did not finish within the caller's timeout.
    #[error("External scan did not complete within {0:?}")]
    ScanNeverCompleted(Duration),

    /// The monitor subscription ended before the awaited transition.
    #[error("Monitor on '{0}' closed before the awaited transition")]
    MonitorClosed(String),
}

impl FlyScanError {
    /// Build a `HardwareCommandFailed` from any displayable cause.
    pub fn hardware(operation: impl Into<String>, cause: impl Display) -> Self {
        Self::HardwareCommandFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// True for errors that indicate misuse of the state machine.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::DuplicateSynthesis { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new(
            "mock_area_detector",
            DriverErrorKind::Communication,
            "channel disconnected",
        );
        assert_eq!(
            err.to_string(),
            "Driver 'mock_area_detector' communication error: channel disconnected"
        );
    }

    #[test]
    fn test_hardware_error_wraps_cause() {
        let cause = anyhow::anyhow!(DriverError::new(
            "mock_signal_bus",
            DriverErrorKind::Timeout,
            "put timed out",
        ));
        let err = FlyScanError::hardware("set cam.acquire", cause);
        assert!(err.to_string().contains("set cam.acquire"));
        assert!(err.to_string().contains("put timed out"));
        assert!(!err.is_misuse());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = FlyScanError::InvalidTransition {
            operation: "kickoff",
            state: "idle".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot kickoff while flyer is idle");
        assert!(err.is_misuse());
    }
}
