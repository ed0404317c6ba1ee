//! Mock Hardware for the HXN fly-scan stack
//!
//! Simulated devices for exercising the fly-scan coordinator without a beamline.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mock Devices
//!
//! - [`MockSignalBus`] - In-memory named signals with setpoint/readback pairs
//! - [`MockScanController`] - HXN motion controller that raises and lowers
//!   `ScanInProgress` in response to a start command
//! - [`MockAreaDetector`] - Externally triggered detector whose TIFF plugin
//!   allocates an `AD_TIFF` resource on stage
//!
//! # Timing
//!
//! - [`MockMode::Instant`]: no delays, the raster finishes as soon as it starts
//! - [`MockMode::Realistic`]: 2ms round trips, 20ms readback settling, 50ms start
//!   latency, raster held for `nx * ny / trigger_rate` seconds
//! - [`MockMode::Chaos`]: realistic timing with start-latency jitter
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_driver_mock::{MockAreaDetector, MockScanController, MockMode};
//!
//! let controller = MockScanController::builder().mode(MockMode::Realistic).build();
//! let detector = MockAreaDetector::default();
//! ```

pub mod common;
mod mock_area_detector;
mod mock_scan_controller;
mod signal_bus;

// Re-export common types
pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};

// Re-export device types
pub use mock_area_detector::{MockAreaDetector, MockAreaDetectorConfig, signals as detector_signals};
pub use mock_scan_controller::{
    MockScanController, MockScanControllerBuilder, ScanBehavior, ScanControllerSignals,
};
pub use signal_bus::MockSignalBus;
