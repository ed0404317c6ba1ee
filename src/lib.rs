//! # HXN fly-scan
//!
//! Coordination of externally timed raster ("fly") scans at the HXN beamline.
//! The motion controller owns the timing: it rasters the sample and triggers
//! the area detector, while this stack arms both devices, waits on the
//! controller's `ScanInProgress` flag and turns the finished scan into
//! Bluesky-style documents.
//!
//! ## Crate Structure
//!
//! - **`daq-core`**: document model, observable values, hardware capability
//!   traits and the `FlyScanError` taxonomy.
//! - **`daq-experiment`**: the `FlyScanCoordinator` state machine and the
//!   `fly_scan` plan runner.
//! - **`daq-driver-mock`**: simulated motion controller and area detector.
//! - **this crate**: configuration loading ([`config`]), tracing setup
//!   ([`logging`]) and wiring against simulated hardware ([`simulation`]).

pub mod config;
pub mod logging;
pub mod simulation;

pub use config::{ConfigLoadError, FlyScanSettings, TimeoutSettings};
pub use daq_experiment::flyer::{FlyScanCoordinator, FlyerOptions, FlyerSignals, ScanState};
pub use daq_experiment::plans::{FlyScanRequest, FlyScanRunner, FlyScanSummary, FlyScanTimeouts};
pub use simulation::SimulatedBeamline;
