//! Fly scans on the HXN beamline.
//!
//! - [`flyer`] - the coordinator that runs one externally timed raster
//! - [`plans`] - the `fly_scan` plan built on top of it

pub mod flyer;
pub mod plans;

pub use flyer::{FlyScanCoordinator, FlyerOptions, FlyerSignals, ScanState};
pub use plans::{FlyScanRequest, FlyScanRunner, FlyScanSummary, FlyScanTimeouts};
