//! The HXN flyer.
//!
//! [`FlyScanCoordinator`] implements the fly protocol (`stage`, `kickoff`,
//! `complete`, `collect_assets`, `collect`, `unstage`) on top of a motion
//! controller that runs the raster on its own clock and a detector triggered
//! by that controller. The submodules are the pieces it is built from and are
//! usable on their own.

pub mod assets;
pub mod coordinator;
pub mod events;
pub mod lifecycle;
pub mod monitor;
pub mod signals;
pub mod start;
pub mod trajectory;

pub use assets::{datum_id, AssetDocumentSynthesizer};
pub use coordinator::{
    AssetMode, FlyScanCoordinator, FlyerOptions, FlyerVariant, ScanState, DEFAULT_READ_TIMEOUT,
    FILESTORE_MARKER, PRIMARY_STREAM,
};
pub use events::{EventSequence, FlyEvent};
pub use lifecycle::AcquisitionLifecycle;
pub use monitor::ExternalScanMonitor;
pub use signals::{DetectorSignals, FlyerSignals, SignalPair, StageSignal, HXN_CONTROLLER_PREFIX};
pub use start::{SettleStep, StartCommand, StartFakeScan, StartScan};
pub use trajectory::{interpolate, FrameGeometry, GridPoint, TrajectoryConfig, TrajectoryInfo};
