//! FlyScanCoordinator - the fly protocol state machine
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ stage() ┌────────┐ kickoff() ┌───────┐ start seen ┌──────────┐
//! │ Idle │────────▶│ Staged │──────────▶│ Armed │───────────▶│ Scanning │
//! └──────┘         └────────┘           └───────┘            └────┬─────┘
//!    ▲                                                  complete() │ stop seen
//!    │                                                             ▼
//!    │    unstage()   ┌───────────┐  collect_assets()     ┌────────────┐
//!    └────────────────│ Collected │◀──────────────────────│ Completing │
//!     (from any state)└───────────┘                       └────────────┘
//! ```
//!
//! Any failed phase moves the coordinator to `Faulted`; only `unstage()` is
//! accepted from there. `unstage()` always ends in `Idle`.
//!
//! The controller runs the raster on its own clock. The coordinator captures
//! the trajectory at kickoff, watches `ScanInProgress` for the start and stop
//! edges, and afterwards derives one datum and one event per point from the
//! captured trajectory.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut flyer = FlyScanCoordinator::new("flyer", controller, detector, FlyerSignals::hxn());
//!
//! flyer.stage().await?;
//! timeout(start_timeout, flyer.kickoff()).await??;
//! flyer.complete().await?;
//! let asset_docs = flyer.collect_assets().await?;
//! for event in flyer.collect()? {
//!     println!("{} -> ({}, {})", event.seq_num, event.x, event.y);
//! }
//! flyer.unstage().await?;
//! ```

use daq_core::capabilities::{AreaDetector, AssetProducer, ScanController, Settable};
use daq_core::error::{FlyResult, FlyScanError};
use daq_core::experiment::document::{DataKey, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::assets::AssetDocumentSynthesizer;
use super::events::EventSequence;
use super::lifecycle::AcquisitionLifecycle;
use super::monitor::ExternalScanMonitor;
use super::signals::FlyerSignals;
use super::start::{StartCommand, StartFakeScan, StartScan};
use super::trajectory::{FrameGeometry, TrajectoryConfig, TrajectoryInfo};

/// Default bound on each trajectory readback.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the event stream produced by `collect()`.
pub const PRIMARY_STREAM: &str = "primary";

/// External storage marker for the image field.
pub const FILESTORE_MARKER: &str = "FILESTORE:";

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Ready to stage
    Idle,
    /// Detector armed, trigger source not yet started
    Staged,
    /// Start command issued, waiting for the external start
    Armed,
    /// External raster running
    Scanning,
    /// External raster finished, assets not yet collected
    Completing,
    /// Datums generated, events may be taken
    Collected,
    /// Teardown in progress
    Unstaged,
    /// A phase failed; only `unstage()` is accepted
    Faulted,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Staged => write!(f, "staged"),
            ScanState::Armed => write!(f, "armed"),
            ScanState::Scanning => write!(f, "scanning"),
            ScanState::Completing => write!(f, "completing"),
            ScanState::Collected => write!(f, "collected"),
            ScanState::Unstaged => write!(f, "unstaged"),
            ScanState::Faulted => write!(f, "faulted"),
        }
    }
}

/// How image references are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetMode {
    /// Read the resource back and generate one datum per point
    #[default]
    Synthesized,
    /// No resource or datums; events carry positions only
    Skipped,
}

/// Which start command the coordinator issues at kickoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlyerVariant {
    /// `StartScan`: the controller drives the real raster
    #[default]
    Hardware,
    /// `StartFakeScan`: the controller simulates the raster without motion
    Fake,
}

/// Per-deployment behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyerOptions {
    /// Read the detector array size at kickoff
    pub capture_geometry: bool,
    /// Whether a resource and datums are produced
    pub asset_mode: AssetMode,
    /// Start command issued at kickoff
    pub variant: FlyerVariant,
}

impl Default for FlyerOptions {
    fn default() -> Self {
        Self {
            capture_geometry: true,
            asset_mode: AssetMode::Synthesized,
            variant: FlyerVariant::Hardware,
        }
    }
}

/// Everything owned by one scan. Replaced wholesale at kickoff and unstage.
#[derive(Debug, Default)]
struct ScanContext {
    trajectory: Option<TrajectoryInfo>,
    geometry: Option<FrameGeometry>,
    monitor: Option<ExternalScanMonitor>,
    synthesizer: AssetDocumentSynthesizer,
    datum_ids: Vec<String>,
    events_taken: bool,
}

/// Drives one externally timed raster scan through the fly protocol.
pub struct FlyScanCoordinator {
    name: String,
    controller: Arc<dyn ScanController>,
    lifecycle: AcquisitionLifecycle,
    signals: FlyerSignals,
    start: Box<dyn StartCommand>,
    options: FlyerOptions,
    read_timeout: Duration,
    state: ScanState,
    scan: ScanContext,
}

impl std::fmt::Debug for FlyScanCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlyScanCoordinator")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("start", &self.start)
            .field("options", &self.options)
            .field("trajectory", &self.scan.trajectory)
            .finish()
    }
}

impl FlyScanCoordinator {
    /// Coordinator that starts the hardware raster.
    pub fn new(
        name: &str,
        controller: Arc<dyn ScanController>,
        detector: Arc<dyn AreaDetector>,
        signals: FlyerSignals,
    ) -> Self {
        let start = Box::new(StartScan::new(signals.start_scan.clone()));
        Self {
            name: name.to_string(),
            controller,
            lifecycle: AcquisitionLifecycle::new(detector, signals.detector.clone()),
            signals,
            start,
            options: FlyerOptions::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            state: ScanState::Idle,
            scan: ScanContext::default(),
        }
    }

    /// Coordinator that starts the controller's simulated raster.
    pub fn fake(
        name: &str,
        controller: Arc<dyn ScanController>,
        detector: Arc<dyn AreaDetector>,
        signals: FlyerSignals,
    ) -> Self {
        let command = StartFakeScan::new(signals.start_fake_scan.clone());
        let mut flyer = Self::new(name, controller, detector, signals)
            .with_start_command(Box::new(command));
        flyer.options.variant = FlyerVariant::Fake;
        flyer
    }

    /// Replace the start command issued at kickoff.
    pub fn with_start_command(mut self, command: Box<dyn StartCommand>) -> Self {
        self.start = command;
        self
    }

    /// Set the behaviour switches. The start command is left as constructed.
    pub fn with_options(mut self, options: FlyerOptions) -> Self {
        self.options = options;
        self
    }

    /// Bound on each trajectory and array-size readback.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Flyer name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current protocol state.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Behaviour switches in effect.
    pub fn options(&self) -> &FlyerOptions {
        &self.options
    }

    /// Controller and detector signal names.
    pub fn signals(&self) -> &FlyerSignals {
        &self.signals
    }

    /// Command issued at kickoff.
    pub fn start_command(&self) -> &dyn StartCommand {
        self.start.as_ref()
    }

    /// Trajectory captured by the last kickoff of the current scan.
    pub fn trajectory(&self) -> Option<&TrajectoryInfo> {
        self.scan.trajectory.as_ref()
    }

    /// Detector array size captured at kickoff, if enabled.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.scan.geometry
    }

    /// Motion controller running the raster.
    pub fn controller(&self) -> &Arc<dyn ScanController> {
        &self.controller
    }

    /// Area detector writing the frames.
    pub fn detector(&self) -> &Arc<dyn AreaDetector> {
        self.lifecycle.detector()
    }

    fn require(&self, operation: &'static str, allowed: &[ScanState]) -> FlyResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(FlyScanError::InvalidTransition {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Record the outcome of a phase: `next` on success, `Faulted` on error.
    fn finish_phase<T>(&mut self, phase: &str, result: FlyResult<T>, next: ScanState) -> FlyResult<T> {
        match &result {
            Ok(_) => {
                debug!(flyer = %self.name, from = %self.state, to = %next, "Transition");
                self.state = next;
            }
            Err(e) => {
                warn!(flyer = %self.name, phase, error = %e, "Phase failed");
                self.state = ScanState::Faulted;
            }
        }
        result
    }

    /// Arm the detector. Valid only from `Idle`.
    pub async fn stage(&mut self) -> FlyResult<()> {
        self.require("stage", &[ScanState::Idle])?;
        info!(flyer = %self.name, "Staging");
        let result = self.lifecycle.stage().await;
        self.finish_phase("stage", result, ScanState::Staged)
    }

    /// Start the external raster. Valid only from `Staged`.
    ///
    /// Captures the trajectory, enables scanning, subscribes to the
    /// scan-in-progress flag and issues the start command. Resolves once the
    /// start edge has been observed and the command acknowledged, in either
    /// order. Never resolves if the scan never starts; bound it with a
    /// timeout and `unstage()` afterwards.
    pub async fn kickoff(&mut self) -> FlyResult<()> {
        self.require("kickoff", &[ScanState::Staged])?;
        self.scan = ScanContext::default();
        let result = self.arm_and_start().await;
        self.finish_phase("kickoff", result, ScanState::Scanning)
    }

    async fn arm_and_start(&mut self) -> FlyResult<()> {
        let trajectory = TrajectoryConfig::from_signals(&self.signals, self.read_timeout)
            .capture(self.controller.as_ref())
            .await?;
        let geometry = if self.options.capture_geometry {
            let detector = &self.signals.detector;
            Some(
                FrameGeometry::capture(
                    self.lifecycle.detector().as_ref(),
                    &detector.array_height,
                    &detector.array_width,
                    self.read_timeout,
                )
                .await?,
            )
        } else {
            None
        };
        info!(
            flyer = %self.name,
            nx = trajectory.nx,
            ny = trajectory.ny,
            x_start = trajectory.x_start,
            x_stop = trajectory.x_stop,
            y_start = trajectory.y_start,
            y_stop = trajectory.y_stop,
            trigger_rate = trajectory.trigger_rate,
            "Captured trajectory"
        );
        self.scan.trajectory = Some(trajectory);
        self.scan.geometry = geometry;

        self.controller
            .set_value(&self.signals.set_scanning, json!(1))
            .await
            .map_err(|e| FlyScanError::hardware(format!("set {}", self.signals.set_scanning), e))?;

        let mut monitor =
            ExternalScanMonitor::subscribe(self.controller.as_ref(), &self.signals.scan_in_progress)
                .await?;
        self.state = ScanState::Armed;

        let command = self.start.as_ref();
        let controller = self.controller.as_ref();
        info!(flyer = %self.name, command = command.name(), "Kickoff");
        tokio::try_join!(monitor.await_start(), async {
            command
                .issue(controller)
                .await
                .map_err(|e| FlyScanError::hardware(command.name(), e))
        })?;

        info!(flyer = %self.name, "External scan started");
        self.scan.monitor = Some(monitor);
        Ok(())
    }

    /// Wait for the external raster to finish. Valid only after kickoff resolved.
    pub async fn complete(&mut self) -> FlyResult<()> {
        self.require("complete", &[ScanState::Scanning])?;
        let result = match self.scan.monitor.as_mut() {
            Some(monitor) => monitor.await_stop().await,
            None => Err(FlyScanError::InvalidTransition {
                operation: "complete",
                state: self.state.to_string(),
            }),
        };
        if result.is_ok() {
            info!(flyer = %self.name, "External scan complete");
        }
        self.finish_phase("complete", result, ScanState::Completing)
    }

    /// Emit the resource followed by one datum per point.
    ///
    /// Valid in `Completing`. In skipped asset mode nothing is emitted and the
    /// state does not change. A second call for the same scan is
    /// `DuplicateSynthesis`.
    pub async fn collect_assets(&mut self) -> FlyResult<Vec<Document>> {
        if self.options.asset_mode == AssetMode::Skipped {
            self.require("collect_assets", &[ScanState::Completing])?;
            debug!(flyer = %self.name, "Asset collection skipped");
            return Ok(Vec::new());
        }
        if self.state == ScanState::Collected {
            if let Some(resource_uid) = self.scan.synthesizer.synthesized() {
                return Err(FlyScanError::DuplicateSynthesis {
                    resource_uid: resource_uid.to_string(),
                });
            }
        }
        self.require("collect_assets", &[ScanState::Completing])?;

        let result = self.synthesize_assets().await;
        self.finish_phase("collect_assets", result, ScanState::Collected)
    }

    async fn synthesize_assets(&mut self) -> FlyResult<Vec<Document>> {
        let count = self.num_points()?;
        let resource = self
            .lifecycle
            .detector()
            .collect_resource()
            .await
            .map_err(|e| FlyScanError::hardware("collect resource", e))?
            .ok_or(FlyScanError::ResourceUnavailable)?;

        let datums = self.scan.synthesizer.synthesize(&resource, count)?;
        self.scan.datum_ids = datums.iter().map(|d| d.datum_id.clone()).collect();
        info!(
            flyer = %self.name,
            resource_uid = %resource.uid,
            datums = datums.len(),
            "Synthesized asset documents"
        );

        let mut docs = Vec::with_capacity(datums.len() + 1);
        docs.push(Document::Resource(resource));
        docs.extend(datums.into_iter().map(Document::Datum));
        Ok(docs)
    }

    /// Take the event rows of the finished scan.
    ///
    /// Valid once per scan, in `Collected` (or `Completing` when asset
    /// collection is skipped).
    pub fn collect(&mut self) -> FlyResult<EventSequence> {
        let allowed: &[ScanState] = match self.options.asset_mode {
            AssetMode::Synthesized => &[ScanState::Collected],
            AssetMode::Skipped => &[ScanState::Completing, ScanState::Collected],
        };
        self.require("collect", allowed)?;
        if self.scan.events_taken {
            return Err(FlyScanError::InvalidTransition {
                operation: "collect",
                state: format!("{} (events already collected)", self.state),
            });
        }
        let Some(trajectory) = self.scan.trajectory.clone() else {
            return Err(FlyScanError::InvalidTransition {
                operation: "collect",
                state: self.state.to_string(),
            });
        };
        self.scan.events_taken = true;

        let datum_ids = std::mem::take(&mut self.scan.datum_ids);
        info!(flyer = %self.name, events = trajectory.num_points(), "Collecting events");
        Ok(match self.options.asset_mode {
            AssetMode::Synthesized => EventSequence::new(trajectory, datum_ids),
            AssetMode::Skipped => EventSequence::positions_only(trajectory),
        })
    }

    /// Data keys of the primary stream, keyed by stream name.
    ///
    /// Requires a captured trajectory.
    pub fn describe_collect(&self) -> FlyResult<HashMap<String, HashMap<String, DataKey>>> {
        let Some(trajectory) = &self.scan.trajectory else {
            return Err(FlyScanError::InvalidTransition {
                operation: "describe_collect",
                state: self.state.to_string(),
            });
        };

        let mut keys = HashMap::new();
        keys.insert(
            "x".to_string(),
            DataKey::scalar(&self.signals.x_start.readback, "").with_shape(vec![trajectory.nx]),
        );
        keys.insert(
            "y".to_string(),
            DataKey::scalar(&self.signals.y_start.readback, "").with_shape(vec![trajectory.ny]),
        );
        if self.options.asset_mode == AssetMode::Synthesized {
            let shape = self
                .scan
                .geometry
                .map(|g| vec![g.height, g.width])
                .unwrap_or_default();
            keys.insert(
                "image".to_string(),
                DataKey::array(&self.signals.detector.name, shape).external(FILESTORE_MARKER),
            );
        }

        let mut streams = HashMap::new();
        streams.insert(PRIMARY_STREAM.to_string(), keys);
        Ok(streams)
    }

    /// Disarm the detector and return to `Idle`. Accepted from any state.
    ///
    /// The state is `Idle` afterwards even if a teardown step failed; that
    /// failure is returned after every step has been attempted.
    pub async fn unstage(&mut self) -> FlyResult<()> {
        info!(flyer = %self.name, from = %self.state, "Unstaging");
        self.state = ScanState::Unstaged;
        let result = self.lifecycle.unstage().await;
        self.scan = ScanContext::default();
        self.state = ScanState::Idle;
        if let Err(e) = &result {
            warn!(flyer = %self.name, error = %e, "Unstage finished with errors");
        }
        result
    }

    fn num_points(&self) -> FlyResult<usize> {
        self.scan
            .trajectory
            .as_ref()
            .map(TrajectoryInfo::num_points)
            .ok_or_else(|| FlyScanError::InvalidTransition {
                operation: "collect_assets",
                state: self.state.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_driver_mock::{MockAreaDetector, MockScanController};

    fn flyer() -> FlyScanCoordinator {
        FlyScanCoordinator::new(
            "flyer",
            Arc::new(MockScanController::default()),
            Arc::new(MockAreaDetector::default()),
            FlyerSignals::hxn(),
        )
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ScanState::Completing.to_string(), "completing");
        assert_eq!(ScanState::Faulted.to_string(), "faulted");
    }

    #[test]
    fn test_options_deserialize_lowercase() {
        let options: FlyerOptions = serde_json::from_value(json!({
            "asset_mode": "skipped",
            "variant": "fake"
        }))
        .unwrap();
        assert_eq!(options.asset_mode, AssetMode::Skipped);
        assert_eq!(options.variant, FlyerVariant::Fake);
        assert!(options.capture_geometry);
    }

    #[tokio::test]
    async fn test_phases_out_of_order_are_rejected() {
        let mut flyer = flyer();
        for err in [
            flyer.kickoff().await.unwrap_err(),
            flyer.complete().await.unwrap_err(),
            flyer.collect_assets().await.unwrap_err(),
            flyer.collect().unwrap_err(),
        ] {
            assert!(matches!(err, FlyScanError::InvalidTransition { .. }), "{err}");
        }
        assert_eq!(flyer.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_restage_requires_unstage() {
        let mut flyer = flyer();
        flyer.stage().await.unwrap();
        let err = flyer.stage().await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot stage while flyer is staged");

        flyer.unstage().await.unwrap();
        flyer.stage().await.unwrap();
        flyer.unstage().await.unwrap();
    }

    #[tokio::test]
    async fn test_describe_collect_needs_trajectory() {
        let flyer = flyer();
        assert!(flyer.describe_collect().is_err());
    }

    #[test]
    fn test_fake_variant_uses_fake_start_command() {
        let flyer = FlyScanCoordinator::fake(
            "fake_flyer",
            Arc::new(MockScanController::default()),
            Arc::new(MockAreaDetector::default()),
            FlyerSignals::hxn(),
        );
        assert_eq!(flyer.options().variant, FlyerVariant::Fake);
        assert_eq!(
            flyer.start_command().name(),
            "XF:03IDC-CT{MC:01}StartFakeScan.PROC"
        );
    }
}
