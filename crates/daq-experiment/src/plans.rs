//! The `fly_scan` plan.
//!
//! [`FlyScanRunner`] owns one [`FlyScanCoordinator`] and runs a complete
//! raster with it: trajectory setpoints, detector exposure, the fly protocol
//! and the run's documents.
//!
//! # Document order
//!
//! ```text
//! Start → Descriptor(primary) → Resource → Datum × N → Event × N → Stop
//! ```
//!
//! The flyer is always unstaged before `Stop` is emitted, whatever happened
//! in between.
//!
//! # Usage
//!
//! ```rust,ignore
//! let runner = FlyScanRunner::new(flyer, FlyScanTimeouts::default());
//! let mut docs = runner.subscribe();
//!
//! let summary = runner
//!     .run(FlyScanRequest::new((0.0, 0.1, 50), (0.0, 0.1, 4), 0.01).with_trigger_rate(5.0))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use daq_core::capabilities::Settable;
use daq_core::error::{FlyResult, FlyScanError};
use daq_core::experiment::document::{DescriptorDoc, Document, StartDoc, StopDoc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::flyer::{FlyScanCoordinator, ScanState, SettleStep, PRIMARY_STREAM};

/// Default trigger rate of the HXN controller, in Hz.
pub const DEFAULT_TRIGGER_RATE: f64 = 7.0;

/// Parameters of one fly scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlyScanRequest {
    /// Fast axis start position
    pub x_start: f64,
    /// Fast axis stop position
    pub x_stop: f64,
    /// Points per row
    pub nx: usize,
    /// Slow axis start position
    pub y_start: f64,
    /// Slow axis stop position
    pub y_stop: f64,
    /// Number of rows
    pub ny: usize,
    /// Detector exposure per frame, seconds
    pub exp_time: f64,
    /// Controller trigger rate, Hz
    #[serde(default = "default_trigger_rate")]
    pub trigger_rate: f64,
    /// Copied into the `Start` document
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_trigger_rate() -> f64 {
    DEFAULT_TRIGGER_RATE
}

impl FlyScanRequest {
    /// `(start, stop, points)` for x and y.
    pub fn new(x: (f64, f64, usize), y: (f64, f64, usize), exp_time: f64) -> Self {
        Self {
            x_start: x.0,
            x_stop: x.1,
            nx: x.2,
            y_start: y.0,
            y_stop: y.1,
            ny: y.2,
            exp_time,
            trigger_rate: DEFAULT_TRIGGER_RATE,
            metadata: HashMap::new(),
        }
    }

    /// Override the default trigger rate.
    pub fn with_trigger_rate(mut self, trigger_rate: f64) -> Self {
        self.trigger_rate = trigger_rate;
        self
    }

    /// Add a `Start` document metadata entry.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Total number of points, saturating on overflow (rejected by `validate`).
    pub fn num_points(&self) -> usize {
        self.nx.saturating_mul(self.ny)
    }

    /// Plan type recorded in the `Start` document.
    pub fn plan_type(&self) -> &str {
        "fly_scan"
    }

    /// Human-readable plan name.
    pub fn plan_name(&self) -> &str {
        "Fly Scan"
    }

    /// Request parameters as `Start` document plan arguments.
    pub fn plan_args(&self) -> HashMap<String, String> {
        let mut args = HashMap::new();
        args.insert("x_start".to_string(), self.x_start.to_string());
        args.insert("x_stop".to_string(), self.x_stop.to_string());
        args.insert("nx".to_string(), self.nx.to_string());
        args.insert("y_start".to_string(), self.y_start.to_string());
        args.insert("y_stop".to_string(), self.y_stop.to_string());
        args.insert("ny".to_string(), self.ny.to_string());
        args.insert("exp_time".to_string(), self.exp_time.to_string());
        args.insert("trigger_rate".to_string(), self.trigger_rate.to_string());
        args
    }

    /// Reject requests the controller could not run.
    pub fn validate(&self) -> FlyResult<()> {
        if self.nx < 1 || self.ny < 1 {
            return Err(FlyScanError::InvalidTrajectory(format!(
                "point counts must be at least 1 (nx={}, ny={})",
                self.nx, self.ny
            )));
        }
        if self.nx.checked_mul(self.ny).is_none() {
            return Err(FlyScanError::InvalidTrajectory(format!(
                "raster of {} x {} points overflows the point counter",
                self.nx, self.ny
            )));
        }
        let bounds = [self.x_start, self.x_stop, self.y_start, self.y_stop];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(FlyScanError::InvalidTrajectory(format!(
                "axis bounds must be finite: {:?}",
                bounds
            )));
        }
        if !(self.exp_time.is_finite() && self.exp_time > 0.0) {
            return Err(FlyScanError::InvalidTrajectory(format!(
                "exposure time must be positive, got {}",
                self.exp_time
            )));
        }
        if !(self.trigger_rate.is_finite() && self.trigger_rate > 0.0) {
            return Err(FlyScanError::InvalidTrajectory(format!(
                "trigger rate must be positive, got {}",
                self.trigger_rate
            )));
        }
        Ok(())
    }
}

/// Bounds applied by the runner around the flyer's open-ended phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlyScanTimeouts {
    /// Trajectory readbacks must match the setpoints within this
    pub settle: Duration,
    /// `kickoff()` must resolve within this (`ScanNeverStarted`)
    pub start: Duration,
    /// `complete()` must resolve within this (`ScanNeverCompleted`)
    pub complete: Duration,
}

impl Default for FlyScanTimeouts {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            start: Duration::from_secs(30),
            complete: Duration::from_secs(3600),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlyScanSummary {
    /// Uid of the run's `Start` document
    pub run_uid: String,
    /// Events emitted, `nx * ny` for a successful run
    pub num_events: u64,
}

/// Documents buffered per subscriber before the runner waits for it.
pub const DOCUMENT_BUFFER: usize = 1024;

/// Runs fly scans and delivers their documents to every subscriber.
pub struct FlyScanRunner {
    coordinator: Arc<Mutex<FlyScanCoordinator>>,
    timeouts: FlyScanTimeouts,
    subscribers: parking_lot::Mutex<Vec<mpsc::Sender<Document>>>,
}

impl std::fmt::Debug for FlyScanRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlyScanRunner")
            .field("timeouts", &self.timeouts)
            .field("subscribers", &self.subscribers.lock().len())
            .finish_non_exhaustive()
    }
}

/// Unstages the flyer when a run is dropped between staging and teardown.
///
/// Must be declared before the coordinator lock is taken so that the lock is
/// released first when the run future is dropped.
struct TeardownOnDrop {
    coordinator: Arc<Mutex<FlyScanCoordinator>>,
    armed: bool,
}

impl Drop for TeardownOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // A queued run owns the lock next and recovers the flyer itself
        let Ok(mut flyer) = self.coordinator.clone().try_lock_owned() else {
            warn!("Run dropped mid-scan, flyer left to the next run");
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(flyer = %flyer.name(), "Run dropped outside a runtime, flyer left staged");
            return;
        };
        handle.spawn(async move {
            warn!(flyer = %flyer.name(), state = %flyer.state(), "Run dropped mid-scan, unstaging");
            if let Err(e) = flyer.unstage().await {
                warn!(flyer = %flyer.name(), error = %e, "Unstage after dropped run failed");
            }
        });
    }
}

impl FlyScanRunner {
    /// Runner owning `coordinator`.
    pub fn new(coordinator: FlyScanCoordinator, timeouts: FlyScanTimeouts) -> Self {
        Self {
            coordinator: Arc::new(Mutex::new(coordinator)),
            timeouts,
            subscribers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the document stream.
    ///
    /// Every document of every later run is delivered in order. The runner
    /// waits on a subscriber whose buffer of [`DOCUMENT_BUFFER`] documents is
    /// full, so a subscriber must keep reading or be dropped.
    pub fn subscribe(&self) -> mpsc::Receiver<Document> {
        let (tx, rx) = mpsc::channel(DOCUMENT_BUFFER);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Bounds applied around settle, kickoff and complete.
    pub fn timeouts(&self) -> FlyScanTimeouts {
        self.timeouts
    }

    /// Current state of the owned flyer.
    pub async fn state(&self) -> ScanState {
        self.coordinator.lock().await.state()
    }

    /// Run one fly scan.
    ///
    /// Failures before `Start` (invalid request, setpoints that never settle)
    /// emit no documents. Once `Start` is out, every run ends with `Stop`.
    /// Dropping the returned future after staging still unstages the flyer.
    pub async fn run(&self, request: FlyScanRequest) -> FlyResult<FlyScanSummary> {
        request.validate()?;
        let mut teardown = TeardownOnDrop {
            coordinator: self.coordinator.clone(),
            armed: false,
        };
        let mut flyer = self.coordinator.lock().await;

        if flyer.state() != ScanState::Idle {
            // Left behind by a run dropped while another was queued
            warn!(flyer = %flyer.name(), state = %flyer.state(), "Recovering flyer left armed");
            if let Err(e) = flyer.unstage().await {
                warn!(flyer = %flyer.name(), error = %e, "Recovery unstage failed");
            }
        }

        self.prepare(&flyer, &request).await?;

        let mut start_doc = StartDoc::new(request.plan_type(), request.plan_name())
            .with_hint("x")
            .with_hint("y");
        start_doc.plan_args = request.plan_args();
        start_doc.metadata = request.metadata.clone();
        let run_uid = start_doc.uid.clone();
        info!(run_uid = %run_uid, nx = request.nx, ny = request.ny, "Fly scan started");
        self.emit_document(Document::Start(start_doc)).await;

        let mut num_events = 0u64;
        teardown.armed = true;
        let flown = self.fly(&mut flyer, &run_uid, &mut num_events).await;
        let unstaged = flyer.unstage().await;
        teardown.armed = false;

        let outcome = match (flown, unstaged) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unstage_error)) => {
                warn!(run_uid = %run_uid, error = %unstage_error, "Unstage failed after aborted scan");
                Err(e)
            }
        };

        let stop_doc = match &outcome {
            Ok(()) => StopDoc::success(&run_uid, num_events),
            Err(e) => {
                error!(run_uid = %run_uid, error = %e, "Fly scan failed");
                StopDoc::fail(&run_uid, &e.to_string(), num_events)
            }
        };
        self.emit_document(Document::Stop(stop_doc)).await;

        info!(run_uid = %run_uid, num_events, success = outcome.is_ok(), "Fly scan finished");
        outcome.map(|()| FlyScanSummary {
            run_uid,
            num_events,
        })
    }

    /// Write the trajectory and exposure, then wait for the readbacks.
    async fn prepare(&self, flyer: &FlyScanCoordinator, request: &FlyScanRequest) -> FlyResult<()> {
        let controller = flyer.controller();
        let signals = flyer.signals();
        let targets = [
            (&signals.x_start, json!(request.x_start)),
            (&signals.x_stop, json!(request.x_stop)),
            (&signals.nx, json!(request.nx)),
            (&signals.y_start, json!(request.y_start)),
            (&signals.y_stop, json!(request.y_stop)),
            (&signals.ny, json!(request.ny)),
            (&signals.trigger_rate, json!(request.trigger_rate)),
        ];

        for (pair, value) in &targets {
            debug!(signal = %pair.setpoint, %value, "Writing trajectory setpoint");
            controller
                .set_value(&pair.setpoint, value.clone())
                .await
                .map_err(|e| FlyScanError::hardware(format!("set {}", pair.setpoint), e))?;
        }
        for (pair, value) in targets {
            SettleStep::new("trajectory", &pair.readback, value, self.timeouts.settle)
                .wait(controller.as_ref())
                .await
                .map_err(|e| FlyScanError::hardware(format!("verify {}", pair.readback), e))?;
        }

        let detector = flyer.detector();
        let camera = &signals.detector;
        detector
            .set_value(&camera.acquire_time, json!(request.exp_time))
            .await
            .map_err(|e| FlyScanError::hardware(format!("set {}", camera.acquire_time), e))?;
        detector
            .set_value(&camera.num_images, json!(request.num_points()))
            .await
            .map_err(|e| FlyScanError::hardware(format!("set {}", camera.num_images), e))?;
        Ok(())
    }

    async fn fly(
        &self,
        flyer: &mut FlyScanCoordinator,
        run_uid: &str,
        num_events: &mut u64,
    ) -> FlyResult<()> {
        flyer.stage().await?;

        timeout(self.timeouts.start, flyer.kickoff())
            .await
            .map_err(|_| FlyScanError::ScanNeverStarted(self.timeouts.start))??;
        timeout(self.timeouts.complete, flyer.complete())
            .await
            .map_err(|_| FlyScanError::ScanNeverCompleted(self.timeouts.complete))??;

        let data_keys = flyer
            .describe_collect()?
            .remove(PRIMARY_STREAM)
            .unwrap_or_default();
        let descriptor = DescriptorDoc::new(run_uid, PRIMARY_STREAM).with_data_keys(data_keys);
        let descriptor_uid = descriptor.uid.clone();
        self.emit_document(Document::Descriptor(descriptor)).await;

        for doc in flyer.collect_assets().await? {
            let doc = match doc {
                Document::Resource(resource) => Document::Resource(resource.with_run_start(run_uid)),
                other => other,
            };
            self.emit_document(doc).await;
        }

        for event in flyer.collect()? {
            self.emit_document(Document::Event(event.into_event_doc(run_uid, &descriptor_uid)))
                .await;
            *num_events += 1;
        }
        Ok(())
    }

    /// Deliver `doc` to every subscriber, waiting on full buffers.
    async fn emit_document(&self, doc: Document) {
        debug!(doc_type = doc.kind(), uid = %doc.uid(), "Emitting document");

        let subscribers = self.subscribers.lock().clone();
        let mut closed = false;
        for tx in &subscribers {
            closed |= tx.send(doc.clone()).await.is_err();
        }
        if closed {
            self.subscribers.lock().retain(|tx| !tx.is_closed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let ok = FlyScanRequest::new((0.0, 0.1, 50), (0.0, 0.1, 4), 0.01);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.num_points(), 200);

        let empty = FlyScanRequest::new((0.0, 0.1, 0), (0.0, 0.1, 4), 0.01);
        assert!(matches!(empty.validate(), Err(FlyScanError::InvalidTrajectory(_))));

        let no_exposure = FlyScanRequest::new((0.0, 0.1, 2), (0.0, 0.1, 2), 0.0);
        assert!(no_exposure.validate().is_err());

        let stalled = ok.clone().with_trigger_rate(0.0);
        assert!(stalled.validate().is_err());

        let huge = FlyScanRequest::new((0.0, 0.1, usize::MAX), (0.0, 0.1, 3), 0.01);
        assert!(matches!(huge.validate(), Err(FlyScanError::InvalidTrajectory(_))));
    }

    #[test]
    fn test_plan_args() {
        let request = FlyScanRequest::new((0.0, 0.5, 5), (1.0, 2.0, 3), 0.1)
            .with_trigger_rate(5.0)
            .with_metadata("sample", "Au foil");
        let args = request.plan_args();
        assert_eq!(request.plan_type(), "fly_scan");
        assert_eq!(args["nx"], "5");
        assert_eq!(args["y_stop"], "2");
        assert_eq!(args["trigger_rate"], "5");
        assert_eq!(request.metadata["sample"], "Au foil");
    }

    #[test]
    fn test_request_deserializes_with_default_rate() {
        let request: FlyScanRequest = serde_json::from_value(json!({
            "x_start": 0.0, "x_stop": 1.0, "nx": 2,
            "y_start": 0.0, "y_stop": 1.0, "ny": 2,
            "exp_time": 0.05
        }))
        .unwrap();
        assert_eq!(request.trigger_rate, DEFAULT_TRIGGER_RATE);
        assert!(request.metadata.is_empty());
    }
}
