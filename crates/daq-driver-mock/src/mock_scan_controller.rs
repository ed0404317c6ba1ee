//! Simulated HXN motion controller.
//!
//! Holds the trajectory setpoint/readback pairs, the `SetScanning` flag and the
//! read-only `ScanInProgress` indicator. Writing a start command (`StartScan.PROC`
//! or `StartFakeScan.PROC`) while `SetScanning` is set spawns a simulated raster:
//! `ScanInProgress` rises after the start latency, stays high for
//! `nx * ny / trigger_rate` seconds (zero in [`MockMode::Instant`]) and falls
//! again. The write itself is acknowledged immediately, like a `.PROC` put.

use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig};
use crate::signal_bus::MockSignalBus;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use daq_core::capabilities::{MonitorReceiver, Settable, Watchable, value_as_bool, value_as_f64};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const DRIVER_TYPE: &str = "mock_scan_controller";

/// Signal names served by the simulated controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanControllerSignals {
    pub scan_in_progress: String,
    pub set_scanning: String,
    pub start_scan: String,
    pub start_fake_scan: String,
    /// (setpoint, readback) pairs in x_start, x_stop, nx, y_start, y_stop, ny,
    /// trigger_rate order
    pub x_start: (String, String),
    pub x_stop: (String, String),
    pub nx: (String, String),
    pub y_start: (String, String),
    pub y_stop: (String, String),
    pub ny: (String, String),
    pub trigger_rate: (String, String),
}

impl ScanControllerSignals {
    /// PV names of the HXN DeltaTau motion controller.
    pub fn hxn() -> Self {
        Self::with_prefix("XF:03IDC-CT{MC:01}")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let pv = |suffix: &str| format!("{prefix}{suffix}");
        let pair = |name: &str| (pv(name), pv(&format!("{name}-RB")));
        Self {
            scan_in_progress: pv("ScanInProgress"),
            set_scanning: pv("SetScanning"),
            start_scan: pv("StartScan.PROC"),
            start_fake_scan: pv("StartFakeScan.PROC"),
            x_start: pair("XStart"),
            x_stop: pair("XStop"),
            nx: pair("NX"),
            y_start: pair("YStart"),
            y_stop: pair("YStop"),
            ny: pair("NY"),
            trigger_rate: pair("TriggerRate"),
        }
    }

    fn setpoints(&self) -> [(&(String, String), Value); 7] {
        [
            (&self.x_start, json!(0.0)),
            (&self.x_stop, json!(0.0)),
            (&self.nx, json!(1)),
            (&self.y_start, json!(0.0)),
            (&self.y_stop, json!(0.0)),
            (&self.ny, json!(1)),
            (&self.trigger_rate, json!(7.0)),
        ]
    }
}

impl Default for ScanControllerSignals {
    fn default() -> Self {
        Self::hxn()
    }
}

/// How the simulated controller reacts to a start command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanBehavior {
    /// Raise and lower `ScanInProgress` as a real raster would
    #[default]
    Normal,
    /// Acknowledge the start command but never raise `ScanInProgress`
    NeverStart,
    /// Raise `ScanInProgress` and leave it high
    NeverStop,
}

/// Simulated motion controller implementing `Settable + Watchable`.
pub struct MockScanController {
    bus: Arc<MockSignalBus>,
    signals: ScanControllerSignals,
    behavior: ScanBehavior,
    rng: Arc<MockRng>,
    scans_started: Arc<AtomicU64>,
    active_scan: Mutex<Option<JoinHandle<()>>>,
}

impl MockScanController {
    /// Controller with HXN signal names, instant timing and no errors.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MockScanControllerBuilder {
        MockScanControllerBuilder::default()
    }

    pub fn signals(&self) -> &ScanControllerSignals {
        &self.signals
    }

    /// Underlying signal store, for test inspection.
    pub fn bus(&self) -> &MockSignalBus {
        &self.bus
    }

    /// Number of simulated rasters that have been started.
    pub fn scans_started(&self) -> u64 {
        self.scans_started.load(Ordering::SeqCst)
    }

    pub fn scan_in_progress(&self) -> bool {
        self.bus
            .peek(&self.signals.scan_in_progress)
            .as_ref()
            .and_then(value_as_bool)
            .unwrap_or(false)
    }

    fn is_start_command(&self, name: &str) -> bool {
        name == self.signals.start_scan || name == self.signals.start_fake_scan
    }

    fn readback_f64(&self, pair: &(String, String)) -> f64 {
        self.bus
            .peek(&pair.1)
            .as_ref()
            .and_then(value_as_f64)
            .unwrap_or(0.0)
    }

    /// Nominal raster duration from the readbacks.
    fn scan_duration(&self) -> Duration {
        let points = self.readback_f64(&self.signals.nx).max(1.0)
            * self.readback_f64(&self.signals.ny).max(1.0);
        let rate = self.readback_f64(&self.signals.trigger_rate);
        if rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(points / rate).unwrap_or(Duration::MAX)
    }

    fn launch_scan(&self, command: &str) {
        let armed = self
            .bus
            .peek(&self.signals.set_scanning)
            .as_ref()
            .and_then(value_as_bool)
            .unwrap_or(false);
        if !armed {
            tracing::warn!(command, "Start command ignored: SetScanning is not set");
            return;
        }
        if self.behavior == ScanBehavior::NeverStart {
            tracing::debug!(command, "Start command acknowledged, scan withheld");
            return;
        }

        let mode = self.bus.mode();
        let timing = self.bus.timing();
        let mut latency = mode.delay(timing.start_latency());
        if mode.is_chaotic() {
            latency += self.rng.jitter(timing.start_latency());
        }
        let hold = mode.delay(self.scan_duration());
        let bus = self.bus.clone();
        let in_progress = self.signals.scan_in_progress.clone();
        let behavior = self.behavior;
        let run = self.scans_started.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(run, ?latency, ?hold, "Simulated raster started");

        let handle = tokio::spawn(async move {
            sleep(latency).await;
            if bus.force(&in_progress, json!(1)).is_err() {
                return;
            }
            if behavior == ScanBehavior::NeverStop {
                return;
            }
            sleep(hold).await;
            let _ = bus.force(&in_progress, json!(0));
            tracing::info!(run, "Simulated raster finished");
        });

        if let Some(previous) = self.active_scan.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Default for MockScanController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockScanController {
    fn drop(&mut self) {
        if let Some(handle) = self.active_scan.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for MockScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockScanController")
            .field("behavior", &self.behavior)
            .field("scans_started", &self.scans_started())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Settable for MockScanController {
    async fn set_value(&self, name: &str, value: Value) -> Result<()> {
        self.bus.write(name, value.clone()).await?;
        if self.is_start_command(name) && value_as_bool(&value).unwrap_or(false) {
            self.launch_scan(name);
            // .PROC fields read back as 0 once processed
            self.bus.force(name, json!(0))?;
        }
        Ok(())
    }

    async fn get_value(&self, name: &str) -> Result<Value> {
        self.bus.read(name).await
    }
}

#[async_trait]
impl Watchable for MockScanController {
    async fn monitor(&self, name: &str) -> Result<MonitorReceiver> {
        self.bus.subscribe(name).await
    }
}

/// Builder for [`MockScanController`].
#[derive(Debug, Default)]
pub struct MockScanControllerBuilder {
    signals: ScanControllerSignals,
    mode: MockMode,
    timing: Option<TimingConfig>,
    errors: ErrorConfig,
    behavior: ScanBehavior,
    seed: Option<u64>,
}

impl MockScanControllerBuilder {
    pub fn signals(mut self, signals: ScanControllerSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn behavior(mut self, behavior: ScanBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> MockScanController {
        let bus = MockSignalBus::new(DRIVER_TYPE)
            .with_mode(self.mode)
            .with_timing(self.timing.unwrap_or_else(TimingConfig::scan_controller))
            .with_errors(self.errors);

        for (pair, initial) in self.signals.setpoints() {
            bus.add_setpoint(&pair.0, &pair.1, initial);
        }
        // Point counts and rate are bounded below by the controller record
        for (setpoint, _) in [&self.signals.nx, &self.signals.ny, &self.signals.trigger_rate] {
            if let Some(signal) = bus.signal(setpoint) {
                let name = setpoint.clone();
                signal.with_validator(move |value: &Value| match value_as_f64(value) {
                    Some(v) if v > 0.0 => Ok(()),
                    _ => Err(anyhow!("{name} must be positive, got {value}")),
                });
            }
        }
        bus.add_read_only(&self.signals.scan_in_progress, json!(0));
        bus.add_signal(&self.signals.set_scanning, json!(0));
        bus.add_signal(&self.signals.start_scan, json!(0));
        bus.add_signal(&self.signals.start_fake_scan, json!(0));

        MockScanController {
            bus: Arc::new(bus),
            signals: self.signals,
            behavior: self.behavior,
            rng: Arc::new(MockRng::new(self.seed)),
            scans_started: Arc::new(AtomicU64::new(0)),
            active_scan: Mutex::new(None),
        }
    }
}
