//! Simulated area detector with a TIFF file-store plugin.
//!
//! Staging allocates a fresh `AD_TIFF` resource under a dated write path, the
//! way an areaDetector TIFF plugin with file-store support does. Frames are
//! never produced in memory; the resource is all a fly scan needs.

use crate::common::{ErrorConfig, MockMode, TimingConfig};
use crate::signal_bus::MockSignalBus;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use daq_core::capabilities::{AssetProducer, MonitorReceiver, Settable, Stageable, Watchable};
use daq_core::experiment::document::{ResourceDoc, new_uid};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const DRIVER_TYPE: &str = "mock_area_detector";

/// Detector signal names (relative to the detector, as in ophyd component paths).
pub mod signals {
    pub const IMAGE_MODE: &str = "cam.image_mode";
    pub const TRIGGER_MODE: &str = "cam.trigger_mode";
    pub const ACQUIRE: &str = "cam.acquire";
    pub const ACQUIRE_TIME: &str = "cam.acquire_time";
    pub const NUM_IMAGES: &str = "cam.num_images";
    pub const ARRAY_HEIGHT: &str = "tiff.array_size.height";
    pub const ARRAY_WIDTH: &str = "tiff.array_size.width";
}

/// Configuration for [`MockAreaDetector`].
#[derive(Debug, Clone)]
pub struct MockAreaDetectorConfig {
    /// Device name, used as the data source in descriptors
    pub name: String,
    /// File-store root
    pub root: String,
    /// strftime template for the directory under `root`
    pub write_path_template: String,
    /// Frame height in pixels
    pub height: u64,
    /// Frame width in pixels
    pub width: u64,
    /// Whether staging allocates a resource (turn off to simulate a misconfigured plugin)
    pub produce_resource: bool,
}

impl Default for MockAreaDetectorConfig {
    fn default() -> Self {
        Self {
            name: "merlin1".to_string(),
            root: "/DATA/cam".to_string(),
            write_path_template: "%Y/%m/%d/".to_string(),
            height: 512,
            width: 512,
            produce_resource: true,
        }
    }
}

/// Simulated externally-triggered area detector.
#[derive(Debug)]
pub struct MockAreaDetector {
    config: MockAreaDetectorConfig,
    bus: MockSignalBus,
    errors: ErrorConfig,
    staged: AtomicBool,
    resource: Mutex<Option<ResourceDoc>>,
    stage_count: AtomicU64,
    unstage_count: AtomicU64,
}

impl MockAreaDetector {
    pub fn new(config: MockAreaDetectorConfig) -> Self {
        Self::with_behavior(config, MockMode::Instant, ErrorConfig::none())
    }

    /// Detector whose signal traffic and lifecycle calls go through `errors`.
    pub fn with_behavior(config: MockAreaDetectorConfig, mode: MockMode, errors: ErrorConfig) -> Self {
        let bus = MockSignalBus::new(DRIVER_TYPE)
            .with_mode(mode)
            .with_timing(TimingConfig::area_detector())
            .with_errors(errors.clone());

        bus.add_signal(signals::IMAGE_MODE, json!("Single"));
        bus.add_signal(signals::TRIGGER_MODE, json!("Internal"));
        bus.add_signal(signals::ACQUIRE, json!(0));
        bus.add_signal(signals::ACQUIRE_TIME, json!(0.1));
        bus.add_signal(signals::NUM_IMAGES, json!(1));
        bus.add_read_only(signals::ARRAY_HEIGHT, json!(config.height));
        bus.add_read_only(signals::ARRAY_WIDTH, json!(config.width));

        Self {
            config,
            bus,
            errors,
            staged: AtomicBool::new(false),
            resource: Mutex::new(None),
            stage_count: AtomicU64::new(0),
            unstage_count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current value of a detector signal, bypassing latency and errors.
    pub fn peek(&self, name: &str) -> Option<Value> {
        self.bus.peek(name)
    }

    pub fn stage_count(&self) -> u64 {
        self.stage_count.load(Ordering::SeqCst)
    }

    pub fn unstage_count(&self) -> u64 {
        self.unstage_count.load(Ordering::SeqCst)
    }

    fn new_resource(&self) -> ResourceDoc {
        let resource_path = chrono::Local::now()
            .format(&self.config.write_path_template)
            .to_string();
        ResourceDoc::new("AD_TIFF", &self.config.root, &resource_path)
            .with_kwarg("template", json!("%s%s_%6.6d.tiff"))
            .with_kwarg("filename", json!(new_uid()))
            .with_kwarg("frame_per_point", json!(1))
    }
}

impl Default for MockAreaDetector {
    fn default() -> Self {
        Self::new(MockAreaDetectorConfig::default())
    }
}

#[async_trait]
impl Settable for MockAreaDetector {
    async fn set_value(&self, name: &str, value: Value) -> Result<()> {
        self.bus.write(name, value).await
    }

    async fn get_value(&self, name: &str) -> Result<Value> {
        self.bus.read(name).await
    }
}

#[async_trait]
impl Watchable for MockAreaDetector {
    async fn monitor(&self, name: &str) -> Result<MonitorReceiver> {
        self.bus.subscribe(name).await
    }
}

#[async_trait]
impl Stageable for MockAreaDetector {
    async fn stage(&self) -> Result<()> {
        self.errors.check_operation(DRIVER_TYPE, "stage")?;
        if self.staged.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("{} is already staged", self.config.name));
        }
        self.stage_count.fetch_add(1, Ordering::SeqCst);

        let resource = self.config.produce_resource.then(|| self.new_resource());
        if let Some(resource) = &resource {
            tracing::debug!(
                detector = %self.config.name,
                resource_uid = %resource.uid,
                path = %resource.resource_path,
                "Allocated file-store resource"
            );
        }
        *self.resource.lock() = resource;
        Ok(())
    }

    async fn unstage(&self) -> Result<()> {
        self.unstage_count.fetch_add(1, Ordering::SeqCst);
        if !self.staged.swap(false, Ordering::SeqCst) {
            tracing::debug!(detector = %self.config.name, "Unstage called while not staged");
            return Ok(());
        }
        self.errors.check_operation(DRIVER_TYPE, "unstage")?;
        self.resource.lock().take();
        Ok(())
    }

    async fn is_staged(&self) -> Result<bool> {
        Ok(self.staged.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl AssetProducer for MockAreaDetector {
    async fn collect_resource(&self) -> Result<Option<ResourceDoc>> {
        self.errors.check_operation(DRIVER_TYPE, "collect_resource")?;
        Ok(self.resource.lock().take())
    }
}
