//! Fly scans against simulated hardware.
//!
//! Builds a [`MockScanController`] serving the configured controller signal
//! names and a [`MockAreaDetector`] named after the configured detector, so a
//! complete run can be exercised without a beamline. The simulated detector
//! serves the standard areaDetector component names (`cam.acquire`, ...), so
//! detector signal overrides in the settings are not reflected here.

use std::sync::Arc;

use daq_driver_mock::{
    ErrorConfig, MockAreaDetector, MockAreaDetectorConfig, MockMode, MockScanController,
    ScanControllerSignals,
};
use daq_experiment::flyer::{FlyScanCoordinator, FlyerSignals, SignalPair};
use daq_experiment::plans::FlyScanRunner;

use crate::config::FlyScanSettings;

/// Simulated controller and detector sharing one timing mode.
#[derive(Clone)]
pub struct SimulatedBeamline {
    pub controller: Arc<MockScanController>,
    pub detector: Arc<MockAreaDetector>,
}

impl std::fmt::Debug for SimulatedBeamline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBeamline")
            .field("detector", &self.detector.name())
            .field("scans_started", &self.controller.scans_started())
            .finish_non_exhaustive()
    }
}

impl SimulatedBeamline {
    pub fn new(settings: &FlyScanSettings, mode: MockMode) -> Self {
        let controller = MockScanController::builder()
            .mode(mode)
            .signals(controller_signals(&settings.flyer))
            .build();
        let detector = MockAreaDetector::with_behavior(
            MockAreaDetectorConfig {
                name: settings.flyer.detector.name.clone(),
                ..Default::default()
            },
            mode,
            ErrorConfig::none(),
        );
        Self {
            controller: Arc::new(controller),
            detector: Arc::new(detector),
        }
    }

    pub fn flyer(&self, settings: &FlyScanSettings) -> FlyScanCoordinator {
        settings.build_flyer(self.controller.clone(), self.detector.clone())
    }

    pub fn runner(&self, settings: &FlyScanSettings) -> FlyScanRunner {
        settings.build_runner(self.controller.clone(), self.detector.clone())
    }
}

fn controller_signals(signals: &FlyerSignals) -> ScanControllerSignals {
    let pair = |p: &SignalPair| (p.setpoint.clone(), p.readback.clone());
    ScanControllerSignals {
        scan_in_progress: signals.scan_in_progress.clone(),
        set_scanning: signals.set_scanning.clone(),
        start_scan: signals.start_scan.clone(),
        start_fake_scan: signals.start_fake_scan.clone(),
        x_start: pair(&signals.x_start),
        x_stop: pair(&signals.x_stop),
        nx: pair(&signals.nx),
        y_start: pair(&signals.y_start),
        y_stop: pair(&signals.y_stop),
        ny: pair(&signals.ny),
        trigger_rate: pair(&signals.trigger_rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_serves_configured_prefix() {
        let settings = FlyScanSettings {
            flyer: FlyerSignals::with_prefix("SIM:"),
            ..Default::default()
        };
        let signals = controller_signals(&settings.flyer);
        assert_eq!(signals, ScanControllerSignals::with_prefix("SIM:"));
    }

    #[tokio::test]
    async fn test_simulated_run() {
        let settings = FlyScanSettings::default();
        let beamline = SimulatedBeamline::new(&settings, MockMode::Instant);
        let runner = beamline.runner(&settings);

        let request = daq_experiment::plans::FlyScanRequest::new((0.0, 1.0, 3), (0.0, 1.0, 2), 0.01);
        let summary = runner.run(request).await.unwrap();
        assert_eq!(summary.num_events, 6);
        assert_eq!(beamline.controller.scans_started(), 1);
    }
}
