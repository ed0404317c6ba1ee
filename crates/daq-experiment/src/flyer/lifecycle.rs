//! Stage/unstage contract of the externally triggered detector.
//!
//! `stage()` records the current value of each stage signal before overwriting
//! it, stages the detector (which allocates its storage resource) and starts
//! acquisition. `unstage()` stops acquisition, restores the recorded values in
//! reverse order and unstages the detector. Every teardown step is attempted
//! even when an earlier one fails; the first failure is returned.

use daq_core::capabilities::{AreaDetector, Settable, Stageable};
use daq_core::error::{FlyResult, FlyScanError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::signals::DetectorSignals;

/// Arms and disarms one area detector around a scan.
pub struct AcquisitionLifecycle {
    detector: Arc<dyn AreaDetector>,
    signals: DetectorSignals,
    /// Values to restore on unstage, in the order they were overwritten.
    saved: Mutex<Vec<(String, Value)>>,
}

impl std::fmt::Debug for AcquisitionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionLifecycle")
            .field("detector", &self.signals.name)
            .field("saved", &self.saved.lock().len())
            .finish()
    }
}

impl AcquisitionLifecycle {
    /// Lifecycle for `detector`; nothing is written until `stage()`.
    pub fn new(detector: Arc<dyn AreaDetector>, signals: DetectorSignals) -> Self {
        Self {
            detector,
            signals,
            saved: Mutex::new(Vec::new()),
        }
    }

    /// The managed detector.
    pub fn detector(&self) -> &Arc<dyn AreaDetector> {
        &self.detector
    }

    /// Signal names and stage values in use.
    pub fn signals(&self) -> &DetectorSignals {
        &self.signals
    }

    /// Arm the detector for external triggering.
    ///
    /// On failure the partially applied configuration is still recorded, so
    /// a following `unstage()` undoes exactly what was changed.
    pub async fn stage(&self) -> FlyResult<()> {
        for sig in &self.signals.stage_sigs {
            let previous = self
                .detector
                .get_value(&sig.signal)
                .await
                .map_err(|e| FlyScanError::hardware(format!("read {}", sig.signal), e))?;
            self.detector
                .set_value(&sig.signal, sig.value.clone())
                .await
                .map_err(|e| FlyScanError::hardware(format!("set {}", sig.signal), e))?;
            debug!(signal = %sig.signal, %previous, value = %sig.value, "Applied stage signal");
            self.saved.lock().push((sig.signal.clone(), previous));
        }

        self.detector
            .stage()
            .await
            .map_err(|e| FlyScanError::hardware("stage detector", e))?;

        self.write(&self.signals.acquire, json!(1)).await?;
        info!(detector = %self.signals.name, "Detector staged and acquiring");
        Ok(())
    }

    /// Stop acquisition and restore the pre-stage configuration.
    ///
    /// Safe to call repeatedly and after a partial `stage()`.
    pub async fn unstage(&self) -> FlyResult<()> {
        let mut first_error: Option<FlyScanError> = None;
        let mut record = |result: FlyResult<()>| {
            if let Err(e) = result {
                warn!(detector = %self.signals.name, error = %e, "Unstage step failed");
                first_error.get_or_insert(e);
            }
        };

        record(self.write(&self.signals.acquire, json!(0)).await);

        let saved = std::mem::take(&mut *self.saved.lock());
        for (signal, previous) in saved.into_iter().rev() {
            record(self.write(&signal, previous).await);
        }

        record(
            self.detector
                .unstage()
                .await
                .map_err(|e| FlyScanError::hardware("unstage detector", e)),
        );

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(detector = %self.signals.name, "Detector unstaged");
                Ok(())
            }
        }
    }

    /// Write a detector signal, mapping failures to `HardwareCommandFailed`.
    pub async fn write(&self, signal: &str, value: Value) -> FlyResult<()> {
        debug!(signal, %value, "Detector write");
        self.detector
            .set_value(signal, value)
            .await
            .map_err(|e| FlyScanError::hardware(format!("set {}", signal), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_driver_mock::{
        detector_signals, ErrorConfig, ErrorScenario, MockAreaDetector, MockAreaDetectorConfig,
        MockMode,
    };

    fn lifecycle_with(errors: ErrorConfig) -> (Arc<MockAreaDetector>, AcquisitionLifecycle) {
        let detector = Arc::new(MockAreaDetector::with_behavior(
            MockAreaDetectorConfig::default(),
            MockMode::Instant,
            errors,
        ));
        let lifecycle = AcquisitionLifecycle::new(detector.clone(), DetectorSignals::default());
        (detector, lifecycle)
    }

    #[tokio::test]
    async fn test_stage_applies_and_unstage_restores() {
        let (detector, lifecycle) = lifecycle_with(ErrorConfig::none());

        lifecycle.stage().await.unwrap();
        assert_eq!(detector.peek(detector_signals::IMAGE_MODE), Some(json!("Multiple")));
        assert_eq!(detector.peek(detector_signals::TRIGGER_MODE), Some(json!("Sync In 2")));
        assert_eq!(detector.peek(detector_signals::ACQUIRE), Some(json!(1)));
        assert!(detector.is_staged().await.unwrap());

        lifecycle.unstage().await.unwrap();
        assert_eq!(detector.peek(detector_signals::IMAGE_MODE), Some(json!("Single")));
        assert_eq!(detector.peek(detector_signals::TRIGGER_MODE), Some(json!("Internal")));
        assert_eq!(detector.peek(detector_signals::ACQUIRE), Some(json!(0)));
        assert!(!detector.is_staged().await.unwrap());
    }

    #[tokio::test]
    async fn test_unstage_twice_leaves_same_configuration() {
        let (detector, lifecycle) = lifecycle_with(ErrorConfig::none());
        lifecycle.stage().await.unwrap();

        lifecycle.unstage().await.unwrap();
        let after_first = (
            detector.peek(detector_signals::IMAGE_MODE),
            detector.peek(detector_signals::ACQUIRE),
        );
        lifecycle.unstage().await.unwrap();
        let after_second = (
            detector.peek(detector_signals::IMAGE_MODE),
            detector.peek(detector_signals::ACQUIRE),
        );
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_partial_stage_is_undone() {
        let (detector, lifecycle) =
            lifecycle_with(ErrorConfig::scenario(ErrorScenario::always("stage")));

        let err = lifecycle.stage().await.unwrap_err();
        assert!(
            matches!(err, FlyScanError::HardwareCommandFailed { ref operation, .. } if operation == "stage detector")
        );
        // Stage signals were written before the detector refused
        assert_eq!(detector.peek(detector_signals::IMAGE_MODE), Some(json!("Multiple")));

        lifecycle.unstage().await.unwrap();
        assert_eq!(detector.peek(detector_signals::IMAGE_MODE), Some(json!("Single")));
        assert_eq!(detector.peek(detector_signals::TRIGGER_MODE), Some(json!("Internal")));
    }

    #[tokio::test]
    async fn test_unstage_attempts_every_step() {
        let (detector, lifecycle) =
            lifecycle_with(ErrorConfig::scenario(ErrorScenario::always("set cam.acquire")));

        // Acquire write fails during stage, after the detector itself staged
        assert!(lifecycle.stage().await.is_err());
        assert!(detector.is_staged().await.unwrap());

        let err = lifecycle.unstage().await.unwrap_err();
        assert!(
            matches!(err, FlyScanError::HardwareCommandFailed { ref operation, .. } if operation == "set cam.acquire")
        );
        // Restore and detector unstage still ran
        assert_eq!(detector.peek(detector_signals::IMAGE_MODE), Some(json!("Single")));
        assert!(!detector.is_staged().await.unwrap());
    }
}
