//! Signal names the coordinator reads and writes.
//!
//! Defaults reproduce the HXN beamline: the DeltaTau motion controller at
//! `XF:03IDC-CT{MC:01}` and an areaDetector camera whose component paths follow
//! ophyd naming (`cam.acquire`, `tiff.array_size.height`, ...).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Prefix of the HXN motion controller PVs.
pub const HXN_CONTROLLER_PREFIX: &str = "XF:03IDC-CT{MC:01}";

/// A writable setpoint and the readback that reflects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPair {
    pub setpoint: String,
    pub readback: String,
}

impl SignalPair {
    /// `{prefix}{name}` with readback `{prefix}{name}-RB`.
    pub fn with_readback_suffix(prefix: &str, name: &str) -> Self {
        Self {
            setpoint: format!("{prefix}{name}"),
            readback: format!("{prefix}{name}-RB"),
        }
    }
}

/// A detector signal forced to a value while staged, restored on unstage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSignal {
    pub signal: String,
    pub value: Value,
}

impl StageSignal {
    pub fn new(signal: &str, value: Value) -> Self {
        Self {
            signal: signal.to_string(),
            value,
        }
    }
}

/// Detector-side signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSignals {
    /// Detector name, used as the image data source
    pub name: String,
    /// Applied in order on stage, restored in reverse on unstage
    pub stage_sigs: Vec<StageSignal>,
    pub acquire: String,
    pub acquire_time: String,
    pub num_images: String,
    pub array_height: String,
    pub array_width: String,
}

impl Default for DetectorSignals {
    fn default() -> Self {
        Self {
            name: "merlin1".to_string(),
            stage_sigs: vec![
                StageSignal::new("cam.image_mode", json!("Multiple")),
                StageSignal::new("cam.trigger_mode", json!("Sync In 2")),
            ],
            acquire: "cam.acquire".to_string(),
            acquire_time: "cam.acquire_time".to_string(),
            num_images: "cam.num_images".to_string(),
            array_height: "tiff.array_size.height".to_string(),
            array_width: "tiff.array_size.width".to_string(),
        }
    }
}

/// Every signal name a fly scan touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyerSignals {
    /// Read-only "scan in progress" flag
    pub scan_in_progress: String,
    /// Arms the controller for an external scan
    pub set_scanning: String,
    /// Starts the hardware raster
    pub start_scan: String,
    /// Starts a simulated raster on the controller
    pub start_fake_scan: String,
    pub x_start: SignalPair,
    pub x_stop: SignalPair,
    pub nx: SignalPair,
    pub y_start: SignalPair,
    pub y_stop: SignalPair,
    pub ny: SignalPair,
    pub trigger_rate: SignalPair,
    pub detector: DetectorSignals,
}

impl FlyerSignals {
    /// HXN beamline defaults.
    pub fn hxn() -> Self {
        Self::with_prefix(HXN_CONTROLLER_PREFIX)
    }

    /// Controller signals under an arbitrary prefix, default detector signals.
    pub fn with_prefix(prefix: &str) -> Self {
        let pair = |name: &str| SignalPair::with_readback_suffix(prefix, name);
        Self {
            scan_in_progress: format!("{prefix}ScanInProgress"),
            set_scanning: format!("{prefix}SetScanning"),
            start_scan: format!("{prefix}StartScan.PROC"),
            start_fake_scan: format!("{prefix}StartFakeScan.PROC"),
            x_start: pair("XStart"),
            x_stop: pair("XStop"),
            nx: pair("NX"),
            y_start: pair("YStart"),
            y_stop: pair("YStop"),
            ny: pair("NY"),
            trigger_rate: pair("TriggerRate"),
            detector: DetectorSignals::default(),
        }
    }

    /// Trajectory setpoint/readback pairs, labelled.
    pub fn trajectory(&self) -> [(&'static str, &SignalPair); 7] {
        [
            ("x_start", &self.x_start),
            ("x_stop", &self.x_stop),
            ("nx", &self.nx),
            ("y_start", &self.y_start),
            ("y_stop", &self.y_stop),
            ("ny", &self.ny),
            ("trigger_rate", &self.trigger_rate),
        ]
    }

    /// Labelled list of every configured name, for validation.
    pub fn all_names(&self) -> Vec<(String, &str)> {
        let mut names = vec![
            ("scan_in_progress".to_string(), self.scan_in_progress.as_str()),
            ("set_scanning".to_string(), self.set_scanning.as_str()),
            ("start_scan".to_string(), self.start_scan.as_str()),
            ("start_fake_scan".to_string(), self.start_fake_scan.as_str()),
            ("detector.acquire".to_string(), self.detector.acquire.as_str()),
            (
                "detector.acquire_time".to_string(),
                self.detector.acquire_time.as_str(),
            ),
            (
                "detector.num_images".to_string(),
                self.detector.num_images.as_str(),
            ),
            (
                "detector.array_height".to_string(),
                self.detector.array_height.as_str(),
            ),
            (
                "detector.array_width".to_string(),
                self.detector.array_width.as_str(),
            ),
        ];
        for (label, pair) in self.trajectory() {
            names.push((format!("{label}.setpoint"), pair.setpoint.as_str()));
            names.push((format!("{label}.readback"), pair.readback.as_str()));
        }
        for (i, sig) in self.detector.stage_sigs.iter().enumerate() {
            names.push((format!("detector.stage_sigs[{i}]"), sig.signal.as_str()));
        }
        names
    }
}

impl Default for FlyerSignals {
    fn default() -> Self {
        Self::hxn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hxn_defaults() {
        let signals = FlyerSignals::hxn();
        assert_eq!(signals.scan_in_progress, "XF:03IDC-CT{MC:01}ScanInProgress");
        assert_eq!(signals.set_scanning, "XF:03IDC-CT{MC:01}SetScanning");
        assert_eq!(signals.x_start.setpoint, "XF:03IDC-CT{MC:01}XStart");
        assert_eq!(signals.x_start.readback, "XF:03IDC-CT{MC:01}XStart-RB");
        assert_eq!(signals.detector.stage_sigs[1].value, json!("Sync In 2"));
    }

    #[test]
    fn test_all_names_are_labelled() {
        let signals = FlyerSignals::hxn();
        let names = signals.all_names();
        // 9 scalar names, 7 pairs, 2 stage signals
        assert_eq!(names.len(), 9 + 14 + 2);
        assert!(names.iter().all(|(_, name)| !name.is_empty()));
        assert!(names.iter().any(|(label, _)| label == "ny.readback"));
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let signals: FlyerSignals =
            serde_json::from_value(json!({ "set_scanning": "TEST:SetScanning" })).unwrap();
        assert_eq!(signals.set_scanning, "TEST:SetScanning");
        assert_eq!(signals.nx.readback, "XF:03IDC-CT{MC:01}NX-RB");
        assert_eq!(signals.detector.acquire, "cam.acquire");
    }
}
