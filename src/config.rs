//! Fly-scan configuration using Figment
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults (HXN beamline signal names)
//! 2. A TOML file (`config/flyscan.toml` by default)
//! 3. Environment variables prefixed with `FLYSCAN_`, `__` separating levels
//!
//! ```text
//! FLYSCAN_LOG_LEVEL=debug
//! FLYSCAN_TIMEOUTS__START_MS=60000
//! FLYSCAN_OPTIONS__ASSET_MODE=skipped
//! ```
//!
//! # Example
//! ```no_run
//! use hxn_flyscan::config::FlyScanSettings;
//!
//! let settings = FlyScanSettings::load()?;
//! println!("Flyer: {}", settings.name);
//! # Ok::<(), hxn_flyscan::config::ConfigLoadError>(())
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use daq_core::capabilities::{AreaDetector, ScanController};
use daq_experiment::flyer::{FlyScanCoordinator, FlyerOptions, FlyerSignals, FlyerVariant};
use daq_experiment::plans::{FlyScanRunner, FlyScanTimeouts};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::logging::OutputFormat;

/// Default location of the settings file
pub const DEFAULT_CONFIG_PATH: &str = "config/flyscan.toml";

/// Prefix of overriding environment variables
pub const ENV_PREFIX: &str = "FLYSCAN_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors raised while loading or validating settings
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level fly-scan settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyScanSettings {
    /// Name of the flyer device, used in logs
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: OutputFormat,
    /// Controller and detector signal names
    pub flyer: FlyerSignals,
    pub options: FlyerOptions,
    pub timeouts: TimeoutSettings,
}

impl Default for FlyScanSettings {
    fn default() -> Self {
        Self {
            name: "flyer".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
            flyer: FlyerSignals::hxn(),
            options: FlyerOptions::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

/// Timeouts, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Each trajectory / array-size readback at kickoff
    pub signal_read_ms: u64,
    /// Kickoff, until `ScanInProgress` rises
    pub start_ms: u64,
    /// Complete, until `ScanInProgress` falls
    pub complete_ms: u64,
    /// Trajectory readback verification after writing setpoints
    pub settle_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            signal_read_ms: 5_000,
            start_ms: 30_000,
            complete_ms: 3_600_000,
            settle_ms: 5_000,
        }
    }
}

impl TimeoutSettings {
    pub fn signal_read(&self) -> Duration {
        Duration::from_millis(self.signal_read_ms)
    }

    /// Bounds applied by the plan runner.
    pub fn runner(&self) -> FlyScanTimeouts {
        FlyScanTimeouts {
            settle: Duration::from_millis(self.settle_ms),
            start: Duration::from_millis(self.start_ms),
            complete: Duration::from_millis(self.complete_ms),
        }
    }
}

impl FlyScanSettings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        info!(
            path = %path.as_ref().display(),
            flyer = %settings.name,
            variant = ?settings.options.variant,
            "Loaded fly-scan configuration"
        );
        Ok(settings)
    }

    /// The layered provider, exposed for callers merging extra sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if !VALID_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LEVELS.join(", ")
            )));
        }

        if self.name.trim().is_empty() {
            return Err(ConfigLoadError::Invalid("Flyer name is empty".to_string()));
        }

        if let Some((label, _)) = self
            .flyer
            .all_names()
            .into_iter()
            .find(|(_, name)| name.trim().is_empty())
        {
            return Err(ConfigLoadError::Invalid(format!(
                "Signal name for '{}' is empty",
                label
            )));
        }

        let timeouts = [
            ("signal_read_ms", self.timeouts.signal_read_ms),
            ("start_ms", self.timeouts.start_ms),
            ("complete_ms", self.timeouts.complete_ms),
            ("settle_ms", self.timeouts.settle_ms),
        ];
        if let Some((label, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigLoadError::Invalid(format!(
                "Timeout '{}' must be greater than zero",
                label
            )));
        }

        Ok(())
    }

    /// Render as TOML, e.g. to write out a starting configuration.
    pub fn to_toml(&self) -> Result<String, ConfigLoadError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Coordinator wired from these settings.
    pub fn build_flyer(
        &self,
        controller: Arc<dyn ScanController>,
        detector: Arc<dyn AreaDetector>,
    ) -> FlyScanCoordinator {
        let flyer = match self.options.variant {
            FlyerVariant::Hardware => {
                FlyScanCoordinator::new(&self.name, controller, detector, self.flyer.clone())
            }
            FlyerVariant::Fake => {
                FlyScanCoordinator::fake(&self.name, controller, detector, self.flyer.clone())
            }
        };
        flyer
            .with_options(self.options.clone())
            .with_read_timeout(self.timeouts.signal_read())
    }

    /// Plan runner owning a coordinator wired from these settings.
    pub fn build_runner(
        &self,
        controller: Arc<dyn ScanController>,
        detector: Arc<dyn AreaDetector>,
    ) -> FlyScanRunner {
        FlyScanRunner::new(
            self.build_flyer(controller, detector),
            self.timeouts.runner(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_experiment::flyer::AssetMode;
    use tracing_test::traced_test;

    #[test]
    fn test_defaults_are_valid() {
        let settings = FlyScanSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(
            settings.flyer.scan_in_progress,
            "XF:03IDC-CT{MC:01}ScanInProgress"
        );
        assert_eq!(settings.timeouts.runner().start, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_log_level() {
        let settings = FlyScanSettings {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn test_empty_signal_name_is_rejected() {
        let mut settings = FlyScanSettings::default();
        settings.flyer.ny.readback = String::new();

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("ny.readback"), "{err}");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut settings = FlyScanSettings::default();
        settings.timeouts.complete_ms = 0;

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("complete_ms"), "{err}");
    }

    #[test]
    fn test_toml_rendering_parses_back() {
        let mut settings = FlyScanSettings::default();
        settings.options.asset_mode = AssetMode::Skipped;

        let rendered = settings.to_toml().unwrap();
        let parsed: FlyScanSettings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    #[traced_test]
    fn test_load_logs_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flyscan.toml");
        std::fs::write(&path, "name = \"logged_flyer\"\n").unwrap();

        let settings = FlyScanSettings::load_from(&path).unwrap();
        assert_eq!(settings.name, "logged_flyer");
        assert!(logs_contain("Loaded fly-scan configuration"));
        assert!(logs_contain("logged_flyer"));
    }
}
