//! Commands that start the external raster.
//!
//! The coordinator is parameterized by the command it issues at kickoff:
//! [`StartScan`] for the hardware raster, [`StartFakeScan`] for the
//! controller's simulated raster. Any hardware settling that must happen
//! before the command is modelled as a [`SettleStep`] with a bounded wait.

use anyhow::{bail, Result};
use async_trait::async_trait;
use daq_core::capabilities::{value_as_f64, ScanController, Settable, Watchable};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Action that makes the motion controller begin its scan.
///
/// `issue()` resolves on write acknowledgment, not on the scan starting.
#[async_trait]
pub trait StartCommand: Send + Sync + std::fmt::Debug {
    /// Label used in logs and in `HardwareCommandFailed`.
    fn name(&self) -> &str;

    async fn issue(&self, controller: &dyn ScanController) -> Result<()>;
}

/// Process the hardware `StartScan` record.
#[derive(Debug, Clone)]
pub struct StartScan {
    signal: String,
}

impl StartScan {
    /// Start command writing `1` to `signal`.
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
        }
    }
}

#[async_trait]
impl StartCommand for StartScan {
    fn name(&self) -> &str {
        &self.signal
    }

    async fn issue(&self, controller: &dyn ScanController) -> Result<()> {
        debug!(signal = %self.signal, "Issuing start scan");
        controller.set_value(&self.signal, json!(1)).await
    }
}

/// Wait until a controller signal reads `expected`, bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct SettleStep {
    /// Label used in logs and errors
    pub name: String,
    /// Controller signal polled
    pub signal: String,
    /// Value the signal must reach
    pub expected: Value,
    /// Upper bound on the wait
    pub timeout: Duration,
}

impl SettleStep {
    /// Wait on `signal` until it reads `expected`.
    pub fn new(name: &str, signal: &str, expected: Value, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            signal: signal.to_string(),
            expected,
            timeout,
        }
    }

    /// Numbers compare numerically (`1` matches `1.0`), everything else by equality.
    pub fn matches(&self, value: &Value) -> bool {
        match (value_as_f64(&self.expected), value_as_f64(value)) {
            (Some(expected), Some(actual)) if self.expected.is_number() => expected == actual,
            _ => *value == self.expected,
        }
    }

    pub async fn wait<W: Watchable + ?Sized>(&self, controller: &W) -> Result<()> {
        let mut updates = controller.monitor(&self.signal).await?;
        let settled = timeout(self.timeout, async {
            while let Some(value) = updates.recv().await {
                if self.matches(&value) {
                    return true;
                }
            }
            false
        })
        .await;

        match settled {
            Ok(true) => {
                debug!(step = %self.name, signal = %self.signal, "Settled");
                Ok(())
            }
            Ok(false) => bail!(
                "settle step '{}': monitor on '{}' closed",
                self.name,
                self.signal
            ),
            Err(_) => bail!(
                "settle step '{}': '{}' did not reach {} within {:?}",
                self.name,
                self.signal,
                self.expected,
                self.timeout
            ),
        }
    }
}

/// Process the controller's `StartFakeScan` record.
#[derive(Debug, Clone)]
pub struct StartFakeScan {
    signal: String,
    settle: Option<SettleStep>,
}

impl StartFakeScan {
    /// Fake-scan command processing `signal`, without a settle step.
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            settle: None,
        }
    }

    /// Wait for `step` before processing the record.
    pub fn with_settle(mut self, step: SettleStep) -> Self {
        self.settle = Some(step);
        self
    }
}

#[async_trait]
impl StartCommand for StartFakeScan {
    fn name(&self) -> &str {
        &self.signal
    }

    async fn issue(&self, controller: &dyn ScanController) -> Result<()> {
        if let Some(step) = &self.settle {
            step.wait(controller).await?;
        }
        info!(signal = %self.signal, "Issuing fake scan");
        controller.set_value(&self.signal, json!(1)).await
    }
}
