//! Awaitable transitions of the external "scan in progress" flag.
//!
//! Resolution is edge-triggered. The first monitor message (the value at
//! subscribe time) only establishes the baseline; `await_start()` resolves on
//! the first observed false→true crossing after that, `await_stop()` on the
//! first true→false crossing. A monitor attached while the flag already reads
//! true therefore does not report a start it never saw.
//!
//! The subscription is a plain channel receiver, so there is no polling and a
//! pending wait is cancelled by dropping the future. Dropping the monitor
//! unsubscribes.

use daq_core::capabilities::{value_as_bool, MonitorReceiver, Watchable};
use daq_core::error::{FlyResult, FlyScanError};
use tracing::{debug, warn};

/// Monitor over one boolean signal.
#[derive(Debug)]
pub struct ExternalScanMonitor {
    signal: String,
    updates: MonitorReceiver,
    /// Last observed level, `None` until the first message.
    level: Option<bool>,
}

impl ExternalScanMonitor {
    /// Subscribe to `signal` on `device`.
    pub async fn subscribe<W: Watchable + ?Sized>(device: &W, signal: &str) -> FlyResult<Self> {
        let updates = device
            .monitor(signal)
            .await
            .map_err(|e| FlyScanError::hardware(format!("monitor {}", signal), e))?;
        Ok(Self::from_receiver(signal, updates))
    }

    /// Wrap an existing subscription.
    pub fn from_receiver(signal: &str, updates: MonitorReceiver) -> Self {
        Self {
            signal: signal.to_string(),
            updates,
            level: None,
        }
    }

    /// Name of the watched signal.
    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Last level seen on the signal.
    pub fn level(&self) -> Option<bool> {
        self.level
    }

    /// Resolve on the next false→true transition.
    ///
    /// Never resolves if the external system never starts; bound it with a
    /// caller-side timeout.
    pub async fn await_start(&mut self) -> FlyResult<()> {
        self.await_edge(true).await
    }

    /// Resolve on the next true→false transition.
    pub async fn await_stop(&mut self) -> FlyResult<()> {
        self.await_edge(false).await
    }

    async fn await_edge(&mut self, target: bool) -> FlyResult<()> {
        loop {
            let Some(value) = self.updates.recv().await else {
                return Err(FlyScanError::MonitorClosed(self.signal.clone()));
            };
            let Some(level) = value_as_bool(&value) else {
                warn!(signal = %self.signal, %value, "Ignoring non-boolean monitor value");
                continue;
            };
            let previous = self.level.replace(level);
            if previous == Some(!target) && level == target {
                debug!(signal = %self.signal, level, "Observed transition");
                return Ok(());
            }
        }
    }
}
