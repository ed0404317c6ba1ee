//! In-memory stand-in for a Channel Access signal namespace.
//!
//! Every signal is an [`Observable<Value>`]. Setpoints can be linked to a
//! read-only readback that follows the setpoint after the configured settling
//! time, which is how motion-controller `XStart`/`XStart-RB` pairs behave.

use crate::common::{ErrorConfig, MockMode, TimingConfig};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use daq_core::capabilities::{MonitorReceiver, Settable, Watchable};
use daq_core::observable::Observable;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::sleep;

/// Named signal store with simulated latency and error injection.
#[derive(Debug)]
pub struct MockSignalBus {
    driver_type: &'static str,
    signals: RwLock<HashMap<String, Observable<Value>>>,
    /// setpoint name -> readback name
    readbacks: RwLock<HashMap<String, String>>,
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
}

impl MockSignalBus {
    pub fn new(driver_type: &'static str) -> Self {
        Self {
            driver_type,
            signals: RwLock::new(HashMap::new()),
            readbacks: RwLock::new(HashMap::new()),
            mode: MockMode::Instant,
            timing: TimingConfig::default(),
            errors: ErrorConfig::none(),
        }
    }

    pub fn with_mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn mode(&self) -> MockMode {
        self.mode
    }

    pub fn timing(&self) -> TimingConfig {
        self.timing
    }

    /// Register a writable signal.
    pub fn add_signal(&self, name: &str, initial: Value) -> Observable<Value> {
        let signal = Observable::new(name, initial);
        self.signals.write().insert(name.to_string(), signal.clone());
        signal
    }

    /// Register a signal only the device itself may update (via `force`).
    pub fn add_read_only(&self, name: &str, initial: Value) -> Observable<Value> {
        let signal = Observable::new(name, initial).read_only();
        self.signals.write().insert(name.to_string(), signal.clone());
        signal
    }

    /// Register a setpoint together with the readback that follows it.
    pub fn add_setpoint(&self, setpoint: &str, readback: &str, initial: Value) {
        self.add_signal(setpoint, initial.clone());
        self.add_read_only(readback, initial);
        self.readbacks
            .write()
            .insert(setpoint.to_string(), readback.to_string());
    }

    /// Look up a signal handle.
    pub fn signal(&self, name: &str) -> Option<Observable<Value>> {
        self.signals.read().get(name).cloned()
    }

    fn require(&self, name: &str) -> Result<Observable<Value>> {
        self.signal(name)
            .ok_or_else(|| anyhow!("{}: unknown signal '{}'", self.driver_type, name))
    }

    /// Device-side update that bypasses the read-only flag.
    pub fn force(&self, name: &str, value: Value) -> Result<()> {
        self.require(name)?.force(value);
        Ok(())
    }

    /// Current value without latency or error injection.
    pub fn peek(&self, name: &str) -> Option<Value> {
        self.signal(name).map(|s| s.get())
    }

    async fn round_trip(&self, operation: &str) -> Result<()> {
        let delay = self.mode.delay(self.timing.communication_delay());
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.errors.check_operation(self.driver_type, operation)?;
        Ok(())
    }

    /// Write a signal (put with completion).
    pub async fn write(&self, name: &str, value: Value) -> Result<()> {
        self.round_trip(&format!("set {}", name)).await?;
        let signal = self.require(name)?;
        signal.set(value.clone())?;
        tracing::debug!(driver = self.driver_type, signal = name, %value, "put");

        let readback = self.readbacks.read().get(name).cloned();
        if let Some(readback) = readback {
            let settle = self.mode.delay(self.timing.settling_time());
            if !settle.is_zero() {
                sleep(settle).await;
            }
            self.force(&readback, value)?;
        }
        Ok(())
    }

    /// Read a signal.
    pub async fn read(&self, name: &str) -> Result<Value> {
        self.round_trip(&format!("get {}", name)).await?;
        Ok(self.require(name)?.get())
    }

    /// Subscribe to a signal.
    pub async fn subscribe(&self, name: &str) -> Result<MonitorReceiver> {
        self.round_trip(&format!("monitor {}", name)).await?;
        Ok(self.require(name)?.monitor())
    }
}

#[async_trait]
impl Settable for MockSignalBus {
    async fn set_value(&self, name: &str, value: Value) -> Result<()> {
        self.write(name, value).await
    }

    async fn get_value(&self, name: &str) -> Result<Value> {
        self.read(name).await
    }
}

#[async_trait]
impl Watchable for MockSignalBus {
    async fn monitor(&self, name: &str) -> Result<MonitorReceiver> {
        self.subscribe(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use serde_json::json;

    #[tokio::test]
    async fn test_setpoint_drives_readback() {
        let bus = MockSignalBus::new("test_bus");
        bus.add_setpoint("NX", "NX-RB", json!(1));

        bus.set_value("NX", json!(50)).await.unwrap();
        assert_eq!(bus.get_value("NX-RB").await.unwrap(), json!(50));
    }

    #[tokio::test]
    async fn test_readback_rejects_writes() {
        let bus = MockSignalBus::new("test_bus");
        bus.add_setpoint("NX", "NX-RB", json!(1));

        assert!(bus.set_value("NX-RB", json!(5)).await.is_err());
        bus.force("NX-RB", json!(5)).unwrap();
        assert_eq!(bus.peek("NX-RB"), Some(json!(5)));
    }

    #[tokio::test]
    async fn test_unknown_signal_is_an_error() {
        let bus = MockSignalBus::new("test_bus");
        let err = bus.get_value("missing").await.unwrap_err();
        assert!(err.to_string().contains("unknown signal 'missing'"));
    }

    #[tokio::test]
    async fn test_monitor_sees_every_write() {
        let bus = MockSignalBus::new("test_bus");
        bus.add_signal("flag", json!(0));
        let mut rx = bus.monitor("flag").await.unwrap();

        bus.set_value("flag", json!(1)).await.unwrap();
        bus.set_value("flag", json!(0)).await.unwrap();

        assert_eq!(rx.recv().await, Some(json!(0)));
        assert_eq!(rx.recv().await, Some(json!(1)));
        assert_eq!(rx.recv().await, Some(json!(0)));
    }

    #[tokio::test]
    async fn test_injected_failure_names_the_operation() {
        let bus = MockSignalBus::new("test_bus")
            .with_errors(ErrorConfig::scenario(ErrorScenario::timeout("get NX-RB")));
        bus.add_setpoint("NX", "NX-RB", json!(1));

        assert!(bus.set_value("NX", json!(2)).await.is_ok());
        let err = bus.get_value("NX-RB").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
