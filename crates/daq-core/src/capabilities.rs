//! Hardware Capabilities
//!
//! Fine-grained capability traits that stand in for the control-system
//! transport. The fly-scan core never talks to Channel Access directly; it talks
//! to devices that implement the capabilities they actually support:
//!
//! - A motion controller implements `Settable + Watchable` (= [`ScanController`])
//! - An area detector implements `Settable + Stageable + AssetProducer`
//!   (= [`AreaDetector`])
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Signals are addressed by name and carry `serde_json::Value`, so one trait
//! covers numeric setpoints, boolean flags and enum strings alike.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn arm<D: AreaDetector>(detector: &D) -> Result<()> {
//!     detector.set_value("cam.image_mode", json!("Multiple")).await?;
//!     detector.stage().await?;
//!     detector.set_value("cam.acquire", json!(1)).await
//! }
//! ```

use crate::experiment::document::ResourceDoc;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Receiving half of a signal monitor.
///
/// The first message is the value at subscribe time; later messages arrive in
/// write order without coalescing. Dropping the receiver unsubscribes.
pub type MonitorReceiver = mpsc::UnboundedReceiver<Value>;

/// Capability: Settable (Named Signals)
///
/// Request/response access to named signals.
///
/// # Contract
/// - `set_value()` writes a signal and resolves once the write is acknowledged
///   (put completion).
/// - `get_value()` reads the current value.
/// - Methods take `&self` (not `&mut self`) to allow use with `Arc<dyn Settable>`.
///   Implementations should use interior mutability for state changes.
#[async_trait]
pub trait Settable: Send + Sync {
    /// Set a named signal to a new value.
    ///
    /// # Arguments
    /// * `name` - The signal to write.
    /// * `value` - The new value.
    async fn set_value(&self, name: &str, value: Value) -> Result<()>;

    /// Get the current value of a named signal.
    ///
    /// # Arguments
    /// * `name` - The signal to read.
    async fn get_value(&self, name: &str) -> Result<Value> {
        anyhow::bail!("Get value for '{}' not supported by this device", name)
    }
}

/// Capability: Watchable (Signal Monitors)
///
/// Devices that can push updates for a named signal.
///
/// # Contract
/// - The returned receiver yields the current value first.
/// - Every subsequent update is delivered, in order. Quick pulses
///   (false→true→false) must not be merged into a single message.
#[async_trait]
pub trait Watchable: Send + Sync {
    /// Subscribe to updates of a named signal.
    async fn monitor(&self, name: &str) -> Result<MonitorReceiver>;
}

/// Capability: Stageable (Acquisition Lifecycle)
///
/// Devices that need preparation before an acquisition sequence and cleanup
/// after it.
#[async_trait]
pub trait Stageable: Send + Sync {
    /// Prepare device for acquisition sequence
    ///
    /// Called before a scan begins. A detector's file writer allocates its
    /// storage resource here.
    async fn stage(&self) -> Result<()>;

    /// Clean up after acquisition sequence
    ///
    /// Must be safe to call repeatedly and after a partial `stage()`.
    async fn unstage(&self) -> Result<()>;

    /// Query staging state
    ///
    /// # Default Implementation
    /// Returns an error indicating state query is not supported.
    async fn is_staged(&self) -> Result<bool> {
        anyhow::bail!("Staged state query not supported by this device")
    }
}

/// Capability: AssetProducer (External Storage)
///
/// Devices whose bulk data is written outside the document stream.
#[async_trait]
pub trait AssetProducer: Send + Sync {
    /// Read back the resource allocated by the last `stage()`.
    ///
    /// Returns `None` if staging produced no resource or it was already taken.
    async fn collect_resource(&self) -> Result<Option<ResourceDoc>>;
}

/// Motion controller driving an externally-timed raster scan.
pub trait ScanController: Settable + Watchable {}

impl<T: Settable + Watchable> ScanController for T {}

/// Externally triggered detector writing frames to a file store.
pub trait AreaDetector: Settable + Stageable + AssetProducer {}

impl<T: Settable + Stageable + AssetProducer> AreaDetector for T {}

/// Interpret a signal value as a boolean.
///
/// Booleans map directly; numbers are true when non-zero (PV convention);
/// the strings "1"/"true"/"on"/"yes" are true, "0"/"false"/"off"/"no" are false.
pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Some(true),
            "0" | "false" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Interpret a signal value as a floating point number.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_as_bool() {
        assert_eq!(value_as_bool(&json!(true)), Some(true));
        assert_eq!(value_as_bool(&json!(1)), Some(true));
        assert_eq!(value_as_bool(&json!(0.0)), Some(false));
        assert_eq!(value_as_bool(&json!("On")), Some(true));
        assert_eq!(value_as_bool(&json!("no")), Some(false));
        assert_eq!(value_as_bool(&json!("maybe")), None);
        assert_eq!(value_as_bool(&json!(null)), None);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_value_as_f64() {
        assert_eq!(value_as_f64(&json!(3)), Some(3.0));
        assert_eq!(value_as_f64(&json!(-1.25)), Some(-1.25));
        assert_eq!(value_as_f64(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(value_as_f64(&json!(true)), Some(1.0));
        assert_eq!(value_as_f64(&json!([1, 2])), None);
    }
}
