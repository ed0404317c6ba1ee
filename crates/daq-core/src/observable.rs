//! Observable Values
//!
//! Value cells backing the simulated process variables in `daq-driver-mock`
//! (`Observable<serde_json::Value>`). The current value lives in a
//! `tokio::sync::watch` channel; listeners attach with [`Observable::monitor`],
//! an unbounded `mpsc` receiver that is handed the current value first, then
//! every value passed to `set()`/`force()` in order. Nothing is coalesced, so a
//! quick true→false→true toggle reaches an edge detector as three updates.
//!
//! # Example
//!
//! ```rust,ignore
//! let in_progress = Observable::new("ScanInProgress", false).read_only();
//!
//! let mut updates = in_progress.monitor();
//! assert_eq!(updates.recv().await, Some(false)); // current value first
//!
//! // The owning device updates read-only values with force()
//! in_progress.force(true);
//! in_progress.force(false);
//! assert_eq!(updates.recv().await, Some(true));
//! assert_eq!(updates.recv().await, Some(false));
//! ```

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

// =============================================================================
// Type Aliases
// =============================================================================

/// Validator callback type.
///
/// Runs on every `set()`; `force()` bypasses it.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

// =============================================================================
// Shared State
// =============================================================================

/// State shared by every clone of an Observable.
///
/// Publishing to monitors happens under the write lock so every monitor sees
/// values in the same order the cell stored them.
struct ObservableSharedState<T> {
    metadata: ObservableMetadata,
    validator: Option<Validator<T>>,
    monitors: Vec<mpsc::UnboundedSender<T>>,
}

// =============================================================================
// Observable<T>
// =============================================================================

/// A thread-safe, observable value with change notifications.
///
/// Clones share the same value, metadata and monitor list.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The watch channel sender (holds current value)
    sender: watch::Sender<T>,
    /// Shared metadata, validator and monitors
    shared: Arc<RwLock<ObservableSharedState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("metadata", &shared.metadata)
            .field("has_validator", &shared.validator.is_some())
            .field("monitors", &shared.monitors.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Metadata for an observable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableMetadata {
    /// Signal name (unique within a device).
    pub name: String,

    /// Whether this value rejects `set()` calls.
    ///
    /// Read-only values are readbacks; their owner updates them with `force()`.
    pub read_only: bool,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(ObservableSharedState {
                metadata: ObservableMetadata {
                    name: name.into(),
                    read_only: false,
                },
                validator: None,
                monitors: Vec::new(),
            })),
        }
    }

    /// Mark this observable as read-only.
    pub fn read_only(self) -> Self {
        self.shared.write().metadata.read_only = true;
        self
    }

    /// Reject `set()` values the validator refuses.
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.write().validator = Some(Arc::new(validator));
        self
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Get the signal name.
    pub fn name(&self) -> String {
        self.shared.read().metadata.name.clone()
    }

    /// Get the metadata (returns a clone for thread safety).
    pub fn metadata(&self) -> ObservableMetadata {
        self.shared.read().metadata.clone()
    }

    /// Validate a value without setting it.
    ///
    /// Returns error if the value is read-only or the validator rejects it.
    pub fn validate(&self, value: &T) -> Result<()> {
        let guard = self.shared.read();
        if guard.metadata.read_only {
            return Err(anyhow!("Signal '{}' is read-only", guard.metadata.name));
        }

        if let Some(validator) = &guard.validator {
            validator(value)?;
        }

        Ok(())
    }

    /// Set a new value and notify every monitor.
    ///
    /// Fails for read-only signals and values the validator rejects.
    pub fn set(&self, value: T) -> Result<()> {
        self.validate(&value)?;
        self.publish(value);
        Ok(())
    }

    /// Store a value bypassing read-only and validation checks.
    ///
    /// Used by the owner of a readback to reflect hardware state.
    pub fn force(&self, value: T) {
        self.publish(value);
    }

    fn publish(&self, value: T) {
        let mut guard = self.shared.write();
        self.sender.send_replace(value.clone());
        guard.monitors.retain(|tx| tx.send(value.clone()).is_ok());
    }

    /// Open an ordered, non-coalescing monitor.
    ///
    /// The receiver yields the current value immediately, then every update.
    /// Dropping the receiver unregisters it on the next publish.
    pub fn monitor(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.shared.write();
        // Receiver is alive, send cannot fail here.
        let _ = tx.send(self.sender.borrow().clone());
        guard.monitors.push(tx);
        rx
    }

    /// Get the number of registered monitors (closed ones are pruned lazily).
    pub fn monitor_count(&self) -> usize {
        self.shared.read().monitors.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_observable_basic() {
        let obs = Observable::new("test", 42);
        assert_eq!(obs.get(), 42);
        assert_eq!(obs.name(), "test");

        obs.set(100).unwrap();
        assert_eq!(obs.get(), 100);
    }

    #[test]
    fn test_observable_read_only_accepts_force() {
        let obs = Observable::new("XStart-RB", 0.0).read_only();

        assert!(obs.set(1.0).is_err());
        assert_eq!(obs.get(), 0.0);

        obs.force(2.5);
        assert_eq!(obs.get(), 2.5);
    }

    #[tokio::test]
    async fn test_monitor_delivers_current_value_then_every_update() {
        let obs = Observable::new("ScanInProgress", false);
        let mut updates = obs.monitor();

        obs.force(true);
        obs.force(false);
        obs.force(true);

        assert_eq!(updates.recv().await, Some(false));
        assert_eq!(updates.recv().await, Some(true));
        assert_eq!(updates.recv().await, Some(false));
        assert_eq!(updates.recv().await, Some(true));
    }

    #[test]
    fn test_dropped_monitor_is_pruned() {
        let obs = Observable::new("value", 0);
        let rx = obs.monitor();
        assert_eq!(obs.monitor_count(), 1);

        drop(rx);
        obs.set(1).unwrap();
        assert_eq!(obs.monitor_count(), 0);
    }

    #[test]
    fn test_rejected_set_does_not_reach_monitors() {
        let obs = Observable::new("rate", 10.0).with_validator(|v: &f64| {
            anyhow::ensure!(*v > 0.0, "rate must be positive");
            Ok(())
        });
        let mut rx = obs.monitor();
        assert_eq!(rx.try_recv().unwrap(), 10.0);

        assert!(obs.set(-1.0).is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(obs.get(), 10.0);
        assert_eq!(obs.metadata().name, "rate");
    }
}
