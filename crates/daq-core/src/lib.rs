//! `daq-core`
//!
//! Core types and traits shared by the fly-scan crates.
//!
//! This crate defines the vocabulary the rest of the workspace speaks: the
//! Bluesky-style document model emitted to an orchestration engine, the
//! observable values used to simulate process variables, the capability
//! traits that stand in for the control-system transport, and the error
//! taxonomy of the fly-scan coordinator.
//!
//! ## Modules
//!
//! - [`capabilities`]: Small async traits a device implements (`Settable`,
//!   `Watchable`, `Stageable`, `AssetProducer`) and the composite
//!   `ScanController` / `AreaDetector` traits built from them.
//! - [`experiment::document`]: Start/Descriptor/Resource/Datum/Event/Stop documents.
//! - [`observable`]: `Observable<T>`, a watch-channel backed value with monitors.
//! - [`error`]: `FlyScanError` and the structured `DriverError`.

pub mod capabilities;
pub mod error;
pub mod experiment;
pub mod observable;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use error::{FlyResult, FlyScanError};
