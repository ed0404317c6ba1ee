//! Document Model for fly-scan data
//!
//! Implements the Bluesky-style document model used to hand a fly scan's
//! structure to an orchestration engine. Bulk image data never travels inside a
//! document; it is referenced through resource/datum pairs:
//!
//! - **StartDoc**: Scan intent and metadata
//! - **DescriptorDoc**: Schema for data streams
//! - **ResourceDoc**: An external bulk-data container written by the detector
//! - **DatumDoc**: One addressable record inside a resource
//! - **EventDoc**: One logical row of the scan (positions + datum reference)
//! - **StopDoc**: Completion status and summary
//!
//! # Document Flow
//!
//! ```text
//! StartDoc (1)
//!    │
//!    ├── DescriptorDoc (1, "primary")
//!    │
//!    ├── ResourceDoc (1, written by the detector during stage)
//!    │       │
//!    │       └── DatumDoc (nx*ny, "{resource_uid}/{point_number}")
//!    │
//!    ├── EventDoc (nx*ny, seq_num 1..=nx*ny)
//!    │
//! StopDoc (1)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current timestamp in nanoseconds since Unix epoch
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Document types for fly-scan data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Document {
    /// Run start document - intent and metadata
    Start(StartDoc),
    /// Data stream descriptor - schema definition
    Descriptor(DescriptorDoc),
    /// External storage container
    Resource(ResourceDoc),
    /// Pointer into a resource
    Datum(DatumDoc),
    /// Event document - one scan point
    Event(EventDoc),
    /// Run stop document - completion status
    Stop(StopDoc),
}

impl Document {
    /// Get the document UID
    ///
    /// Datum documents are identified by their `datum_id`.
    pub fn uid(&self) -> &str {
        match self {
            Document::Start(d) => &d.uid,
            Document::Descriptor(d) => &d.uid,
            Document::Resource(d) => &d.uid,
            Document::Datum(d) => &d.datum_id,
            Document::Event(d) => &d.uid,
            Document::Stop(d) => &d.uid,
        }
    }

    /// Short name of the document kind, as used by Bluesky callbacks.
    pub fn kind(&self) -> &'static str {
        match self {
            Document::Start(_) => "start",
            Document::Descriptor(_) => "descriptor",
            Document::Resource(_) => "resource",
            Document::Datum(_) => "datum",
            Document::Event(_) => "event",
            Document::Stop(_) => "stop",
        }
    }
}

/// Start document - emitted at the beginning of a run
///
/// Contains scan intent, plan configuration, and user-provided metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDoc {
    /// Unique run identifier (this IS the run_uid)
    pub uid: String,
    /// Plan type that generated this run
    pub plan_type: String,
    /// User-friendly plan name
    pub plan_name: String,
    /// Plan arguments/configuration
    pub plan_args: HashMap<String, String>,
    /// User-provided metadata
    pub metadata: HashMap<String, String>,
    /// Visualization hints (e.g., preferred plot axes)
    pub hints: Vec<String>,
    /// Timestamp when run started
    pub time_ns: u64,
}

impl StartDoc {
    pub fn new(plan_type: &str, plan_name: &str) -> Self {
        Self {
            uid: new_uid(),
            plan_type: plan_type.to_string(),
            plan_name: plan_name.to_string(),
            plan_args: HashMap::new(),
            metadata: HashMap::new(),
            hints: Vec::new(),
            time_ns: now_ns(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: &str) -> Self {
        self.plan_args.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hints.push(hint.to_string());
        self
    }
}

/// Descriptor document - defines schema for event data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorDoc {
    /// Unique descriptor ID
    pub uid: String,
    /// Links to StartDoc
    pub run_uid: String,
    /// Stream name (e.g., "primary")
    pub name: String,
    /// Schema for data fields
    pub data_keys: HashMap<String, DataKey>,
    /// Device configuration at descriptor creation time
    pub configuration: HashMap<String, String>,
    /// Timestamp
    pub time_ns: u64,
}

impl DescriptorDoc {
    pub fn new(run_uid: &str, name: &str) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            name: name.to_string(),
            data_keys: HashMap::new(),
            configuration: HashMap::new(),
            time_ns: now_ns(),
        }
    }

    /// Replace all data keys at once (e.g. from a flyer's `describe_collect`).
    pub fn with_data_keys(mut self, keys: HashMap<String, DataKey>) -> Self {
        self.data_keys = keys;
        self
    }
}

/// Schema for a data field within events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKey {
    /// Data type: "number", "integer", "string", "array"
    pub dtype: String,
    /// Shape for arrays, or per-axis point count for fly-scan positions
    pub shape: Vec<usize>,
    /// Source signal or device
    pub source: String,
    /// Physical units
    #[serde(default)]
    pub units: String,
    /// External storage marker (`"FILESTORE:"`) when values are datum ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

impl DataKey {
    /// Create a scalar number data key
    pub fn scalar(source: &str, units: &str) -> Self {
        Self {
            dtype: "number".to_string(),
            shape: vec![],
            source: source.to_string(),
            units: units.to_string(),
            external: None,
        }
    }

    /// Create an array data key
    pub fn array(source: &str, shape: Vec<usize>) -> Self {
        Self {
            dtype: "array".to_string(),
            shape,
            source: source.to_string(),
            units: String::new(),
            external: None,
        }
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = shape;
        self
    }

    /// Mark values as references into external storage.
    pub fn external(mut self, marker: &str) -> Self {
        self.external = Some(marker.to_string());
        self
    }
}

/// Resource document - describes a bulk-data container written outside the run
///
/// Produced by the detector's file writer when it is staged. Consumers read it
/// back verbatim; the fly-scan core never fabricates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDoc {
    /// Unique resource ID
    pub uid: String,
    /// Handler spec (e.g. "AD_TIFF")
    pub spec: String,
    /// Portion of the path that may be remapped between machines
    pub root: String,
    /// Path relative to `root`
    pub resource_path: String,
    /// Handler arguments (template, filename, frame_per_point, ...)
    pub resource_kwargs: HashMap<String, serde_json::Value>,
    /// "posix" or "windows"
    pub path_semantics: String,
    /// Run this resource was created in, if known at creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_start: Option<String>,
}

impl ResourceDoc {
    pub fn new(spec: &str, root: &str, resource_path: &str) -> Self {
        Self {
            uid: new_uid(),
            spec: spec.to_string(),
            root: root.to_string(),
            resource_path: resource_path.to_string(),
            resource_kwargs: HashMap::new(),
            path_semantics: "posix".to_string(),
            run_start: None,
        }
    }

    pub fn with_kwarg(mut self, key: &str, value: serde_json::Value) -> Self {
        self.resource_kwargs.insert(key.to_string(), value);
        self
    }

    pub fn with_run_start(mut self, run_uid: &str) -> Self {
        self.run_start = Some(run_uid.to_string());
        self
    }
}

/// Keyword arguments a handler needs to locate one datum inside a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatumKwargs {
    /// Zero-based scan point this datum belongs to
    pub point_number: u64,
}

/// Datum document - addresses one record inside a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatumDoc {
    /// UID of the owning resource
    pub resource: String,
    /// Globally unique datum id, `"{resource}/{point_number}"`
    pub datum_id: String,
    /// Handler arguments
    pub datum_kwargs: DatumKwargs,
}

/// Event document - one row of the scan's logical data table
///
/// Values are JSON so a row can carry numbers next to datum ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDoc {
    /// Unique event ID
    pub uid: String,
    /// Links to StartDoc (for quick run lookup)
    pub run_uid: String,
    /// Links to DescriptorDoc that defines schema
    pub descriptor_uid: String,
    /// 1-based sequence number within this descriptor stream
    pub seq_num: u64,
    /// Timestamp
    pub time_ns: u64,
    /// Field values (field name -> value or datum id)
    pub data: HashMap<String, serde_json::Value>,
    /// Per-field timestamps (field name -> timestamp_ns)
    pub timestamps: HashMap<String, u64>,
    /// Whether externally stored fields have been loaded (field name -> filled)
    pub filled: HashMap<String, bool>,
}

impl EventDoc {
    pub fn new(run_uid: &str, descriptor_uid: &str, seq_num: u64) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            descriptor_uid: descriptor_uid.to_string(),
            seq_num,
            time_ns: now_ns(),
            data: HashMap::new(),
            timestamps: HashMap::new(),
            filled: HashMap::new(),
        }
    }

    /// Set the event time (shared by all fields added afterwards).
    pub fn at(mut self, time_ns: u64) -> Self {
        self.time_ns = time_ns;
        self
    }

    pub fn with_value(mut self, field: &str, value: serde_json::Value) -> Self {
        self.data.insert(field.to_string(), value);
        self.timestamps.insert(field.to_string(), self.time_ns);
        self
    }

    /// Add a field whose value is a datum id in external storage (unfilled).
    pub fn with_reference(mut self, field: &str, datum_id: &str) -> Self {
        self = self.with_value(field, serde_json::Value::from(datum_id));
        self.filled.insert(field.to_string(), false);
        self
    }
}

/// Stop document - emitted at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopDoc {
    /// Unique stop doc ID
    pub uid: String,
    /// Links to StartDoc
    pub run_uid: String,
    /// Exit status: "success" or "fail"
    pub exit_status: String,
    /// Reason for failure
    pub reason: String,
    /// Timestamp when run ended
    pub time_ns: u64,
    /// Total events emitted
    pub num_events: u64,
}

impl StopDoc {
    pub fn success(run_uid: &str, num_events: u64) -> Self {
        Self::with_status(run_uid, "success", "", num_events)
    }

    pub fn fail(run_uid: &str, reason: &str, num_events: u64) -> Self {
        Self::with_status(run_uid, "fail", reason, num_events)
    }

    fn with_status(run_uid: &str, status: &str, reason: &str, num_events: u64) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            exit_status: status.to_string(),
            reason: reason.to_string(),
            time_ns: now_ns(),
            num_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_doc_builder() {
        let doc = StartDoc::new("fly_scan", "HXN fly scan")
            .with_arg("nx", "3")
            .with_metadata("operator", "beamline")
            .with_hint("x");

        assert_eq!(doc.plan_type, "fly_scan");
        assert_eq!(doc.plan_args.get("nx"), Some(&"3".to_string()));
        assert_eq!(doc.hints, vec!["x".to_string()]);
        assert!(!doc.uid.is_empty());
    }

    #[test]
    fn test_external_data_key_serialization() {
        let key = DataKey::array("merlin1", vec![512, 256]).external("FILESTORE:");
        let value = serde_json::to_value(&key).unwrap();
        assert_eq!(value["external"], json!("FILESTORE:"));
        assert_eq!(value["shape"], json!([512, 256]));

        let scalar = serde_json::to_value(DataKey::scalar("XStart-RB", "um")).unwrap();
        assert!(scalar.get("external").is_none());
    }

    #[test]
    fn test_event_reference_is_unfilled() {
        let event = EventDoc::new("run", "desc", 1)
            .at(42)
            .with_value("x", json!(1.5))
            .with_reference("image", "res/0");

        assert_eq!(event.data["image"], json!("res/0"));
        assert_eq!(event.timestamps["x"], 42);
        assert_eq!(event.timestamps["image"], 42);
        assert_eq!(event.filled.get("image"), Some(&false));
        assert!(!event.filled.contains_key("x"));
    }

    #[test]
    fn test_document_enum_tags() {
        let datum = DatumDoc {
            resource: "res".to_string(),
            datum_id: "res/4".to_string(),
            datum_kwargs: DatumKwargs { point_number: 4 },
        };
        let doc = Document::Datum(datum);
        assert_eq!(doc.uid(), "res/4");
        assert_eq!(doc.kind(), "datum");

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["type"], json!("datum"));
        assert_eq!(value["datum_kwargs"]["point_number"], json!(4));
    }

    #[test]
    fn test_resource_doc_defaults() {
        let resource = ResourceDoc::new("AD_TIFF", "/DATA/cam", "2026/10/19/")
            .with_kwarg("frame_per_point", json!(1));
        assert_eq!(resource.path_semantics, "posix");
        assert_eq!(resource.resource_kwargs["frame_per_point"], json!(1));
        assert!(resource.run_start.is_none());
    }

    #[test]
    fn test_stop_doc_status() {
        assert_eq!(StopDoc::success("run", 6).exit_status, "success");
        let failed = StopDoc::fail("run", "boom", 0);
        assert_eq!(failed.exit_status, "fail");
        assert_eq!(failed.reason, "boom");
    }
}
