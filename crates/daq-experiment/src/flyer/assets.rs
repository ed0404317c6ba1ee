//! Datum generation for a storage resource.
//!
//! There is no per-frame signal from the detector, so datums are derived from
//! the point count alone. Point `n` of resource `uid` is always
//! `"{uid}/{n}"`, which lets external readers rebuild the mapping.

use daq_core::error::{FlyResult, FlyScanError};
use daq_core::experiment::document::{DatumDoc, DatumKwargs, ResourceDoc};

/// Datum id of `point_number` inside `resource_uid`.
pub fn datum_id(resource_uid: &str, point_number: usize) -> String {
    format!("{}/{}", resource_uid, point_number)
}

/// Generates datums once per scan.
#[derive(Debug, Default)]
pub struct AssetDocumentSynthesizer {
    synthesized: Option<String>,
}

impl AssetDocumentSynthesizer {
    /// Synthesizer for a fresh scan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource uid of the completed synthesis, if any.
    pub fn synthesized(&self) -> Option<&str> {
        self.synthesized.as_deref()
    }

    /// One datum per point, `point_number` ascending from zero.
    ///
    /// A second call on the same synthesizer is `DuplicateSynthesis`.
    pub fn synthesize(&mut self, resource: &ResourceDoc, count: usize) -> FlyResult<Vec<DatumDoc>> {
        if let Some(resource_uid) = &self.synthesized {
            return Err(FlyScanError::DuplicateSynthesis {
                resource_uid: resource_uid.clone(),
            });
        }
        self.synthesized = Some(resource.uid.clone());

        Ok((0..count)
            .map(|point_number| DatumDoc {
                resource: resource.uid.clone(),
                datum_id: datum_id(&resource.uid, point_number),
                datum_kwargs: DatumKwargs {
                    point_number: point_number as u64,
                },
            })
            .collect())
    }
}
