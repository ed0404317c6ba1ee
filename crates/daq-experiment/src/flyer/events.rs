//! Lazy per-point event rows.
//!
//! Positions are interpolated from the captured trajectory, not measured. The
//! mapping from linear point number to grid cell is row-major with x varying
//! fastest, matching the raster direction of the motion controller.

use daq_core::experiment::document::{now_ns, EventDoc};
use serde_json::json;
use std::iter::FusedIterator;

use super::trajectory::TrajectoryInfo;

/// One row of the primary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FlyEvent {
    /// 1-based
    pub seq_num: u64,
    pub point_number: usize,
    pub x_index: usize,
    pub y_index: usize,
    pub x: f64,
    pub y: f64,
    /// Datum id of the frame, absent when asset collection is skipped
    pub image: Option<String>,
    /// Shared by every field of the row
    pub time_ns: u64,
}

impl FlyEvent {
    /// Convert to an event document. The image field stays unfilled.
    pub fn into_event_doc(self, run_uid: &str, descriptor_uid: &str) -> EventDoc {
        let doc = EventDoc::new(run_uid, descriptor_uid, self.seq_num)
            .at(self.time_ns)
            .with_value("x", json!(self.x))
            .with_value("y", json!(self.y));
        match &self.image {
            Some(datum_id) => doc.with_reference("image", datum_id),
            None => doc,
        }
    }
}

/// Finite, non-restartable sequence of [`FlyEvent`]s.
///
/// Rows are built on demand; `seq_num` increases by one per row.
#[derive(Debug)]
pub struct EventSequence {
    trajectory: TrajectoryInfo,
    datum_ids: std::vec::IntoIter<String>,
    next_point: usize,
    total: usize,
}

impl EventSequence {
    /// Pair each point with the datum of the same point number.
    pub fn new(trajectory: TrajectoryInfo, datum_ids: Vec<String>) -> Self {
        let total = trajectory.num_points();
        Self {
            trajectory,
            datum_ids: datum_ids.into_iter(),
            next_point: 0,
            total,
        }
    }

    /// Rows without image references.
    pub fn positions_only(trajectory: TrajectoryInfo) -> Self {
        Self::new(trajectory, Vec::new())
    }

    /// Trajectory the rows are derived from.
    pub fn trajectory(&self) -> &TrajectoryInfo {
        &self.trajectory
    }
}

impl Iterator for EventSequence {
    type Item = FlyEvent;

    fn next(&mut self) -> Option<FlyEvent> {
        if self.next_point >= self.total {
            return None;
        }
        let point = self.trajectory.point(self.next_point);
        self.next_point += 1;
        Some(FlyEvent {
            seq_num: self.next_point as u64,
            point_number: point.point_number,
            x_index: point.x_index,
            y_index: point.y_index,
            x: point.x,
            y: point.y,
            image: self.datum_ids.next(),
            time_ns: now_ns(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next_point;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for EventSequence {}

impl FusedIterator for EventSequence {}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::flyer::assets::datum_id;

    fn trajectory(nx: usize, ny: usize) -> TrajectoryInfo {
        TrajectoryInfo {
            x_start: -1.0,
            x_stop: 1.0,
            nx,
            y_start: 0.0,
            y_stop: 0.5,
            ny,
            trigger_rate: 7.0,
        }
    }

    #[test]
    fn test_sequence_numbers_and_references() {
        let ids: Vec<String> = (0..6).map(|n| datum_id("res", n)).collect();
        let events: Vec<FlyEvent> = EventSequence::new(trajectory(3, 2), ids).collect();

        assert_eq!(events.len(), 6);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.seq_num, i as u64 + 1);
            assert_eq!(event.point_number, i);
            assert_eq!(event.image.as_deref(), Some(format!("res/{}", i).as_str()));
        }
        assert_eq!((events[4].x_index, events[4].y_index), (1, 1));
        assert_eq!(events[4].x, 0.0);
        assert_eq!(events[4].y, 0.5);
    }

    #[test]
    fn test_exact_size_and_fused() {
        let mut seq = EventSequence::positions_only(trajectory(2, 2));
        assert_eq!(seq.len(), 4);
        seq.next();
        assert_eq!(seq.len(), 3);
        let rest: Vec<_> = seq.by_ref().collect();
        assert_eq!(rest.len(), 3);
        assert!(rest.iter().all(|e| e.image.is_none()));
        assert!(seq.next().is_none());
        assert!(seq.next().is_none());
    }

    #[test]
    fn test_event_doc_marks_image_unfilled() {
        let event = EventSequence::new(trajectory(1, 1), vec!["res/0".to_string()])
            .next()
            .unwrap();
        let doc = event.clone().into_event_doc("run", "desc");

        assert_eq!(doc.seq_num, 1);
        assert_eq!(doc.time_ns, event.time_ns);
        assert_eq!(doc.data["x"], json!(-1.0));
        assert_eq!(doc.data["y"], json!(0.0));
        assert_eq!(doc.data["image"], json!("res/0"));
        assert_eq!(doc.filled.get("image"), Some(&false));
        assert_eq!(doc.timestamps["image"], event.time_ns);
        assert!(!doc.filled.contains_key("x"));
    }
}
