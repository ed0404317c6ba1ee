//! Scan geometry captured once per scan.
//!
//! The motion controller owns the raster; the coordinator only snapshots its
//! readbacks at kickoff and derives every point position from that snapshot.

use daq_core::capabilities::{value_as_f64, Settable};
use daq_core::error::{FlyResult, FlyScanError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

use super::signals::FlyerSignals;

/// Immutable snapshot of the raster parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryInfo {
    pub x_start: f64,
    pub x_stop: f64,
    pub nx: usize,
    pub y_start: f64,
    pub y_stop: f64,
    pub ny: usize,
    pub trigger_rate: f64,
}

/// Grid position of one scan point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub point_number: usize,
    pub x_index: usize,
    pub y_index: usize,
    pub x: f64,
    pub y: f64,
}

/// Linear interpolation of `index` over `count` evenly spaced positions.
///
/// Returns `start` when `count <= 1`.
pub fn interpolate(start: f64, stop: f64, count: usize, index: usize) -> f64 {
    if count <= 1 {
        return start;
    }
    start + index as f64 * (stop - start) / (count - 1) as f64
}

impl TrajectoryInfo {
    /// Total number of points (`nx * ny`), saturating.
    ///
    /// Exact for every trajectory that passed [`TrajectoryInfo::validate`].
    pub fn num_points(&self) -> usize {
        self.nx.saturating_mul(self.ny)
    }

    /// Expected raster duration at the configured trigger rate.
    pub fn nominal_duration(&self) -> Option<Duration> {
        if self.trigger_rate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(self.num_points() as f64 / self.trigger_rate).ok()
    }

    /// Reject geometry that cannot describe a raster.
    pub fn validate(&self) -> FlyResult<()> {
        if self.nx < 1 || self.ny < 1 {
            return Err(FlyScanError::InvalidTrajectory(format!(
                "point counts must be at least 1 (nx={}, ny={})",
                self.nx, self.ny
            )));
        }
        if self.nx.checked_mul(self.ny).is_none() {
            return Err(FlyScanError::InvalidTrajectory(format!(
                "raster of {} x {} points overflows the point counter",
                self.nx, self.ny
            )));
        }
        let bounds = [self.x_start, self.x_stop, self.y_start, self.y_stop];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(FlyScanError::InvalidTrajectory(format!(
                "axis bounds must be finite: {:?}",
                bounds
            )));
        }
        Ok(())
    }

    /// Row-major position of `point_number`; x is the fast axis.
    pub fn point(&self, point_number: usize) -> GridPoint {
        let x_index = point_number % self.nx;
        let y_index = point_number / self.nx;
        GridPoint {
            point_number,
            x_index,
            y_index,
            x: interpolate(self.x_start, self.x_stop, self.nx, x_index),
            y: interpolate(self.y_start, self.y_stop, self.ny, y_index),
        }
    }
}

/// Detector frame size, for descriptive metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub height: usize,
    pub width: usize,
}

impl FrameGeometry {
    /// Read the array size from the detector.
    pub async fn capture<D: Settable + ?Sized>(
        detector: &D,
        height_signal: &str,
        width_signal: &str,
        read_timeout: Duration,
    ) -> FlyResult<Self> {
        let height = read_number(detector, height_signal, read_timeout).await?;
        let width = read_number(detector, width_signal, read_timeout).await?;
        Ok(Self {
            height: to_count(height_signal, height)?,
            width: to_count(width_signal, width)?,
        })
    }
}

/// Reads the trajectory readbacks from the motion controller.
#[derive(Debug, Clone)]
pub struct TrajectoryConfig {
    x_start: String,
    x_stop: String,
    nx: String,
    y_start: String,
    y_stop: String,
    ny: String,
    trigger_rate: String,
    read_timeout: Duration,
}

impl TrajectoryConfig {
    pub fn from_signals(signals: &FlyerSignals, read_timeout: Duration) -> Self {
        Self {
            x_start: signals.x_start.readback.clone(),
            x_stop: signals.x_stop.readback.clone(),
            nx: signals.nx.readback.clone(),
            y_start: signals.y_start.readback.clone(),
            y_stop: signals.y_stop.readback.clone(),
            ny: signals.ny.readback.clone(),
            trigger_rate: signals.trigger_rate.readback.clone(),
            read_timeout,
        }
    }

    /// Snapshot all readbacks.
    ///
    /// Each read is bounded by the read timeout; a missing or non-numeric
    /// readback is `ConfigUnavailable`, a count below one is `InvalidTrajectory`.
    pub async fn capture<C: Settable + ?Sized>(&self, controller: &C) -> FlyResult<TrajectoryInfo> {
        let t = self.read_timeout;
        let (x_start, x_stop, nx, y_start, y_stop, ny, trigger_rate) = tokio::try_join!(
            read_number(controller, &self.x_start, t),
            read_number(controller, &self.x_stop, t),
            read_number(controller, &self.nx, t),
            read_number(controller, &self.y_start, t),
            read_number(controller, &self.y_stop, t),
            read_number(controller, &self.ny, t),
            read_number(controller, &self.trigger_rate, t),
        )?;

        let info = TrajectoryInfo {
            x_start,
            x_stop,
            nx: to_count(&self.nx, nx)?,
            y_start,
            y_stop,
            ny: to_count(&self.ny, ny)?,
            trigger_rate,
        };
        info.validate()?;
        Ok(info)
    }
}

async fn read_number<D: Settable + ?Sized>(
    device: &D,
    signal: &str,
    read_timeout: Duration,
) -> FlyResult<f64> {
    let unavailable = |cause: String| FlyScanError::ConfigUnavailable {
        signal: signal.to_string(),
        cause,
    };
    let value = timeout(read_timeout, device.get_value(signal))
        .await
        .map_err(|_| unavailable(format!("no response within {:?}", read_timeout)))?
        .map_err(|e| unavailable(e.to_string()))?;
    value_as_f64(&value).ok_or_else(|| unavailable(format!("non-numeric value {}", value)))
}

/// Counts are read as floats; truncate like an integer readback would.
fn to_count(signal: &str, value: f64) -> FlyResult<usize> {
    if !value.is_finite() || value < 1.0 {
        return Err(FlyScanError::InvalidTrajectory(format!(
            "'{}' must be a count of at least 1, got {}",
            signal, value
        )));
    }
    Ok(value.trunc() as usize)
}
