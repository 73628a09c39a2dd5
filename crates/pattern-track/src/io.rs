//! JSON configuration and report helpers.

use crate::{AsyncParams, PatternTracker, TrackError, TrackerParams, TrackerSnapshot};
use pattern_track_core::CameraIntrinsics;
use pattern_track_geometry::Pose;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

#[derive(thiserror::Error, Debug)]
pub enum TrackIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "image")]
    #[error(transparent)]
    Image(#[from] ::image::ImageError),
}

fn read_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T, TrackIoError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_pretty<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<(), TrackIoError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Everything needed to set up a tracker from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    #[serde(default)]
    pub tracker: TrackerParams,
    #[serde(default)]
    pub camera: Option<CameraIntrinsics>,
    #[serde(default, rename = "async")]
    pub async_params: Option<AsyncParams>,
}

impl TrackConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, TrackIoError> {
        read_json(path)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), TrackIoError> {
        write_pretty(self, path)
    }

    /// Build a tracker with the default backends.
    pub fn build_tracker(&self) -> PatternTracker {
        PatternTracker::new(self.tracker.clone(), self.camera)
    }
}

/// Load camera intrinsics stored as JSON.
pub fn load_camera_json(path: impl AsRef<Path>) -> Result<CameraIntrinsics, TrackIoError> {
    read_json(path)
}

/// Tracking outcome of a single frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame: String,
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub num_features: usize,
    pub num_matches: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quad: Option<[[f32; 2]; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homography: Option<[[f64; 3]; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rvec: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvec: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time_ms: Option<f64>,
}

fn duration_ms(d: Option<Duration>) -> Option<f64> {
    d.map(|d| d.as_secs_f64() * 1e3)
}

fn pose_arrays(pose: Option<Pose>) -> (Option<[f64; 3]>, Option<[f64; 3]>) {
    match pose {
        Some(p) => (
            Some([p.rvec.x, p.rvec.y, p.rvec.z]),
            Some([p.tvec.x, p.tvec.y, p.tvec.z]),
        ),
        None => (None, None),
    }
}

impl FrameReport {
    /// Report the latest frame of a synchronous tracker.
    ///
    /// Geometry is only reported for found frames.
    pub fn from_tracker(
        frame: impl Into<String>,
        tracker: &PatternTracker,
        outcome: &Result<crate::TrackingResult, TrackError>,
    ) -> Self {
        let mut report = Self {
            frame: frame.into(),
            found: outcome.is_ok(),
            error: outcome.as_ref().err().map(ToString::to_string),
            num_features: tracker.num_features(),
            num_matches: tracker.num_matches(),
            update_time_ms: duration_ms(tracker.last_update_time()),
            ..Self::default()
        };
        if let Ok(result) = outcome {
            report.set_geometry(Some(result.quad), Some(result.homography.to_array()), result.pose);
        }
        report
    }

    /// Report a snapshot published by the asynchronous tracker.
    pub fn from_snapshot(frame: impl Into<String>, snapshot: &TrackerSnapshot) -> Self {
        let mut report = Self {
            frame: frame.into(),
            found: snapshot.found,
            num_features: snapshot.query_keypoints.len(),
            num_matches: snapshot.matches.len(),
            update_time_ms: duration_ms(snapshot.update_time),
            ..Self::default()
        };
        if snapshot.found {
            report.set_geometry(
                snapshot.quad,
                snapshot.homography.map(|h| h.to_array()),
                snapshot.pose,
            );
        }
        report
    }

    fn set_geometry(
        &mut self,
        quad: Option<[nalgebra::Point2<f32>; 4]>,
        homography: Option<[[f64; 3]; 3]>,
        pose: Option<Pose>,
    ) {
        self.quad = quad.map(|q| q.map(|p| [p.x, p.y]));
        self.homography = homography;
        (self.rvec, self.tvec) = pose_arrays(pose);
    }
}

/// Report written by the `pattern-track` CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackReport {
    pub pattern: String,
    pub pattern_width: usize,
    pub pattern_height: usize,
    pub pattern_keypoints: usize,
    pub frames: Vec<FrameReport>,
}

impl TrackReport {
    /// Load a JSON report from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, TrackIoError> {
        read_json(path)
    }

    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), TrackIoError> {
        write_pretty(self, path)
    }

    pub fn found_count(&self) -> usize {
        self.frames.iter().filter(|f| f.found).count()
    }
}
