use pattern_track_core::Interpolation;
use pattern_track_features::OrbParams;
use pattern_track_geometry::RansacParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to publish when the rough homography succeeds but refinement fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementFailurePolicy {
    /// Treat the frame as not found.
    #[default]
    Reject,
    /// Publish the rough homography.
    FallBackToRough,
}

/// Parameters of [`PatternTracker`](crate::PatternTracker).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Filter matches with the nearest/second-nearest distance ratio.
    pub ratio_test: bool,
    /// Run the second, warped-image homography pass.
    pub homography_refinement: bool,
    /// RANSAC inlier distance in pixels.
    pub reprojection_threshold: f32,
    /// Minimum match count; an accepted homography needs strictly more inliers.
    pub min_matches: usize,
    /// Frame downscale factor in `(0, 1]` applied before processing.
    pub rescale: f32,
    pub refinement_failure: RefinementFailurePolicy,
    /// Uniform border, in pattern pixels, placed around the pattern before
    /// feature extraction and around the refinement canvas. Corners on the
    /// pattern outline are only detectable with this context.
    pub pattern_margin: usize,
    /// Kernel used to warp the frame into the pattern frame during refinement.
    pub refinement_interpolation: Interpolation,
    pub extractor: OrbParams,
    pub ransac: RansacParams,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            ratio_test: true,
            homography_refinement: true,
            reprojection_threshold: 3.0,
            min_matches: 6,
            rescale: 1.0,
            refinement_failure: RefinementFailurePolicy::default(),
            pattern_margin: 24,
            refinement_interpolation: Interpolation::Bicubic,
            extractor: OrbParams::default(),
            ransac: RansacParams::default(),
        }
    }
}

impl TrackerParams {
    /// Check values that would otherwise fail deep inside a frame.
    pub fn validate_rescale(&self) -> Result<(), crate::TrackError> {
        let r = self.rescale;
        if r.is_finite() && r > 0.0 && r <= 1.0 {
            Ok(())
        } else {
            Err(crate::TrackError::InvalidRescale(r))
        }
    }
}

/// Parameters of [`AsyncTracker`](crate::AsyncTracker).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncParams {
    /// Worker sleep when no new frame is pending, in milliseconds.
    pub idle_sleep_ms: u64,
    /// Upper bound on waiting for the worker to stop, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for AsyncParams {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 4,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl AsyncParams {
    #[inline]
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    #[inline]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
