use pattern_track_core::ImageError;
use pattern_track_geometry::PoseError;

/// Per-frame tracking failures.
///
/// Every variant is local to the frame (or registration) that raised it: the
/// tracker keeps its last successful geometry and simply reports not-found.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("no pattern registered")]
    NoPattern,

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("rescale factor must be in (0, 1], got {0}")]
    InvalidRescale(f32),

    #[error("no features could be extracted")]
    NoFeatures,

    #[error("not enough matches (found {found}, required {required})")]
    InsufficientMatches { found: usize, required: usize },

    #[error("homography rejected (inliers {inliers}, required more than {required})")]
    HomographyRejected { inliers: usize, required: usize },

    #[error("refined homography rejected (inliers {inliers}, required more than {required})")]
    RefinementRejected { inliers: usize, required: usize },

    #[error("projected outline is not a convex, positively oriented quad")]
    ImplausibleQuad,

    #[error(transparent)]
    Pose(#[from] PoseError),
}

/// Failures of the asynchronous wrapper.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AsyncError {
    #[error("tracking worker did not stop within {0:?}")]
    WorkerTimeout(std::time::Duration),

    #[error("tracking worker terminated without returning the tracker")]
    WorkerLost,

    #[error(transparent)]
    Track(#[from] TrackError),
}
