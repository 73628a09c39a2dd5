//! Planar image pattern tracking.
//!
//! Register a reference image, then feed frames: each frame is described
//! with ORB-style features, matched against the pattern, and a robust
//! homography maps the pattern outline into the frame. An optional second
//! pass warps the frame into the pattern frame and refines the estimate.
//! With camera intrinsics the tracker also recovers the camera pose.
//!
//! ## Quickstart
//!
//! ```no_run
//! use pattern_track::{detect, PatternTracker, TrackerParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pattern = detect::load_image_buffer("pattern.png")?;
//! let frame = detect::load_image_buffer("frame.png")?;
//!
//! let mut tracker = PatternTracker::new(TrackerParams::default(), None);
//! tracker.register_pattern(&pattern.view())?;
//! match tracker.process_frame(&frame.view()) {
//!     Ok(result) => println!("quad: {:?}", result.quad),
//!     Err(err) => println!("not found: {err}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `pattern_track::core`: image buffers, homographies, camera model, logging.
//! - `pattern_track::features`: ORB extractor and Hamming matcher.
//! - `pattern_track::geometry`: RANSAC homography and planar pose solver.
//! - [`PatternTracker`]: synchronous pipeline.
//! - [`AsyncTracker`]: the same pipeline on a worker thread with a latest-wins
//!   frame slot.
//! - `pattern_track::detect` (feature `image`): helpers for `image` crate buffers.

pub use pattern_track_core as core;
pub use pattern_track_features as features;
pub use pattern_track_geometry as geometry;

mod async_tracker;
mod error;
mod io;
mod params;
mod pattern;
mod tracker;

#[cfg(feature = "image")]
pub mod detect;

pub use async_tracker::{AsyncTracker, TrackerSnapshot};
pub use error::{AsyncError, TrackError};
pub use io::{load_camera_json, FrameReport, TrackConfig, TrackIoError, TrackReport};
pub use params::{AsyncParams, RefinementFailurePolicy, TrackerParams};
pub use pattern::Pattern;
pub use tracker::{
    estimate_homography, extract_features, quad_is_plausible, PatternTracker, TrackingResult,
};

pub use pattern_track_core::{CameraIntrinsics, Distortion, Homography, ImageBuffer, ImageView};
pub use pattern_track_features::{Keypoint, Match};
pub use pattern_track_geometry::Pose;
