//! Binary keypoint extraction and descriptor matching.
//!
//! [`OrbExtractor`] detects oriented FAST corners over a scale pyramid and
//! describes them with a rotated 256-bit BRIEF pattern. [`BruteForceMatcher`]
//! pairs descriptors by Hamming distance and [`match_descriptors`] applies the
//! optional nearest/second-nearest ratio test.
//!
//! ```
//! use pattern_track_core::GrayImage;
//! use pattern_track_features::{FeatureExtractor, OrbExtractor};
//!
//! let img = GrayImage::new(64, 64);
//! let features = OrbExtractor::default().detect_and_describe(&img.view());
//! assert!(features.is_empty());
//! ```

mod extractor;
mod fast;
mod keypoint;
mod matcher;
mod orb;

pub use extractor::FeatureExtractor;
pub use keypoint::{Descriptor, FeatureSet, Keypoint, DESCRIPTOR_BYTES};
pub use matcher::{
    match_descriptors, ratio_test, BruteForceMatcher, DescriptorMatcher, Match, RATIO_TEST_FACTOR,
};
pub use orb::{OrbExtractor, OrbParams, PATCH_RADIUS};
