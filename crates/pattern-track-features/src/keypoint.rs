//! Keypoints, binary descriptors and the aligned set the extractor returns.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Number of bytes in a [`Descriptor`] (256 binary tests).
pub const DESCRIPTOR_BYTES: usize = 32;

/// A detected salient location in level-0 image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Corner score (FAST segment-test margin).
    pub response: f32,
    /// Orientation in radians.
    pub angle: f32,
    /// Pyramid level the keypoint was detected on.
    pub octave: u8,
}

impl Keypoint {
    #[inline]
    pub fn position(&self) -> Point2<f32> {
        Point2::new(self.x, self.y)
    }

    /// Copy of this keypoint with its position mapped through `f`.
    pub fn map_position(&self, f: impl Fn(Point2<f32>) -> Point2<f32>) -> Self {
        let p = f(self.position());
        Self {
            x: p.x,
            y: p.y,
            ..*self
        }
    }
}

/// 256-bit binary descriptor compared by Hamming distance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BYTES]);

impl Descriptor {
    #[inline]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Keypoints and their descriptors; `descriptors[i]` describes `keypoints[i]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    #[inline]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn positions(&self) -> Vec<Point2<f32>> {
        self.keypoints.iter().map(Keypoint::position).collect()
    }
}
