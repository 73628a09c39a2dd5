//! Core types for planar pattern tracking.
//!
//! This crate is intentionally small: 8-bit image buffers and resampling,
//! planar homographies, pinhole camera intrinsics and, with the `tracing`
//! feature, a subscriber setup. It does *not* know about features, matching
//! or tracking.

mod camera;
mod homography;
mod image;
#[cfg(feature = "tracing")]
mod logger;

pub use camera::{CameraIntrinsics, Distortion};
pub use homography::{
    estimate_homography, homography_from_4pt, warp_perspective_gray, Homography, Interpolation,
};
pub use image::{
    gaussian_blur, mean_intensity, pad_uniform, resize_bilinear, sample_bicubic,
    sample_bicubic_u8, sample_bilinear, sample_bilinear_u8, to_gray, GrayImage, GrayImageView,
    ImageBuffer, ImageError, ImageView,
};

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, TraceFormat};
