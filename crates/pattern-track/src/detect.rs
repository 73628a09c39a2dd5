//! Helpers for feeding `image` crate buffers to the tracker.

use crate::TrackIoError;
use ::image::{DynamicImage, ImageReader};
use pattern_track_core::{ImageBuffer, ImageView};
use std::path::Path;

/// Borrow an `image::GrayImage` as a single-channel view.
pub fn gray_view(img: &::image::GrayImage) -> ImageView<'_> {
    ImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        channels: 1,
        data: img.as_raw(),
    }
}

fn swap_red_blue(data: &mut [u8], channels: usize) {
    for px in data.chunks_exact_mut(channels) {
        px.swap(0, 2);
    }
}

/// Convert a decoded image into an owned buffer in the tracker's channel
/// order: gray stays single-channel, RGB becomes BGR and RGBA becomes BGRA.
/// Other layouts (16-bit, float, gray+alpha) are converted to 8-bit first.
pub fn image_buffer_from_dynamic(img: &DynamicImage) -> ImageBuffer {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let (channels, mut data) = match img {
        DynamicImage::ImageLuma8(gray) => (1, gray.as_raw().clone()),
        DynamicImage::ImageRgb8(rgb) => (3, rgb.as_raw().clone()),
        DynamicImage::ImageRgba8(rgba) => (4, rgba.as_raw().clone()),
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            (1, img.to_luma8().into_raw())
        }
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => (3, img.to_rgb8().into_raw()),
        _ => (4, img.to_rgba8().into_raw()),
    };
    if channels > 1 {
        swap_red_blue(&mut data, channels);
    }
    ImageBuffer {
        width,
        height,
        channels,
        data,
    }
}

/// Decode an image file into a tracker buffer.
pub fn load_image_buffer(path: impl AsRef<Path>) -> Result<ImageBuffer, TrackIoError> {
    let img = ImageReader::open(path)?.decode()?;
    Ok(image_buffer_from_dynamic(&img))
}
