//! 8-bit image buffers, grayscale conversion and resampling.
//!
//! Pixel centres sit on integer coordinates: pixel `(x, y)` covers
//! `[x - 0.5, x + 0.5) × [y - 0.5, y + 0.5)`. Every sampler and resize helper
//! in this module uses that convention.

use std::borrow::Cow;

/// Errors raised when wrapping or converting image buffers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),
    #[error("invalid image buffer length (expected {expected} bytes, got {got})")]
    BufferSize { expected: usize, got: usize },
    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Black image of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height],
        }
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

impl<'a> GrayImageView<'a> {
    /// Pixel at `(x, y)`; panics when out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn to_owned_image(&self) -> GrayImage {
        GrayImage {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }
}

/// Borrowed interleaved 8-bit image.
///
/// Supported layouts are 1 channel (gray), 3 channels (BGR) and 4 channels
/// (BGRA). Other channel counts can be wrapped but are rejected by
/// [`to_gray`].
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8],
}

impl<'a> ImageView<'a> {
    /// Wrap a raw interleaved buffer, validating its length.
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: &'a [u8],
    ) -> Result<Self, ImageError> {
        let expected = checked_len(width, height, channels)?;
        if data.len() != expected {
            return Err(ImageError::BufferSize {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Check that `data` holds exactly `width * height * channels` bytes.
    ///
    /// Views built as struct literals skip the check in [`new`](Self::new).
    pub fn validate(&self) -> Result<(), ImageError> {
        let expected = checked_len(self.width, self.height, self.channels)?;
        if self.data.len() != expected {
            return Err(ImageError::BufferSize {
                expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }
}

impl<'a> From<GrayImageView<'a>> for ImageView<'a> {
    fn from(view: GrayImageView<'a>) -> Self {
        Self {
            width: view.width,
            height: view.height,
            channels: 1,
            data: view.data,
        }
    }
}

/// Owned interleaved 8-bit image; the storage is reused by [`copy_from`](Self::copy_from).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageBuffer {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl ImageBuffer {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        ImageView::new(width, height, channels, &data)?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    #[inline]
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: &self.data,
        }
    }

    /// Overwrite this buffer with `src`, keeping the allocation when it is large enough.
    pub fn copy_from(&mut self, src: &ImageView<'_>) {
        self.width = src.width;
        self.height = src.height;
        self.channels = src.channels;
        self.data.clear();
        self.data.extend_from_slice(src.data);
    }
}

impl From<GrayImage> for ImageBuffer {
    fn from(img: GrayImage) -> Self {
        Self {
            width: img.width,
            height: img.height,
            channels: 1,
            data: img.data,
        }
    }
}

fn checked_len(width: usize, height: usize, channels: usize) -> Result<usize, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }
    width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(ImageError::InvalidDimensions { width, height })
}

// ITU-R BT.601 luma weights in 14-bit fixed point; they sum to 1 << 14.
const GRAY_W_B: u32 = 1868;
const GRAY_W_G: u32 = 9617;
const GRAY_W_R: u32 = 4899;
const GRAY_SHIFT: u32 = 14;

#[inline]
fn bgr_to_gray(b: u8, g: u8, r: u8) -> u8 {
    let acc = b as u32 * GRAY_W_B + g as u32 * GRAY_W_G + r as u32 * GRAY_W_R;
    ((acc + (1 << (GRAY_SHIFT - 1))) >> GRAY_SHIFT) as u8
}

/// Convert an image to single-channel gray pixels.
///
/// The buffer length is checked first, so an inconsistent view is an error
/// rather than an out-of-bounds read later on.
///
/// - 1 channel: returned as-is (borrowed, no copy),
/// - 3 channels: interpreted as BGR,
/// - 4 channels: interpreted as BGRA, alpha ignored.
///
/// Both colour layouts use `Y = 0.299 R + 0.587 G + 0.114 B`.
pub fn to_gray<'a>(image: &ImageView<'a>) -> Result<Cow<'a, [u8]>, ImageError> {
    image.validate()?;
    match image.channels {
        1 => Ok(Cow::Borrowed(image.data)),
        c @ (3 | 4) => Ok(Cow::Owned(
            image
                .data
                .chunks_exact(c)
                .map(|px| bgr_to_gray(px[0], px[1], px[2]))
                .collect(),
        )),
        c => Err(ImageError::UnsupportedChannels(c)),
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
fn get_gray_clamped(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    let x = x.clamp(0, src.width as i32 - 1) as usize;
    let y = y.clamp(0, src.height as i32 - 1) as usize;
    src.data[y * src.width + x]
}

/// Bilinear sample; pixels outside the image read as 0.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).round().clamp(0.0, 255.0) as u8
}

// Keys cubic convolution kernel with a = -0.75.
const CUBIC_A: f32 = -0.75;

#[inline]
fn cubic_weights(t: f32) -> [f32; 4] {
    let w0 = ((CUBIC_A * (t + 1.0) - 5.0 * CUBIC_A) * (t + 1.0) + 8.0 * CUBIC_A) * (t + 1.0)
        - 4.0 * CUBIC_A;
    let w1 = ((CUBIC_A + 2.0) * t - (CUBIC_A + 3.0)) * t * t + 1.0;
    let u = 1.0 - t;
    let w2 = ((CUBIC_A + 2.0) * u - (CUBIC_A + 3.0)) * u * u + 1.0;
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

/// Bicubic sample over the 4×4 neighbourhood; pixels outside the image read as 0.
pub fn sample_bicubic(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let wx = cubic_weights(x - x0 as f32);
    let wy = cubic_weights(y - y0 as f32);

    let mut acc = 0.0f32;
    for (j, wyj) in wy.iter().enumerate() {
        let yy = y0 - 1 + j as i32;
        let mut row = 0.0f32;
        for (i, wxi) in wx.iter().enumerate() {
            row += wxi * get_gray(src, x0 - 1 + i as i32, yy) as f32;
        }
        acc += wyj * row;
    }
    acc
}

#[inline]
pub fn sample_bicubic_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bicubic(src, x, y).round().clamp(0.0, 255.0) as u8
}

/// Resize with bilinear interpolation and replicated borders.
///
/// Output pixel `x` samples the source at `(x + 0.5) · sw / dw - 0.5`, so an
/// exact 2× downscale averages each 2×2 block.
pub fn resize_bilinear(src: &GrayImageView<'_>, out_w: usize, out_h: usize) -> GrayImage {
    let mut out = GrayImage::new(out_w, out_h);
    if out_w == 0 || out_h == 0 || src.width == 0 || src.height == 0 {
        return out;
    }
    let sx = src.width as f32 / out_w as f32;
    let sy = src.height as f32 / out_h as f32;

    for y in 0..out_h {
        let fy_src = ((y as f32 + 0.5) * sy - 0.5).max(0.0);
        let y0 = fy_src.floor() as i32;
        let fy = fy_src - y0 as f32;
        for x in 0..out_w {
            let fx_src = ((x as f32 + 0.5) * sx - 0.5).max(0.0);
            let x0 = fx_src.floor() as i32;
            let fx = fx_src - x0 as f32;

            let p00 = get_gray_clamped(src, x0, y0) as f32;
            let p10 = get_gray_clamped(src, x0 + 1, y0) as f32;
            let p01 = get_gray_clamped(src, x0, y0 + 1) as f32;
            let p11 = get_gray_clamped(src, x0 + 1, y0 + 1) as f32;
            let a = p00 + fx * (p10 - p00);
            let b = p01 + fx * (p11 - p01);
            out.data[y * out_w + x] = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Separable Gaussian blur with replicated borders.
pub fn gaussian_blur(src: &GrayImageView<'_>, sigma: f32, radius: usize) -> GrayImage {
    let (w, h) = (src.width, src.height);
    if radius == 0 || sigma <= 0.0 || w == 0 || h == 0 {
        return src.to_owned_image();
    }

    let r = radius as i32;
    let mut kernel: Vec<f32> = (-r..=r)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }

    let mut tmp = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, wk) in kernel.iter().enumerate() {
                acc += wk * get_gray_clamped(src, x as i32 + k as i32 - r, y as i32) as f32;
            }
            tmp[y * w + x] = acc;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, wk) in kernel.iter().enumerate() {
                let yy = (y as i32 + k as i32 - r).clamp(0, h as i32 - 1) as usize;
                acc += wk * tmp[yy * w + x];
            }
            out.data[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Mean intensity, rounded to the nearest level; 0 for an empty image.
pub fn mean_intensity(src: &GrayImageView<'_>) -> u8 {
    let n = src.data.len() as u64;
    if n == 0 {
        return 0;
    }
    let sum: u64 = src.data.iter().map(|&v| v as u64).sum();
    ((sum + n / 2) / n) as u8
}

/// Surround `src` with a `margin`-pixel border of constant `value`.
pub fn pad_uniform(src: &GrayImageView<'_>, margin: usize, value: u8) -> GrayImage {
    let w = src.width + 2 * margin;
    let h = src.height + 2 * margin;
    let mut out = GrayImage {
        width: w,
        height: h,
        data: vec![value; w * h],
    };
    for (y, row) in src.data.chunks_exact(src.width.max(1)).enumerate() {
        let start = (y + margin) * w + margin;
        out.data[start..start + row.len()].copy_from_slice(row);
    }
    out
}
