#![allow(dead_code)]

use pattern_track::core::GrayImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub const PATTERN_SIZE: usize = 200;
pub const CELL: usize = 10;
pub const BACKGROUND: u8 = 128;

/// Seeded block texture: `CELL`-sized squares with random gray values.
pub fn block_pattern(w: usize, h: usize, seed: u64) -> GrayImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let cells_x = w.div_ceil(CELL);
    let cells_y = h.div_ceil(CELL);
    let values: Vec<u8> = (0..cells_x * cells_y).map(|_| rng.random()).collect();
    let mut img = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            img.data[y * w + x] = values[(y / CELL) * cells_x + x / CELL];
        }
    }
    img
}

/// Black and white squares of side `cell`, white in the top-left corner.
pub fn checkerboard(size: usize, cell: usize) -> GrayImage {
    let mut img = GrayImage::new(size, size);
    for y in 0..size {
        for x in 0..size {
            img.data[y * size + x] = if (x / cell + y / cell) % 2 == 0 { 255 } else { 0 };
        }
    }
    img
}

pub fn default_pattern() -> GrayImage {
    block_pattern(PATTERN_SIZE, PATTERN_SIZE, 42)
}

pub fn uniform(w: usize, h: usize, value: u8) -> GrayImage {
    let mut img = GrayImage::new(w, h);
    img.data.fill(value);
    img
}

/// Copy `src` into a uniform `w × h` canvas with its top-left at `(ox, oy)`.
pub fn paste(src: &GrayImage, w: usize, h: usize, ox: usize, oy: usize) -> GrayImage {
    let mut out = uniform(w, h, BACKGROUND);
    for y in 0..src.height {
        for x in 0..src.width {
            let (tx, ty) = (x + ox, y + oy);
            if tx < w && ty < h {
                out.data[ty * w + tx] = src.data[y * src.width + x];
            }
        }
    }
    out
}

/// Nearest-neighbour 2× upsample.
pub fn upsample2x(src: &GrayImage) -> GrayImage {
    let (w, h) = (src.width * 2, src.height * 2);
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            out.data[y * w + x] = src.data[(y / 2) * src.width + x / 2];
        }
    }
    out
}

/// Interleave a gray image into BGR (all channels equal).
pub fn gray_to_bgr(src: &GrayImage) -> Vec<u8> {
    src.data.iter().flat_map(|&v| [v, v, v]).collect()
}

pub fn assert_quad_near(quad: &[nalgebra::Point2<f32>; 4], expected: &[(f32, f32); 4], tol: f32) {
    for (q, e) in quad.iter().zip(expected) {
        assert!(
            (q.x - e.0).abs() <= tol && (q.y - e.1).abs() <= tol,
            "quad {quad:?} differs from {expected:?} by more than {tol}"
        );
    }
}
