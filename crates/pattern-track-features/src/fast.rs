//! FAST-9 segment test with score-based non-maximum suppression.

use pattern_track_core::GrayImageView;

/// Bresenham circle of radius 3, clockwise from 12 o'clock.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required by the segment test.
const ARC: usize = 9;

/// A corner found on a single image (pyramid level) in that image's pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Corner {
    pub x: usize,
    pub y: usize,
    pub score: f32,
}

fn has_arc(flags: &[bool; 16]) -> bool {
    let mut run = 0usize;
    // walk the ring twice so arcs wrapping past index 15 are counted
    for i in 0..32 {
        if flags[i % 16] {
            run += 1;
            if run >= ARC {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Segment-test score of pixel `(x, y)`, or `None` when it is not a corner.
///
/// The score is the larger of the bright/dark sums of `|I - Ip| - t` over the
/// circle pixels that pass the threshold.
fn corner_score(img: &GrayImageView<'_>, x: usize, y: usize, threshold: u8) -> Option<f32> {
    let w = img.width as i32;
    let center = img.get(x, y) as i32;
    let t = threshold as i32;
    let base = y as i32 * w + x as i32;

    let mut ring = [0i32; 16];
    for (k, (dx, dy)) in CIRCLE.iter().enumerate() {
        ring[k] = img.data[(base + dy * w + dx) as usize] as i32;
    }

    // quick rejection on the four compass points: any 9-arc covers at least two
    let compass = [ring[0], ring[4], ring[8], ring[12]];
    let bright_hits = compass.iter().filter(|&&v| v > center + t).count();
    let dark_hits = compass.iter().filter(|&&v| v < center - t).count();
    if bright_hits < 2 && dark_hits < 2 {
        return None;
    }

    let mut bright = [false; 16];
    let mut dark = [false; 16];
    let mut bright_sum = 0i32;
    let mut dark_sum = 0i32;
    for k in 0..16 {
        let d = ring[k] - center;
        if d > t {
            bright[k] = true;
            bright_sum += d - t;
        } else if -d > t {
            dark[k] = true;
            dark_sum += -d - t;
        }
    }

    let bright_ok = has_arc(&bright);
    let dark_ok = has_arc(&dark);
    match (bright_ok, dark_ok) {
        (false, false) => None,
        (true, false) => Some(bright_sum as f32),
        (false, true) => Some(dark_sum as f32),
        (true, true) => Some(bright_sum.max(dark_sum) as f32),
    }
}

/// Run FAST-9 over the image interior (pixels at least `border` from the
/// edge) and keep corners that are strict maxima of their 3×3 neighbourhood.
pub(crate) fn detect_fast(img: &GrayImageView<'_>, threshold: u8, border: usize) -> Vec<Corner> {
    let (w, h) = (img.width, img.height);
    let border = border.max(3);
    if w <= 2 * border || h <= 2 * border {
        return Vec::new();
    }

    let mut scores = vec![0.0f32; w * h];
    for y in border..h - border {
        for x in border..w - border {
            if let Some(s) = corner_score(img, x, y, threshold) {
                scores[y * w + x] = s;
            }
        }
    }

    let mut corners = Vec::new();
    for y in border..h - border {
        for x in border..w - border {
            let s = scores[y * w + x];
            if s <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nb: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = (x as i32 + dx) as usize;
                    let ny = (y as i32 + dy) as usize;
                    let n = scores[ny * w + nx];
                    // ties resolve towards the earlier pixel in raster order
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if n > s || (n == s && earlier) {
                        is_max = false;
                        break 'nb;
                    }
                }
            }
            if is_max {
                corners.push(Corner { x, y, score: s });
            }
        }
    }
    corners
}
