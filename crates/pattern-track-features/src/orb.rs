//! Oriented FAST keypoints with rotated BRIEF descriptors over a scale pyramid.

use crate::fast::{detect_fast, Corner};
use crate::{Descriptor, FeatureExtractor, FeatureSet, Keypoint, DESCRIPTOR_BYTES};
use pattern_track_core::{gaussian_blur, resize_bilinear, GrayImageView};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Half side of the square descriptor patch (31×31).
pub const PATCH_RADIUS: i32 = 15;

/// Keypoints closer than this to a level border are discarded, so the
/// orientation disc and every rotated test point stay inside the image.
const EDGE_BORDER: usize = PATCH_RADIUS as usize + 1;

/// Gaussian support in sigmas on either side of the centre tap.
const BLUR_SUPPORT: f32 = 3.0;

const PAIR_COUNT: usize = DESCRIPTOR_BYTES * 8;
const PATTERN_SEED: u64 = 0x0b1e_c7ed_5eed_2011;

/// Parameters for [`OrbExtractor`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
    /// Global cap on the number of keypoints.
    pub max_features: usize,
    /// Number of pyramid levels (level 0 is the input image).
    pub levels: usize,
    /// Linear downscale between consecutive levels.
    pub scale_factor: f32,
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Gaussian sigma applied before sampling the binary tests.
    pub blur_sigma: f32,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            max_features: 500,
            levels: 4,
            scale_factor: std::f32::consts::SQRT_2,
            fast_threshold: 20,
            blur_sigma: 2.0,
        }
    }
}

/// Kernel radius covering `BLUR_SUPPORT` sigmas; 0 disables blurring.
fn blur_radius(sigma: f32) -> usize {
    if sigma.is_finite() && sigma > 0.0 {
        (BLUR_SUPPORT * sigma).ceil() as usize
    } else {
        0
    }
}

/// A test pair of the rotated BRIEF pattern, in patch coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TestPair {
    a: (f32, f32),
    b: (f32, f32),
}

/// Sample the binary test pattern: point pairs uniformly distributed in the
/// radius-15 disc, fixed by a constant seed.
fn brief_pattern() -> Vec<TestPair> {
    let mut rng = ChaCha8Rng::seed_from_u64(PATTERN_SEED);
    let r2 = PATCH_RADIUS * PATCH_RADIUS;
    let sample = |rng: &mut ChaCha8Rng| loop {
        let x = rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS);
        let y = rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS);
        if x * x + y * y <= r2 {
            return (x, y);
        }
    };

    let mut pairs = Vec::with_capacity(PAIR_COUNT);
    while pairs.len() < PAIR_COUNT {
        let a = sample(&mut rng);
        let b = sample(&mut rng);
        if a == b {
            continue;
        }
        pairs.push(TestPair {
            a: (a.0 as f32, a.1 as f32),
            b: (b.0 as f32, b.1 as f32),
        });
    }
    pairs
}

/// Per-row half widths of the orientation disc.
fn disc_half_widths() -> Vec<i32> {
    let r = PATCH_RADIUS;
    (0..=r)
        .map(|dy| (((r * r - dy * dy) as f32).sqrt()).floor() as i32)
        .collect()
}

/// One pyramid level plus the factors that map it back to level 0.
struct Level<'a> {
    width: usize,
    height: usize,
    data: Cow<'a, [u8]>,
    scale_x: f32,
    scale_y: f32,
}

impl Level<'_> {
    fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

/// ORB-style feature extractor.
///
/// Every pyramid level is resampled directly from the input image.
#[derive(Clone, Debug)]
pub struct OrbExtractor {
    params: OrbParams,
    pattern: Vec<TestPair>,
    half_widths: Vec<i32>,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(OrbParams::default())
    }
}

impl OrbExtractor {
    pub fn new(params: OrbParams) -> Self {
        Self {
            params,
            pattern: brief_pattern(),
            half_widths: disc_half_widths(),
        }
    }

    #[inline]
    pub fn params(&self) -> &OrbParams {
        &self.params
    }

    fn build_pyramid<'a>(&self, image: &GrayImageView<'a>) -> Vec<Level<'a>> {
        let levels = self.params.levels.max(1);
        let factor = if self.params.scale_factor > 1.0 {
            self.params.scale_factor
        } else {
            OrbParams::default().scale_factor
        };
        let min_side = 2 * EDGE_BORDER + 1;

        let mut out = vec![Level {
            width: image.width,
            height: image.height,
            data: Cow::Borrowed(image.data),
            scale_x: 1.0,
            scale_y: 1.0,
        }];
        for i in 1..levels {
            let s = factor.powi(i as i32);
            let lw = (image.width as f32 / s).round() as usize;
            let lh = (image.height as f32 / s).round() as usize;
            if lw < min_side || lh < min_side {
                break;
            }
            let resized = resize_bilinear(image, lw, lh);
            out.push(Level {
                width: lw,
                height: lh,
                data: Cow::Owned(resized.data),
                scale_x: image.width as f32 / lw as f32,
                scale_y: image.height as f32 / lh as f32,
            });
        }
        out
    }

    /// Per-level keypoint budget proportional to level area.
    fn level_budgets(&self, areas: &[usize]) -> Vec<usize> {
        let total: usize = areas.iter().sum();
        if total == 0 {
            return vec![0; areas.len()];
        }
        let max = self.params.max_features;
        let mut budgets: Vec<usize> = areas.iter().map(|a| max * a / total).collect();
        let assigned: usize = budgets.iter().sum();
        if let Some(first) = budgets.first_mut() {
            *first += max - assigned;
        }
        budgets
    }

    /// Intensity-centroid angle over the orientation disc.
    fn orientation(&self, img: &GrayImageView<'_>, x: usize, y: usize) -> f32 {
        let w = img.width as i32;
        let center = y as i32 * w + x as i32;
        let mut m10 = 0i64;
        let mut m01 = 0i64;

        for u in -PATCH_RADIUS..=PATCH_RADIUS {
            m10 += u as i64 * img.data[(center + u) as usize] as i64;
        }
        for v in 1..=PATCH_RADIUS {
            let half = self.half_widths[v as usize];
            let mut v_sum = 0i64;
            for u in -half..=half {
                let below = img.data[(center + v * w + u) as usize] as i64;
                let above = img.data[(center - v * w + u) as usize] as i64;
                v_sum += below - above;
                m10 += u as i64 * (below + above);
            }
            m01 += v as i64 * v_sum;
        }
        (m01 as f32).atan2(m10 as f32)
    }

    fn describe(&self, blurred: &GrayImageView<'_>, x: usize, y: usize, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let w = blurred.width as i32;
        let h = blurred.height as i32;
        let at = |(px, py): (f32, f32)| -> u8 {
            let rx = (cos * px - sin * py).round() as i32 + x as i32;
            let ry = (sin * px + cos * py).round() as i32 + y as i32;
            let rx = rx.clamp(0, w - 1);
            let ry = ry.clamp(0, h - 1);
            blurred.data[(ry * w + rx) as usize]
        };

        let mut bytes = [0u8; DESCRIPTOR_BYTES];
        for (i, pair) in self.pattern.iter().enumerate() {
            if at(pair.a) < at(pair.b) {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        Descriptor(bytes)
    }
}

impl FeatureExtractor for OrbExtractor {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, image), fields(width = image.width, height = image.height))
    )]
    fn detect_and_describe(&self, image: &GrayImageView<'_>) -> FeatureSet {
        let mut set = FeatureSet::default();
        if image.width == 0 || image.height == 0 || self.params.max_features == 0 {
            return set;
        }

        let pyramid = self.build_pyramid(image);
        let areas: Vec<usize> = pyramid.iter().map(|l| l.width * l.height).collect();
        let budgets = self.level_budgets(&areas);

        for (octave, (level, budget)) in pyramid.iter().zip(budgets).enumerate() {
            let view = level.view();
            let mut corners: Vec<Corner> =
                detect_fast(&view, self.params.fast_threshold, EDGE_BORDER);
            // strongest first; raster order breaks ties so the output is stable
            corners.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.y.cmp(&b.y))
                    .then(a.x.cmp(&b.x))
            });
            corners.truncate(budget);
            if corners.is_empty() {
                continue;
            }

            let sigma = self.params.blur_sigma;
            let blurred = gaussian_blur(&view, sigma, blur_radius(sigma));
            let blurred = blurred.view();
            for c in corners {
                let angle = self.orientation(&view, c.x, c.y);
                let descriptor = self.describe(&blurred, c.x, c.y, angle);
                set.keypoints.push(Keypoint {
                    x: (c.x as f32 + 0.5) * level.scale_x - 0.5,
                    y: (c.y as f32 + 0.5) * level.scale_y - 0.5,
                    response: c.score,
                    angle,
                    octave: octave as u8,
                });
                set.descriptors.push(descriptor);
            }
        }

        log::debug!(
            "orb: {} keypoints on {}x{} over {} levels",
            set.len(),
            image.width,
            image.height,
            pyramid.len()
        );
        set
    }
}
