//! Seeded RANSAC homography fitting.

use nalgebra::Point2;
use pattern_track_core::{estimate_homography, homography_from_4pt, Homography};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A robust model together with its inlier mask (one flag per input pair).
#[derive(Clone, Debug, PartialEq)]
pub struct RobustFit {
    pub homography: Homography,
    pub inliers: Vec<bool>,
}

impl RobustFit {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&b| b).count()
    }
}

/// Outlier-tolerant homography estimation from point correspondences.
pub trait HomographyEstimator: Send {
    /// Fit `H` with `dst ≈ H · src`, counting a pair as inlier when its
    /// reprojection error is below `threshold` pixels.
    ///
    /// Returns `None` when no model could be fitted.
    fn fit_robust(
        &self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        threshold: f32,
    ) -> Option<RobustFit>;
}

impl<T: HomographyEstimator + ?Sized> HomographyEstimator for Box<T> {
    fn fit_robust(
        &self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        threshold: f32,
    ) -> Option<RobustFit> {
        (**self).fit_robust(src, dst, threshold)
    }
}

/// Parameters for [`RansacHomography`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Hard cap on the number of sampled hypotheses.
    pub max_iterations: usize,
    /// Probability of drawing at least one all-inlier sample; drives the
    /// adaptive iteration count.
    pub confidence: f64,
    /// Seed of the sampling RNG. Every call restarts from it.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x5eed_0f_4a45,
        }
    }
}

/// RANSAC over minimal 4-point samples followed by a least-squares refit on
/// the consensus set.
#[derive(Clone, Debug, Default)]
pub struct RansacHomography {
    pub params: RansacParams,
}

impl RansacHomography {
    pub fn new(params: RansacParams) -> Self {
        Self { params }
    }
}

const MIN_SAMPLE: usize = 4;

/// Sine of the smallest angle below which three sample points count as collinear.
const COLLINEAR_EPS: f64 = 1e-3;

fn collinear(a: Point2<f32>, b: Point2<f32>, c: Point2<f32>) -> bool {
    let (ux, uy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
    let (vx, vy) = ((c.x - a.x) as f64, (c.y - a.y) as f64);
    let cross = (ux * vy - uy * vx).abs();
    let norms = (ux * ux + uy * uy).sqrt() * (vx * vx + vy * vy).sqrt();
    norms <= f64::EPSILON || cross <= COLLINEAR_EPS * norms
}

fn degenerate_sample(pts: &[Point2<f32>; 4]) -> bool {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    TRIPLES
        .iter()
        .any(|&(i, j, k)| collinear(pts[i], pts[j], pts[k]))
}

fn inlier_mask(
    h: &Homography,
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    threshold: f32,
) -> (Vec<bool>, usize) {
    let thr2 = threshold * threshold;
    let mut count = 0;
    let mask = src
        .iter()
        .zip(dst)
        .map(|(s, d)| {
            let p = h.apply(*s);
            let err2 = (p.x - d.x).powi(2) + (p.y - d.y).powi(2);
            let ok = err2.is_finite() && err2 < thr2;
            count += ok as usize;
            ok
        })
        .collect();
    (mask, count)
}

/// Iterations needed to hit `confidence` at the given inlier ratio.
fn required_iterations(confidence: f64, inlier_ratio: f64, cap: usize) -> usize {
    let w = inlier_ratio.powi(MIN_SAMPLE as i32);
    if w <= f64::EPSILON {
        return cap;
    }
    if w >= 1.0 - f64::EPSILON {
        return 1;
    }
    let num = (1.0 - confidence.clamp(0.0, 1.0 - 1e-12)).ln();
    let den = (1.0 - w).ln();
    let k = (num / den).ceil();
    if !k.is_finite() || k > cap as f64 {
        cap
    } else {
        (k as usize).max(1)
    }
}

impl HomographyEstimator for RansacHomography {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, src, dst), fields(pairs = src.len()))
    )]
    fn fit_robust(
        &self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        threshold: f32,
    ) -> Option<RobustFit> {
        let n = src.len();
        if n != dst.len() || n < MIN_SAMPLE {
            return None;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let cap = self.params.max_iterations.max(1);
        let mut needed = cap;
        let mut best: Option<(Homography, usize)> = None;

        let mut iter = 0;
        while iter < needed {
            iter += 1;
            let idx = rand::seq::index::sample(&mut rng, n, MIN_SAMPLE);
            let s = [src[idx.index(0)], src[idx.index(1)], src[idx.index(2)], src[idx.index(3)]];
            let d = [dst[idx.index(0)], dst[idx.index(1)], dst[idx.index(2)], dst[idx.index(3)]];
            if degenerate_sample(&s) || degenerate_sample(&d) {
                continue;
            }
            let Some(h) = homography_from_4pt(&s, &d) else {
                continue;
            };
            let (_, count) = inlier_mask(&h, src, dst, threshold);
            if best.as_ref().is_none_or(|(_, c)| count > *c) {
                needed = required_iterations(self.params.confidence, count as f64 / n as f64, cap);
                best = Some((h, count));
            }
        }

        let (h, count) = best?;
        if count < MIN_SAMPLE {
            return None;
        }
        let (mask, _) = inlier_mask(&h, src, dst, threshold);

        // least-squares refit on the consensus set, kept only if it does not lose support
        let (in_src, in_dst): (Vec<_>, Vec<_>) = src
            .iter()
            .zip(dst)
            .zip(&mask)
            .filter(|(_, &m)| m)
            .map(|((s, d), _)| (*s, *d))
            .unzip();
        let fit = match estimate_homography(&in_src, &in_dst) {
            Some(refit) => {
                let (refit_mask, refit_count) = inlier_mask(&refit, src, dst, threshold);
                if refit_count >= count {
                    RobustFit {
                        homography: refit,
                        inliers: refit_mask,
                    }
                } else {
                    RobustFit {
                        homography: h,
                        inliers: mask,
                    }
                }
            }
            None => RobustFit {
                homography: h,
                inliers: mask,
            },
        };

        log::debug!(
            "ransac: {}/{} inliers after {} iterations",
            fit.inlier_count(),
            n,
            iter
        );
        Some(fit)
    }
}
