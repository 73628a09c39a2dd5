//! Synchronous pattern tracker: extract, match, fit, refine, solve pose.

use crate::{Pattern, RefinementFailurePolicy, TrackError, TrackerParams};
use nalgebra::{Matrix4, Point2};
use pattern_track_core::{
    resize_bilinear, to_gray, warp_perspective_gray, CameraIntrinsics, GrayImage, GrayImageView,
    Homography, ImageView,
};
use pattern_track_features::{
    match_descriptors, BruteForceMatcher, DescriptorMatcher, FeatureExtractor, FeatureSet,
    Keypoint, Match, OrbExtractor,
};
use pattern_track_geometry::{HomographyEstimator, PlanarPoseSolver, Pose, PoseSolver, RansacHomography};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Geometry published by a successful frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingResult {
    /// Pattern outline projected into the frame, in frame pixels.
    pub quad: [Point2<f32>; 4],
    /// Pattern → frame homography.
    pub homography: Homography,
    /// Camera pose, present when the tracker has intrinsics.
    pub pose: Option<Pose>,
}

/// Fit a robust pattern → query homography and keep only its inlier matches.
///
/// Fails with [`TrackError::InsufficientMatches`] before fitting when there are
/// fewer than `min_matches` correspondences, and with
/// [`TrackError::HomographyRejected`] unless strictly more than `min_matches`
/// inliers support the model. `matches` holds the inliers whenever a model
/// was fitted, even if it is then rejected.
pub fn estimate_homography(
    query_keypoints: &[Keypoint],
    pattern_keypoints: &[Keypoint],
    matches: &mut Vec<Match>,
    reprojection_threshold: f32,
    min_matches: usize,
    estimator: &dyn HomographyEstimator,
) -> Result<Homography, TrackError> {
    if matches.len() < min_matches {
        return Err(TrackError::InsufficientMatches {
            found: matches.len(),
            required: min_matches,
        });
    }

    let (src, dst): (Vec<Point2<f32>>, Vec<Point2<f32>>) = matches
        .iter()
        .map(|m| {
            (
                pattern_keypoints[m.train_idx].position(),
                query_keypoints[m.query_idx].position(),
            )
        })
        .unzip();

    let Some(fit) = estimator.fit_robust(&src, &dst, reprojection_threshold) else {
        matches.clear();
        return Err(TrackError::HomographyRejected {
            inliers: 0,
            required: min_matches,
        });
    };

    let mut inlier = fit.inliers.iter();
    matches.retain(|_| inlier.next().copied().unwrap_or(false));

    if matches.len() > min_matches {
        Ok(fit.homography)
    } else {
        Err(TrackError::HomographyRejected {
            inliers: matches.len(),
            required: min_matches,
        })
    }
}

/// Whether `quad` is a finite, convex quad with the pattern's orientation.
///
/// Every corner must turn the same way as `(0,0), (w,0), (w,h), (0,h)`, which
/// also excludes self-intersecting and degenerate outlines.
pub fn quad_is_plausible(quad: &[Point2<f32>; 4]) -> bool {
    if quad.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
        return false;
    }
    (0..4).all(|i| {
        let [a, b, c] = [quad[i], quad[(i + 1) % 4], quad[(i + 2) % 4]];
        let (e1x, e1y) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
        let (e2x, e2y) = ((c.x - b.x) as f64, (c.y - b.y) as f64);
        e1x * e2y - e1y * e2x > 0.0
    })
}

/// Grayscale frame at processing resolution plus its mapping to full resolution.
struct WorkingFrame<'a> {
    gray: GrayImageView<'a>,
    /// Full-resolution / working-resolution size ratio per axis.
    scale_x: f64,
    scale_y: f64,
}

impl WorkingFrame<'_> {
    fn is_rescaled(&self) -> bool {
        self.scale_x != 1.0 || self.scale_y != 1.0
    }

    /// Working pixel → full-resolution pixel (pixel centres preserved).
    fn to_full(&self, kp: &Keypoint) -> Keypoint {
        let (sx, sy) = (self.scale_x as f32, self.scale_y as f32);
        kp.map_position(|p| Point2::new((p.x + 0.5) * sx - 0.5, (p.y + 0.5) * sy - 0.5))
    }

    /// Full-resolution pixel → working pixel, as a homography.
    fn full_to_working(&self) -> Homography {
        let (ix, iy) = (1.0 / self.scale_x, 1.0 / self.scale_y);
        Homography::scale_translation(ix, iy, 0.5 * ix - 0.5, 0.5 * iy - 0.5)
    }
}

/// Tracks one registered planar pattern across frames.
///
/// All results of a frame are computed first and committed together. Query
/// keypoints and matches always describe the latest attempt; quad, homography
/// and pose keep their last successful values when a frame fails.
pub struct PatternTracker {
    params: TrackerParams,
    camera: Option<CameraIntrinsics>,
    extractor: Box<dyn FeatureExtractor>,
    matcher: Box<dyn DescriptorMatcher>,
    estimator: Box<dyn HomographyEstimator>,
    pose_solver: Box<dyn PoseSolver>,

    pattern: Option<Pattern>,
    found: bool,
    query_keypoints: Vec<Keypoint>,
    matches: Vec<Match>,
    result: Option<TrackingResult>,
    last_update_time: Option<Duration>,
}

impl std::fmt::Debug for PatternTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternTracker")
            .field("params", &self.params)
            .field("camera", &self.camera)
            .field("has_pattern", &self.pattern.is_some())
            .field("found", &self.found)
            .field("matches", &self.matches.len())
            .finish_non_exhaustive()
    }
}

impl PatternTracker {
    /// Tracker with the default ORB / brute-force / RANSAC / planar-pose backends.
    pub fn new(params: TrackerParams, camera: Option<CameraIntrinsics>) -> Self {
        let extractor = OrbExtractor::new(params.extractor.clone());
        let estimator = RansacHomography::new(params.ransac.clone());
        Self::with_backends(
            params,
            camera,
            Box::new(extractor),
            Box::new(BruteForceMatcher::new()),
            Box::new(estimator),
            Box::new(PlanarPoseSolver::default()),
        )
    }

    pub fn with_backends(
        params: TrackerParams,
        camera: Option<CameraIntrinsics>,
        extractor: Box<dyn FeatureExtractor>,
        matcher: Box<dyn DescriptorMatcher>,
        estimator: Box<dyn HomographyEstimator>,
        pose_solver: Box<dyn PoseSolver>,
    ) -> Self {
        Self {
            params,
            camera,
            extractor,
            matcher,
            estimator,
            pose_solver,
            pattern: None,
            found: false,
            query_keypoints: Vec::new(),
            matches: Vec::new(),
            result: None,
            last_update_time: None,
        }
    }

    /// Replace the tracked pattern.
    ///
    /// On success the matcher is retrained and all per-frame state is reset.
    /// On failure the previous pattern stays active and nothing changes.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image), fields(width = image.width, height = image.height))
    )]
    pub fn register_pattern(&mut self, image: &ImageView<'_>) -> Result<(), TrackError> {
        let pattern = Pattern::build(image, self.extractor.as_ref(), self.params.pattern_margin)?;
        self.matcher.train(pattern.descriptors());
        log::info!(
            "registered {}x{} pattern with {} keypoints",
            pattern.width,
            pattern.height,
            pattern.features.len()
        );

        self.pattern = Some(pattern);
        self.found = false;
        self.query_keypoints.clear();
        self.matches.clear();
        self.result = None;
        Ok(())
    }

    /// Track the pattern in one frame.
    ///
    /// `Ok` means the pattern was found; the same geometry is then available
    /// through the accessors until the next successful frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, frame), fields(width = frame.width, height = frame.height))
    )]
    pub fn process_frame(&mut self, frame: &ImageView<'_>) -> Result<TrackingResult, TrackError> {
        let start = Instant::now();
        let mut query_keypoints = Vec::new();
        let mut matches = Vec::new();
        let outcome = self.run_pipeline(frame, &mut query_keypoints, &mut matches);

        self.query_keypoints = query_keypoints;
        self.matches = matches;
        self.last_update_time = Some(start.elapsed());
        match outcome {
            Ok(result) => {
                self.found = true;
                self.result = Some(result);
                Ok(result)
            }
            Err(err) => {
                log::debug!("frame not found: {err}");
                self.found = false;
                Err(err)
            }
        }
    }

    fn run_pipeline(
        &self,
        frame: &ImageView<'_>,
        query_out: &mut Vec<Keypoint>,
        matches_out: &mut Vec<Match>,
    ) -> Result<TrackingResult, TrackError> {
        self.params.validate_rescale()?;
        let pattern = self.pattern.as_ref().ok_or(TrackError::NoPattern)?;

        let gray = to_gray(frame)?;
        let full = GrayImageView {
            width: frame.width,
            height: frame.height,
            data: &gray,
        };
        let resized: Option<GrayImage> = (self.params.rescale != 1.0).then(|| {
            let rw = ((frame.width as f32 * self.params.rescale).round() as usize).max(1);
            let rh = ((frame.height as f32 * self.params.rescale).round() as usize).max(1);
            resize_bilinear(&full, rw, rh)
        });
        let work = match resized.as_ref() {
            Some(img) => WorkingFrame {
                gray: img.view(),
                scale_x: frame.width as f64 / img.width as f64,
                scale_y: frame.height as f64 / img.height as f64,
            },
            None => WorkingFrame {
                gray: full,
                scale_x: 1.0,
                scale_y: 1.0,
            },
        };

        let mut query = extract_features(self.extractor.as_ref(), &work.gray)?;
        if work.is_rescaled() {
            query.keypoints = query.keypoints.iter().map(|kp| work.to_full(kp)).collect();
        }
        *query_out = query.keypoints;

        *matches_out = match_descriptors(
            self.matcher.as_ref(),
            &query.descriptors,
            self.params.ratio_test,
        );
        log::debug!(
            "{} query keypoints, {} matches",
            query_out.len(),
            matches_out.len()
        );

        let rough = estimate_homography(
            query_out,
            pattern.keypoints(),
            matches_out,
            self.params.reprojection_threshold,
            self.params.min_matches,
            self.estimator.as_ref(),
        )?;

        let homography = if self.params.homography_refinement {
            match self.refine(pattern, &work, &rough) {
                Ok(refined) => rough.compose(&refined),
                Err(err) => match self.params.refinement_failure {
                    RefinementFailurePolicy::Reject => return Err(err),
                    RefinementFailurePolicy::FallBackToRough => {
                        log::debug!("refinement failed ({err}), keeping rough homography");
                        rough
                    }
                },
            }
        } else {
            rough
        };

        let quad = pattern.points2d.map(|p| homography.apply(p));
        if !quad_is_plausible(&quad) {
            return Err(TrackError::ImplausibleQuad);
        }
        let pose = match self.camera.as_ref() {
            Some(camera) => Some(self.solve_pose(pattern, &quad, camera)?),
            None => None,
        };

        Ok(TrackingResult {
            quad,
            homography,
            pose,
        })
    }

    /// Second pass: warp the frame into the pattern frame and fit the residual
    /// homography between the pattern and the warped image.
    ///
    /// The warped canvas carries the same margin as the pattern extraction, so
    /// outline corners are found again in the warped image.
    fn refine(
        &self,
        pattern: &Pattern,
        work: &WorkingFrame<'_>,
        rough: &Homography,
    ) -> Result<Homography, TrackError> {
        let required = self.params.min_matches;
        let rejected = |inliers| TrackError::RefinementRejected { inliers, required };

        let m = pattern.margin as f64;
        let (canvas_w, canvas_h) = pattern.padded_size();
        let warp = work
            .full_to_working()
            .compose(rough)
            .compose(&Homography::scale_translation(1.0, 1.0, -m, -m));
        let warped = warp_perspective_gray(
            &work.gray,
            &warp,
            canvas_w,
            canvas_h,
            self.params.refinement_interpolation,
        );
        let mut features = self.extractor.detect_and_describe(&warped.view());
        if features.is_empty() {
            return Err(rejected(0));
        }
        let m = m as f32;
        for kp in &mut features.keypoints {
            *kp = kp.map_position(|p| Point2::new(p.x - m, p.y - m));
        }
        let mut matches = match_descriptors(
            self.matcher.as_ref(),
            &features.descriptors,
            self.params.ratio_test,
        );
        estimate_homography(
            &features.keypoints,
            pattern.keypoints(),
            &mut matches,
            self.params.reprojection_threshold,
            required,
            self.estimator.as_ref(),
        )
        .map_err(|err| match err {
            TrackError::InsufficientMatches { found, .. } => rejected(found),
            TrackError::HomographyRejected { inliers, .. } => rejected(inliers),
            other => other,
        })
    }

    fn solve_pose(
        &self,
        pattern: &Pattern,
        quad: &[Point2<f32>; 4],
        camera: &CameraIntrinsics,
    ) -> Result<Pose, TrackError> {
        let image: Vec<Point2<f64>> = quad
            .iter()
            .map(|p| Point2::new(p.x as f64, p.y as f64))
            .collect();
        self.pose_solver
            .solve_pose(&pattern.points3d, &image, camera)
            .map_err(TrackError::from)
    }

    #[inline]
    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Pose of the last successful frame, if intrinsics are configured.
    pub fn pose(&self) -> Option<Pose> {
        self.result.and_then(|r| r.pose)
    }

    /// Pose of the last successful quad under different intrinsics;
    /// `Ok(None)` until a frame has been found.
    pub fn pose_with(&self, camera: &CameraIntrinsics) -> Result<Option<Pose>, TrackError> {
        let pattern = self.pattern.as_ref().ok_or(TrackError::NoPattern)?;
        match self.result.as_ref() {
            Some(result) => self.solve_pose(pattern, &result.quad, camera).map(Some),
            None => Ok(None),
        }
    }

    /// Pattern → camera transform of the last successful frame.
    pub fn model_matrix(&self) -> Option<Matrix4<f64>> {
        self.pose().map(|p| p.model_matrix())
    }

    pub fn quad(&self) -> Option<[Point2<f32>; 4]> {
        self.result.map(|r| r.quad)
    }

    pub fn homography(&self) -> Option<Homography> {
        self.result.map(|r| r.homography)
    }

    pub fn result(&self) -> Option<&TrackingResult> {
        self.result.as_ref()
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn query_keypoints(&self) -> &[Keypoint] {
        &self.query_keypoints
    }

    pub fn pattern_keypoints(&self) -> &[Keypoint] {
        self.pattern
            .as_ref()
            .map(Pattern::keypoints)
            .unwrap_or_default()
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    /// Number of keypoints found in the latest frame.
    pub fn num_features(&self) -> usize {
        self.query_keypoints.len()
    }

    pub fn num_matches(&self) -> usize {
        self.matches.len()
    }

    /// Wall time of the latest `process_frame` call.
    pub fn last_update_time(&self) -> Option<Duration> {
        self.last_update_time
    }

    pub fn camera(&self) -> Option<&CameraIntrinsics> {
        self.camera.as_ref()
    }

    pub fn set_camera(&mut self, camera: Option<CameraIntrinsics>) {
        self.camera = camera;
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Mutable parameters. Extractor and RANSAC settings are read by the
    /// backends at construction and are not affected by later edits.
    pub fn params_mut(&mut self) -> &mut TrackerParams {
        &mut self.params
    }
}

/// Run the extractor, failing when it yields nothing.
///
/// A view whose buffer does not match its dimensions is rejected before
/// extraction.
pub fn extract_features(
    extractor: &dyn FeatureExtractor,
    image: &GrayImageView<'_>,
) -> Result<FeatureSet, TrackError> {
    ImageView::from(*image).validate()?;
    let features = extractor.detect_and_describe(image);
    if features.is_empty() || features.descriptors.is_empty() {
        return Err(TrackError::NoFeatures);
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pattern_track_geometry::RobustFit;

    fn kp(x: f32, y: f32) -> Keypoint {
        Keypoint {
            x,
            y,
            response: 1.0,
            angle: 0.0,
            octave: 0,
        }
    }

    fn identity_matches(n: usize) -> Vec<Match> {
        (0..n)
            .map(|i| Match {
                query_idx: i,
                train_idx: i,
                distance: 0.0,
            })
            .collect()
    }

    /// Estimator that marks a fixed number of leading pairs as inliers.
    struct FixedInliers(usize);

    impl HomographyEstimator for FixedInliers {
        fn fit_robust(
            &self,
            src: &[Point2<f32>],
            _dst: &[Point2<f32>],
            _threshold: f32,
        ) -> Option<RobustFit> {
            Some(RobustFit {
                homography: Homography::identity(),
                inliers: (0..src.len()).map(|i| i < self.0).collect(),
            })
        }
    }

    #[test]
    fn too_few_matches_fail_before_fitting() {
        let kps: Vec<Keypoint> = (0..5).map(|i| kp(i as f32, 0.0)).collect();
        let mut matches = identity_matches(5);
        let err = estimate_homography(&kps, &kps, &mut matches, 3.0, 6, &FixedInliers(5));
        assert_eq!(
            err,
            Err(TrackError::InsufficientMatches {
                found: 5,
                required: 6
            })
        );
        assert_eq!(matches.len(), 5);
    }

    #[test]
    fn inlier_count_must_exceed_minimum() {
        let kps: Vec<Keypoint> = (0..10).map(|i| kp(i as f32, (i * i) as f32)).collect();

        let mut matches = identity_matches(10);
        let err = estimate_homography(&kps, &kps, &mut matches, 3.0, 6, &FixedInliers(6));
        assert_eq!(
            err,
            Err(TrackError::HomographyRejected {
                inliers: 6,
                required: 6
            })
        );
        assert_eq!(matches.len(), 6);

        let mut matches = identity_matches(10);
        let h = estimate_homography(&kps, &kps, &mut matches, 3.0, 6, &FixedInliers(7));
        assert_eq!(h, Ok(Homography::identity()));
        assert_eq!(matches.len(), 7);
        assert!(matches.iter().all(|m| m.query_idx < 7));
    }

    #[test]
    fn working_frame_maps_pixel_centres() {
        let img = GrayImage::new(4, 4);
        let work = WorkingFrame {
            gray: img.view(),
            scale_x: 2.0,
            scale_y: 2.0,
        };
        let full = work.to_full(&kp(0.0, 1.0));
        assert_eq!((full.x, full.y), (0.5, 2.5));
        let back = work.full_to_working().apply(full.position());
        assert!((back.x - 0.0).abs() < 1e-6 && (back.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn plausible_quads() {
        let p = |x: f32, y: f32| Point2::new(x, y);
        let square = [p(50.0, 30.0), p(250.0, 30.0), p(250.0, 230.0), p(50.0, 230.0)];
        assert!(quad_is_plausible(&square));
        let tilted = [p(10.0, 20.0), p(120.0, 5.0), p(140.0, 90.0), p(0.0, 100.0)];
        assert!(quad_is_plausible(&tilted));

        // mirrored orientation
        let mirrored = [square[1], square[0], square[3], square[2]];
        assert!(!quad_is_plausible(&mirrored));
        // bow tie
        let crossed = [square[0], square[1], square[3], square[2]];
        assert!(!quad_is_plausible(&crossed));
        // concave: the fourth corner folds back inside
        let folded = [p(129.6, 74.4), p(175.9, 66.0), p(187.0, 93.0), p(175.9, 75.0)];
        assert!(!quad_is_plausible(&folded));
        // collapsed onto a line
        let flat = [p(0.0, 0.0), p(1.0, 0.0), p(2.0, 0.0), p(3.0, 0.0)];
        assert!(!quad_is_plausible(&flat));
        let nan = [p(f32::NAN, 0.0), square[1], square[2], square[3]];
        assert!(!quad_is_plausible(&nan));
    }

    #[test]
    fn short_gray_buffer_is_an_error() {
        let data = vec![0u8; 10];
        let view = GrayImageView {
            width: 8,
            height: 8,
            data: &data,
        };
        let err = extract_features(&OrbExtractor::default(), &view).map(|f| f.len());
        assert_eq!(
            err,
            Err(TrackError::Image(pattern_track_core::ImageError::BufferSize {
                expected: 64,
                got: 10
            }))
        );
    }

    #[test]
    fn frames_before_registration_report_no_pattern() {
        let mut tracker = PatternTracker::new(TrackerParams::default(), None);
        let img = GrayImage::new(32, 32);
        let view = ImageView::from(img.view());
        assert_eq!(tracker.process_frame(&view), Err(TrackError::NoPattern));
        assert!(!tracker.is_found());
        assert!(tracker.last_update_time().is_some());
    }

    #[test]
    fn invalid_rescale_is_rejected() {
        let params = TrackerParams {
            rescale: 1.5,
            ..TrackerParams::default()
        };
        let mut tracker = PatternTracker::new(params, None);
        let img = GrayImage::new(32, 32);
        let view = ImageView::from(img.view());
        assert_eq!(
            tracker.process_frame(&view),
            Err(TrackError::InvalidRescale(1.5))
        );
        tracker.params_mut().rescale = 0.0;
        assert_eq!(
            tracker.process_frame(&view),
            Err(TrackError::InvalidRescale(0.0))
        );
    }

    #[test]
    fn featureless_pattern_is_refused() {
        let mut tracker = PatternTracker::new(TrackerParams::default(), None);
        let mut img = GrayImage::new(64, 64);
        img.data.fill(100);
        let view = ImageView::from(img.view());
        assert_eq!(tracker.register_pattern(&view), Err(TrackError::NoFeatures));
        assert!(tracker.pattern().is_none());
    }
}
