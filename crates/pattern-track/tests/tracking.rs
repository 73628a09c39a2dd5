mod common;

use approx::assert_relative_eq;
use common::*;
use pattern_track::core::{CameraIntrinsics, ImageError, ImageView};
use nalgebra::Point2;
use pattern_track::features::{BruteForceMatcher, OrbExtractor, OrbParams};
use pattern_track::geometry::{HomographyEstimator, PlanarPoseSolver, RansacHomography, RobustFit};
use pattern_track::{PatternTracker, RefinementFailurePolicy, TrackError, TrackerParams};
use std::sync::atomic::{AtomicUsize, Ordering};

fn expected_translated(ox: f32, oy: f32) -> [(f32, f32); 4] {
    let s = PATTERN_SIZE as f32;
    [(ox, oy), (s + ox, oy), (s + ox, s + oy), (ox, s + oy)]
}

fn registered(params: TrackerParams, camera: Option<CameraIntrinsics>) -> PatternTracker {
    let mut tracker = PatternTracker::new(params, camera);
    let pattern = default_pattern();
    tracker
        .register_pattern(&ImageView::from(pattern.view()))
        .expect("register pattern");
    tracker
}

#[test]
fn finds_translated_pattern() {
    let mut tracker = registered(TrackerParams::default(), None);
    let frame = paste(&default_pattern(), 320, 240, 50, 30);

    let result = tracker
        .process_frame(&ImageView::from(frame.view()))
        .expect("pattern found");
    assert!(tracker.is_found());
    assert_quad_near(&result.quad, &expected_translated(50.0, 30.0), 2.0);
    assert_eq!(tracker.quad(), Some(result.quad));
    assert!(result.pose.is_none());

    let matches = tracker.matches();
    assert!(matches.len() > tracker.params().min_matches);
    for m in matches {
        assert!(m.query_idx < tracker.query_keypoints().len());
        assert!(m.train_idx < tracker.pattern_keypoints().len());
    }
}

#[test]
fn finds_pattern_in_bgr_frame_without_refinement() {
    let params = TrackerParams {
        homography_refinement: false,
        ..TrackerParams::default()
    };
    let mut tracker = registered(params, None);
    let frame = paste(&default_pattern(), 320, 240, 50, 30);
    let bgr = gray_to_bgr(&frame);
    let view = ImageView::new(320, 240, 3, &bgr).expect("bgr view");

    let result = tracker.process_frame(&view).expect("pattern found");
    assert_quad_near(&result.quad, &expected_translated(50.0, 30.0), 2.0);
}

#[test]
fn failed_frame_keeps_last_geometry() {
    let mut tracker = registered(TrackerParams::default(), None);
    let frame = paste(&default_pattern(), 320, 240, 50, 30);
    let found = tracker
        .process_frame(&ImageView::from(frame.view()))
        .expect("pattern found");

    let blank = uniform(320, 240, 90);
    let err = tracker
        .process_frame(&ImageView::from(blank.view()))
        .expect_err("nothing to find");
    assert_eq!(err, TrackError::NoFeatures);
    assert!(!tracker.is_found());
    assert!(tracker.query_keypoints().is_empty());
    assert!(tracker.matches().is_empty());
    assert_eq!(tracker.quad(), Some(found.quad));
    assert_eq!(tracker.homography(), Some(found.homography));
}

#[test]
fn unrelated_texture_is_not_found() {
    let mut tracker = registered(TrackerParams::default(), None);
    let other = paste(&block_pattern(200, 200, 9001), 320, 240, 50, 30);
    let err = tracker
        .process_frame(&ImageView::from(other.view()))
        .expect_err("different texture");
    assert!(
        matches!(
            err,
            TrackError::InsufficientMatches { .. }
                | TrackError::HomographyRejected { .. }
                | TrackError::RefinementRejected { .. }
                | TrackError::ImplausibleQuad
        ),
        "unexpected error {err:?}"
    );
    assert!(!tracker.is_found());
    assert!(tracker.quad().is_none());
}

#[test]
fn finds_translated_checkerboard() {
    let board = checkerboard(200, 12);
    let frame = paste(&board, 320, 260, 50, 30);
    let view = ImageView::from(frame.view());
    let expected = expected_translated(50.0, 30.0);

    let mut tracker = PatternTracker::new(TrackerParams::default(), None);
    tracker
        .register_pattern(&ImageView::from(board.view()))
        .expect("register checkerboard");
    let result = tracker.process_frame(&view).expect("checkerboard found");
    assert!(tracker.is_found());
    assert_quad_near(&result.quad, &expected, 2.0);

    let mut rough_only = PatternTracker::new(
        TrackerParams {
            homography_refinement: false,
            ..TrackerParams::default()
        },
        None,
    );
    rough_only
        .register_pattern(&ImageView::from(board.view()))
        .expect("register checkerboard");
    let result = rough_only.process_frame(&view).expect("checkerboard found");
    assert_quad_near(&result.quad, &expected, 2.0);
}

#[test]
fn checkerboard_without_ratio_test_never_publishes_a_folded_quad() {
    let board = checkerboard(200, 12);
    let frame = paste(&board, 320, 260, 50, 30);
    let mut tracker = PatternTracker::new(
        TrackerParams {
            ratio_test: false,
            ..TrackerParams::default()
        },
        None,
    );
    tracker
        .register_pattern(&ImageView::from(board.view()))
        .expect("register checkerboard");

    match tracker.process_frame(&ImageView::from(frame.view())) {
        Ok(result) => {
            assert!(pattern_track::quad_is_plausible(&result.quad));
            assert_quad_near(&result.quad, &expected_translated(50.0, 30.0), 2.0);
        }
        Err(err) => {
            assert!(!tracker.is_found(), "{err}");
            assert!(tracker.quad().is_none());
        }
    }
}

#[test]
fn short_frame_buffer_is_an_image_error() {
    let mut tracker = registered(TrackerParams::default(), None);
    let data = vec![0u8; 32 * 20];
    let view = ImageView {
        width: 32,
        height: 24,
        channels: 1,
        data: &data,
    };
    assert_eq!(
        tracker.process_frame(&view),
        Err(TrackError::Image(ImageError::BufferSize {
            expected: 32 * 24,
            got: 32 * 20
        }))
    );
    assert!(!tracker.is_found());
}

#[test]
fn unsupported_channel_count_is_an_image_error() {
    let mut tracker = registered(TrackerParams::default(), None);
    let data = vec![0u8; 16 * 16 * 2];
    let view = ImageView::new(16, 16, 2, &data).expect("two-channel view");
    assert!(matches!(
        tracker.process_frame(&view),
        Err(TrackError::Image(_))
    ));
}

#[test]
fn recovers_fronto_parallel_pose() {
    let camera = CameraIntrinsics::new(300.0, 300.0, 160.0, 120.0);
    let mut tracker = registered(TrackerParams::default(), Some(camera));
    let frame = paste(&default_pattern(), 320, 240, 50, 30);

    let result = tracker
        .process_frame(&ImageView::from(frame.view()))
        .expect("pattern found");
    let pose = result.pose.expect("pose with intrinsics");

    // a 200 px square spanning [-1, 1] seen with f = 300 sits at depth 3
    assert!(pose.rvec.norm() < 0.05, "rvec {:?}", pose.rvec);
    assert_relative_eq!(pose.tvec.z, 3.0, epsilon = 0.1);
    assert_relative_eq!(pose.tvec.x, -0.1, epsilon = 0.05);
    assert_relative_eq!(pose.tvec.y, 0.1, epsilon = 0.05);

    let pattern = tracker.pattern().expect("pattern");
    let reprojected = pose
        .project(&pattern.points3d, &camera)
        .expect("in front of camera");
    for (p, q) in reprojected.iter().zip(result.quad.iter()) {
        assert!((p.x - q.x as f64).abs() < 0.5 && (p.y - q.y as f64).abs() < 0.5);
    }

    let m = tracker.model_matrix().expect("model matrix");
    assert_relative_eq!(m[(2, 3)], pose.tvec.z);
    assert_eq!(
        tracker.pose_with(&camera).expect("pose_with").map(|p| p.tvec.z > 0.0),
        Some(true)
    );
}

#[test]
fn rescaled_processing_reports_full_resolution_geometry() {
    let params = TrackerParams {
        extractor: OrbParams {
            max_features: 1500,
            ..OrbParams::default()
        },
        ..TrackerParams::default()
    };
    // the pattern appears at twice its size, offset by an even amount
    let frame = paste(&upsample2x(&default_pattern()), 640, 480, 100, 40);
    let view = ImageView::from(frame.view());
    // pattern pixel p covers frame pixels 2p + 100 and 2p + 101
    let s = PATTERN_SIZE as f32;
    let expected = [
        (100.5, 40.5),
        (2.0 * s + 100.5, 40.5),
        (2.0 * s + 100.5, 2.0 * s + 40.5),
        (100.5, 2.0 * s + 40.5),
    ];

    let mut full = registered(params.clone(), None);
    let at_full = full.process_frame(&view).expect("found at full resolution");
    assert_quad_near(&at_full.quad, &expected, 3.0);

    let mut half = registered(
        TrackerParams {
            rescale: 0.5,
            ..params
        },
        None,
    );
    let at_half = half.process_frame(&view).expect("found at half resolution");
    assert_quad_near(&at_half.quad, &expected, 3.0);

    for kp in half.query_keypoints() {
        assert!(kp.x >= 0.0 && kp.x < 640.0 && kp.y >= 0.0 && kp.y < 480.0);
    }
    for (a, b) in at_full.quad.iter().zip(at_half.quad.iter()) {
        assert!((a.x - b.x).abs() < 3.0 && (a.y - b.y).abs() < 3.0);
    }
}

/// Fits normally on odd calls (rough pass) and fails on even calls (refinement).
struct FailsEverySecondFit {
    inner: RansacHomography,
    calls: AtomicUsize,
}

impl HomographyEstimator for FailsEverySecondFit {
    fn fit_robust(
        &self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        threshold: f32,
    ) -> Option<RobustFit> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return None;
        }
        self.inner.fit_robust(src, dst, threshold)
    }
}

fn tracker_with_failing_refinement(policy: RefinementFailurePolicy) -> PatternTracker {
    let params = TrackerParams {
        refinement_failure: policy,
        ..TrackerParams::default()
    };
    let mut tracker = PatternTracker::with_backends(
        params,
        None,
        Box::new(OrbExtractor::default()),
        Box::new(BruteForceMatcher::new()),
        Box::new(FailsEverySecondFit {
            inner: RansacHomography::default(),
            calls: AtomicUsize::new(0),
        }),
        Box::new(PlanarPoseSolver::default()),
    );
    tracker
        .register_pattern(&ImageView::from(default_pattern().view()))
        .expect("register pattern");
    tracker
}

#[test]
fn refinement_failure_policy() {
    let frame = paste(&default_pattern(), 320, 240, 50, 30);
    let view = ImageView::from(frame.view());

    let mut strict = tracker_with_failing_refinement(RefinementFailurePolicy::Reject);
    assert_eq!(
        strict.process_frame(&view),
        Err(TrackError::RefinementRejected {
            inliers: 0,
            required: 6
        })
    );
    assert!(!strict.is_found());
    assert!(strict.quad().is_none());
    // rough inliers stay visible for diagnostics
    assert!(strict.matches().len() > 6);

    let mut lenient = tracker_with_failing_refinement(RefinementFailurePolicy::FallBackToRough);
    let result = lenient.process_frame(&view).expect("rough homography published");
    assert_quad_near(&result.quad, &expected_translated(50.0, 30.0), 2.0);
}
