mod common;

use common::*;
use pattern_track::core::ImageView;
use pattern_track::{PatternTracker, TrackError, TrackerParams};

#[test]
fn registering_the_same_image_twice_is_idempotent() {
    let pattern = default_pattern();
    let frame = paste(&pattern, 320, 240, 50, 30);

    let mut tracker = PatternTracker::new(TrackerParams::default(), None);
    tracker
        .register_pattern(&ImageView::from(pattern.view()))
        .expect("first registration");
    let first_keypoints = tracker.pattern_keypoints().to_vec();
    let first = tracker
        .process_frame(&ImageView::from(frame.view()))
        .expect("found after first registration");
    let first_matches = tracker.matches().to_vec();

    tracker
        .register_pattern(&ImageView::from(pattern.view()))
        .expect("second registration");
    assert_eq!(tracker.pattern_keypoints(), first_keypoints.as_slice());
    let second = tracker
        .process_frame(&ImageView::from(frame.view()))
        .expect("found after second registration");

    assert_eq!(first, second);
    assert_eq!(tracker.matches(), first_matches.as_slice());
}

#[test]
fn registration_resets_frame_state() {
    let pattern = default_pattern();
    let mut tracker = PatternTracker::new(TrackerParams::default(), None);
    tracker
        .register_pattern(&ImageView::from(pattern.view()))
        .expect("register");
    let frame = paste(&pattern, 320, 240, 50, 30);
    tracker
        .process_frame(&ImageView::from(frame.view()))
        .expect("found");
    assert!(tracker.quad().is_some());

    let other = block_pattern(180, 160, 5);
    tracker
        .register_pattern(&ImageView::from(other.view()))
        .expect("register replacement");
    assert!(!tracker.is_found());
    assert!(tracker.matches().is_empty());
    assert!(tracker.query_keypoints().is_empty());
    assert!(tracker.quad().is_none());
    let active = tracker.pattern().expect("pattern");
    assert_eq!((active.width, active.height), (180, 160));
    assert_eq!(active.points2d[2].x, 180.0);
    assert_eq!(active.points2d[2].y, 160.0);
    // the longer side spans [-1, 1]
    assert_eq!(active.points3d[2].x, 1.0);
    assert!((active.points3d[2].y - 160.0 / 180.0).abs() < 1e-12);
}

#[test]
fn failed_registration_keeps_previous_pattern() {
    let pattern = default_pattern();
    let mut tracker = PatternTracker::new(TrackerParams::default(), None);
    tracker
        .register_pattern(&ImageView::from(pattern.view()))
        .expect("register");
    let keypoints = tracker.pattern_keypoints().to_vec();

    let blank = uniform(100, 100, 77);
    assert_eq!(
        tracker.register_pattern(&ImageView::from(blank.view())),
        Err(TrackError::NoFeatures)
    );
    assert_eq!(tracker.pattern_keypoints(), keypoints.as_slice());

    let frame = paste(&pattern, 320, 240, 50, 30);
    assert!(tracker
        .process_frame(&ImageView::from(frame.view()))
        .is_ok());
}
