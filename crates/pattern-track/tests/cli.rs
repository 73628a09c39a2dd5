#![cfg(feature = "cli")]

mod common;

use assert_cmd::Command;
use common::*;
use pattern_track::core::GrayImage;
use pattern_track::TrackReport;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

fn save_png(img: &GrayImage, path: &Path) {
    let buf = image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .expect("image buffer");
    buf.save(path).expect("write png");
}

struct Fixture {
    _dir: tempfile::TempDir,
    pattern: PathBuf,
    hit: PathBuf,
    miss: PathBuf,
    report: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let pattern = dir.path().join("pattern.png");
    let hit = dir.path().join("hit.png");
    let miss = dir.path().join("miss.png");
    save_png(&default_pattern(), &pattern);
    save_png(&paste(&default_pattern(), 320, 240, 50, 30), &hit);
    save_png(&uniform(320, 240, 60), &miss);
    let report = dir.path().join("report.json");
    Fixture {
        _dir: dir,
        pattern,
        hit,
        miss,
        report,
    }
}

fn command(fx: &Fixture) -> Command {
    let mut cmd = Command::cargo_bin("pattern-track").expect("binary");
    cmd.arg("--pattern")
        .arg(&fx.pattern)
        .arg("--frames")
        .arg(&fx.hit)
        .arg(&fx.miss)
        .arg("--output")
        .arg(&fx.report);
    cmd
}

fn check_report(path: &Path) {
    let report = TrackReport::load_json(path).expect("report");
    assert_eq!((report.pattern_width, report.pattern_height), (200, 200));
    assert!(report.pattern_keypoints > 0);
    assert_eq!(report.frames.len(), 2);

    let hit = &report.frames[0];
    assert!(hit.found, "{hit:?}");
    let quad = hit.quad.expect("quad");
    assert!((quad[0][0] - 50.0).abs() < 2.0 && (quad[0][1] - 30.0).abs() < 2.0);

    let miss = &report.frames[1];
    assert!(!miss.found);
    assert!(miss.quad.is_none());
}

#[test]
fn writes_report_for_sync_tracking() {
    let fx = fixture();
    command(&fx)
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote report JSON"));
    check_report(&fx.report);
    let report = TrackReport::load_json(&fx.report).expect("report");
    assert!(report.frames[1].error.is_some());
}

#[test]
fn writes_report_for_async_tracking() {
    let fx = fixture();
    command(&fx).arg("--async").assert().success();
    check_report(&fx.report);
}

#[test]
fn config_and_camera_files_are_applied() {
    let fx = fixture();
    let dir = fx.report.parent().expect("dir");
    let config = dir.join("config.json");
    std::fs::write(
        &config,
        r#"{ "tracker": { "homography_refinement": false, "min_matches": 8 } }"#,
    )
    .expect("config");
    let camera = dir.join("camera.json");
    std::fs::write(
        &camera,
        r#"{ "fx": 300.0, "fy": 300.0, "cx": 160.0, "cy": 120.0 }"#,
    )
    .expect("camera");

    command(&fx)
        .arg("--config")
        .arg(&config)
        .arg("--camera")
        .arg(&camera)
        .assert()
        .success();
    let report = TrackReport::load_json(&fx.report).expect("report");
    let tvec = report.frames[0].tvec.expect("pose reported");
    assert!(tvec[2] > 0.0);
}

#[test]
fn verbose_flag_enables_debug_logging() {
    let fx = fixture();
    command(&fx)
        .arg("--verbose")
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stderr(predicate::str::contains("registered 200x200 pattern"));

    command(&fx)
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stderr(predicate::str::contains("registered 200x200 pattern").not());
}

#[test]
fn missing_pattern_fails() {
    let fx = fixture();
    Command::cargo_bin("pattern-track")
        .expect("binary")
        .arg("--pattern")
        .arg(fx.report.with_file_name("does-not-exist.png"))
        .arg("--frames")
        .arg(&fx.hit)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
