use pattern_track::{detect, PatternTracker, TrackerParams};

#[cfg(feature = "tracing")]
use pattern_track::core::{init_tracing, TraceFormat};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "tracing")]
    init_tracing(TraceFormat::Text, "info");
    #[cfg(not(feature = "tracing"))]
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(pattern_path) = args.next() else {
        eprintln!("Usage: track_images <pattern> <frame>...");
        return Ok(());
    };

    let pattern = detect::load_image_buffer(&pattern_path)?;
    let mut tracker = PatternTracker::new(TrackerParams::default(), None);
    tracker.register_pattern(&pattern.view())?;
    println!(
        "pattern {}x{} with {} keypoints",
        pattern.width,
        pattern.height,
        tracker.pattern_keypoints().len()
    );

    for path in args {
        let frame = detect::load_image_buffer(&path)?;
        match tracker.process_frame(&frame.view()) {
            Ok(result) => println!("{path}: found, quad {:?}", result.quad),
            Err(err) => println!(
                "{path}: not found ({err}), {} features, {} matches",
                tracker.num_features(),
                tracker.num_matches()
            ),
        }
    }
    Ok(())
}
