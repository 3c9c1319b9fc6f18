use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod args;

use args::Args;
use gaze_overlay::camera::{CameraSession, FrameSource, ImageSequenceSource};
use gaze_overlay::config::AppConfig;
use gaze_overlay::detector::{DetectionScript, LandmarkDetector, ReplayDetector};
use gaze_overlay::gaze::GazeStatus;
use gaze_overlay::gaze_state::GazeState;
use gaze_overlay::mapping::check_rotation;
use gaze_overlay::output::{render_frame, FrameWriter};
use gaze_overlay::overlay::OverlayStore;
use gaze_overlay::pipeline::FaceAnalyzer;
use gaze_overlay::types::{CameraSelectorMode, Orientation};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn create_detector(args: &Args) -> Result<Box<dyn LandmarkDetector>> {
    if let Some(model) = &args.model {
        #[cfg(feature = "onnx")]
        {
            let detector = gaze_overlay::detector::OnnxFaceDetector::new(model)?;
            return Ok(Box::new(gaze_overlay::detector::SinglePass::new(detector)));
        }
        #[cfg(not(feature = "onnx"))]
        bail!("--model {model} needs a build with the `onnx` feature");
    }
    match &args.script {
        Some(path) => {
            let detector = ReplayDetector::from_file(path)
                .with_context(|| format!("Failed to load detection script {}", path.display()))?;
            Ok(Box::new(detector))
        }
        None => {
            warn!("No --script or --model given; every frame will report no faces");
            Ok(Box::new(ReplayDetector::new(DetectionScript::default())))
        }
    }
}

fn create_source(args: &Args, config: &AppConfig) -> Result<Box<dyn FrameSource>> {
    if args.camera {
        #[cfg(feature = "camera")]
        {
            return Ok(Box::new(gaze_overlay::camera::NokhwaSource::new(
                config.camera.front_index,
                config.camera.back_index,
                config.camera.rotation_degrees,
            )));
        }
        #[cfg(not(feature = "camera"))]
        bail!("--camera needs a build with the `camera` feature");
    }
    let Some(dir) = &args.frames else {
        bail!("Pass --frames <DIR> (or --camera)");
    };
    let source = ImageSequenceSource::from_dir(dir)
        .with_context(|| format!("Failed to open frame directory {}", dir.display()))?
        .with_rotation(config.camera.rotation_degrees)
        .with_interval(Duration::from_millis(config.camera.frame_interval_ms))
        .looping(args.loop_frames);
    Ok(Box::new(source))
}

fn print_status(status: &GazeStatus) {
    let text = status.to_string();
    match status {
        GazeStatus::Point(_) => println!("{}", text.green()),
        GazeStatus::DetectorFailed => println!("{}", text.red()),
        _ => println!("{}", text.yellow()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // 0. Load Config
    let config = AppConfig::load_from(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    let mode = if args.back {
        CameraSelectorMode::Back
    } else {
        config.defaults.camera
    };
    let orientation = if args.landscape {
        Orientation::Landscape
    } else {
        config.defaults.orientation
    };

    check_rotation(orientation, config.camera.rotation_degrees).with_context(|| {
        format!(
            "camera.rotation_degrees in {} must be 90 or 270 for portrait, 0 or 180 for landscape",
            args.config.display()
        )
    })?;

    // 1. Overlay + gaze label
    let overlay = Arc::new(OverlayStore::new(
        config.view.width as f32,
        config.view.height as f32,
        orientation,
        mode,
    ));
    let (gaze_writer, mut gaze_reader) = GazeState::new();

    // 2. Camera session + analyzer
    let source = create_source(&args, &config)?;
    let detector = create_detector(&args)?;
    let mut session = CameraSession::new(source, overlay.clone());
    let analyzer = FaceAnalyzer::new(detector, overlay.clone(), gaze_writer, config.screen_size())
        .with_style(config.box_style())
        .with_session(session.token());
    session.start(Box::new(analyzer))?;
    println!(
        "{}",
        format!("Camera: {} | Orientation: {:?}", mode.label(), orientation).green()
    );

    let mut frames_out = match &args.output {
        Some(dir) => Some(FrameWriter::new(dir)?),
        None => None,
    };

    // 3. Render loop
    let mut seen_invalidations = 0;
    let mut rendered: u64 = 0;
    loop {
        let invalidations = overlay.invalidations();
        if invalidations != seen_invalidations {
            seen_invalidations = invalidations;

            let preview = session.latest_preview();
            // Draw failures are programming errors in overlay items.
            let canvas = render_frame(preview.as_ref(), &overlay).context("Overlay draw failed")?;
            rendered += 1;

            if let Some(out) = frames_out.as_mut() {
                let sequence = preview.as_ref().map(|f| f.sequence).unwrap_or(rendered);
                out.write(&canvas, sequence)?;
            }

            if let Some(every) = args.switch_every.filter(|n| *n > 0) {
                if rendered % every == 0 {
                    let mode = session.switch_selector()?;
                    println!("{}", format!("Switched to {} camera", mode.label()).cyan());
                }
            }
            if args.max_frames.is_some_and(|max| rendered >= max) {
                break;
            }
        }

        // Sampled before polling the label so the last status is not missed.
        let drained = session.is_drained();
        if gaze_reader.has_changed() {
            if let Some(status) = gaze_reader.mark_seen() {
                print_status(&status);
            }
        }

        if drained && overlay.invalidations() == seen_invalidations {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    session.stop();
    println!(
        "Rendered {} frames ({} captured, {} analyzed, {} dropped)",
        rendered,
        session.frames_produced(),
        session.frames_analyzed(),
        session.frames_dropped()
    );
    if let Some(out) = &frames_out {
        println!("Wrote {} frames", out.written());
    }
    Ok(())
}
