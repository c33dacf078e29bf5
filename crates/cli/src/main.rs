use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

use facetrack_core::capture::domain::camera_source::{CameraConstraints, CameraSource, FacingMode};
use facetrack_core::capture::infrastructure::ffmpeg_camera::FfmpegCameraSource;
use facetrack_core::provisioning::infrastructure::download_provisioner::DownloadProvisioner;
use facetrack_core::recognition::domain::landmark_engine::LandmarkEngine;
use facetrack_core::recognition::infrastructure::onnx_landmark_engine::OnnxLandmarkEngine;
use facetrack_core::tracking::detection_loop::{
    DetectionResult, EngineFactory, FaceTrackingLoop, LoopConfig,
};
use facetrack_core::tracking::tick_telemetry::LogTickTelemetry;

/// Continuous webcam face-landmark detection.
#[derive(Parser)]
#[command(name = "facetrack")]
struct Cli {
    /// Camera device (e.g. /dev/video0) or video file.
    input: PathBuf,

    /// Milliseconds between detection ticks.
    #[arg(long, default_value = "60")]
    interval_ms: u64,

    /// Square capture size in pixels.
    #[arg(long, default_value = "480")]
    size: u32,

    /// How long to run before stopping.
    #[arg(long, default_value = "10")]
    duration_secs: u64,

    /// Directory with pre-bundled model files (skips downloading).
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Emit one JSON line per detection instead of plain text.
    #[arg(long)]
    json: bool,

    /// Grab a single frame, write it as PNG, and exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Serialize)]
struct DetectionRecord {
    tick: u64,
    latency_ms: f64,
    center: Option<(f64, f64)>,
    profile_ratio: f64,
    yaw_deg: Option<f64>,
    roll_deg: Option<f64>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let constraints = CameraConstraints {
        width: cli.size,
        height: cli.size,
        facing: FacingMode::User,
    };

    if let Some(ref path) = cli.snapshot {
        return save_snapshot(&cli.input, &constraints, path);
    }

    let provisioner = DownloadProvisioner::new(cli.model_dir.clone()).with_progress(Box::new(
        |downloaded, total| {
            if total > 0 {
                log::debug!("asset download: {downloaded}/{total} bytes");
            }
        },
    ));

    let engine_factory: EngineFactory = Box::new(|assets, options| {
        Ok(Box::new(OnnxLandmarkEngine::from_assets(assets, options.clone())?)
            as Box<dyn LandmarkEngine>)
    });

    let json = cli.json;
    let ticks = AtomicU64::new(0);
    let callback = move |detection: DetectionResult| {
        let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
        print_detection(tick, &detection, json);
    };

    let config = LoopConfig {
        interval: Duration::from_millis(cli.interval_ms),
        constraints,
        ..LoopConfig::default()
    };

    let tracking = FaceTrackingLoop::new(
        Box::new(FfmpegCameraSource::new(&cli.input)),
        Box::new(provisioner),
        engine_factory,
        callback,
    )
    .with_config(config)
    .with_telemetry(Box::new(LogTickTelemetry::new()));

    log::info!(
        "tracking {} for {}s at {}ms intervals",
        cli.input.display(),
        cli.duration_secs,
        cli.interval_ms
    );

    tracking.init()?;
    thread::sleep(Duration::from_secs(cli.duration_secs));
    tracking.stop();
    tracking.emit_summary();

    Ok(())
}

fn print_detection(tick: u64, detection: &DetectionResult, json: bool) {
    let landmarks = &detection.result.landmarks;
    let latency_ms = detection.latency.as_secs_f64() * 1000.0;
    let transform = detection.result.transform.as_ref();

    if json {
        let record = DetectionRecord {
            tick,
            latency_ms,
            center: landmarks.center(),
            profile_ratio: landmarks.profile_ratio(),
            yaw_deg: transform.map(|t| t.yaw().to_degrees()),
            roll_deg: transform.map(|t| t.roll().to_degrees()),
        };
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("failed to serialize detection: {e}"),
        }
        return;
    }

    match landmarks.center() {
        Some((cx, cy)) => {
            let pose = transform
                .map(|t| {
                    format!(
                        " yaw={:.1}° roll={:.1}°",
                        t.yaw().to_degrees(),
                        t.roll().to_degrees()
                    )
                })
                .unwrap_or_default();
            println!("tick {tick}: center=({cx:.1}, {cy:.1}){pose} latency={latency_ms:.1}ms");
        }
        None => println!("tick {tick}: no visible landmarks latency={latency_ms:.1}ms"),
    }
}

/// One-shot camera check: open a track, grab a frame, save it as PNG.
fn save_snapshot(
    input: &PathBuf,
    constraints: &CameraConstraints,
    dest: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut source = FfmpegCameraSource::new(input);
    let mut track = source.open_track(constraints)?;
    let frame = track.grab_frame()?;
    track.stop();

    let image = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
        .ok_or("frame buffer does not match its dimensions")?;
    image.save(dest)?;

    println!(
        "saved {}x{} snapshot to {}",
        frame.width(),
        frame.height(),
        dest.display()
    );
    Ok(())
}
