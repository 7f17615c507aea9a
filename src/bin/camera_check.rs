//! camera_check - capture a few frames and save them, to check the camera

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rover_kernel::frame::Roi;
use rover_kernel::recording::{FrameWriter, JpegFrameWriter};
use rover_kernel::{CameraConfig, FrameSource, V4l2Camera};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera device, or stub://name for synthetic frames.
    #[arg(long, default_value = "/dev/video0")]
    device: String,
    #[arg(long, default_value_t = 240)]
    width: u32,
    #[arg(long, default_value_t = 120)]
    height: u32,
    /// Number of frames to capture.
    #[arg(long, default_value_t = 10)]
    count: u32,
    /// Crop to the stock region of interest (0, 0.2, 0.8, 0.8).
    #[arg(long)]
    roi: bool,
    /// Output directory for the captured frames.
    #[arg(long, default_value = "camera_check")]
    out: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = CameraConfig {
        device: args.device.clone(),
        width: args.width,
        height: args.height,
        roi: if args.roi {
            Some(Roi::new(0.0, 0.2, 0.8, 0.8)?)
        } else {
            None
        },
        ..CameraConfig::default()
    };
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create {}", args.out.display()))?;

    let mut camera = V4l2Camera::new(config)?;
    camera.connect()?;
    let result = capture(&mut camera, &args);
    camera.release();
    let elapsed = result?;

    log::info!(
        "captured {} frames into {} in {:.2?} ({:.1} fps)",
        args.count,
        args.out.display(),
        elapsed,
        args.count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}

fn capture(camera: &mut V4l2Camera, args: &Args) -> Result<Duration> {
    let mut writer = JpegFrameWriter::new();
    let started = Instant::now();
    for index in 0..args.count {
        let frame = camera
            .next_frame()
            .with_context(|| format!("capture frame {}", index))?;
        let path = args
            .out
            .join(format!("frame_{}.{}", index, writer.extension()));
        writer.write(&frame, &path)?;
        log::debug!("frame {}: {}x{} -> {}", index, frame.width, frame.height, path.display());
    }
    Ok(started.elapsed())
}
