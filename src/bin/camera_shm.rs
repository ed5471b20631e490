//! camera_shm - camera frame publisher
//!
//! Captures frames from a camera and publishes every frame to two named
//! shared memory regions: one in I420 and one in ARGB format. With
//! `--verbose` the ARGB frame is also shown in a preview window.
//!
//! Exit codes: 0 after Ctrl-C / SIGTERM, 1 on any startup or capture failure.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use camera_shm::{
    preview, CameraSource, CaptureLoop, ConfigOverrides, PublisherConfig, ShutdownFlag,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Publish camera frames in I420 and ARGB format to named shared memory",
    after_help = "Example: camera_shm --width=640 --height=480 --freq=20 --verbose"
)]
struct Args {
    /// Desired width of a frame.
    #[arg(long, env = "CAMERA_SHM_WIDTH")]
    width: Option<u32>,

    /// Desired height of a frame.
    #[arg(long, env = "CAMERA_SHM_HEIGHT")]
    height: Option<u32>,

    /// Desired frame rate.
    #[arg(long, env = "CAMERA_SHM_FREQ")]
    freq: Option<f32>,

    /// Name of the shared memory for the I420 image [default: video0.i420].
    #[arg(long = "name.i420", env = "CAMERA_SHM_NAME_I420")]
    name_i420: Option<String>,

    /// Name of the shared memory for the ARGB image [default: video0.argb].
    #[arg(long = "name.argb", env = "CAMERA_SHM_NAME_ARGB")]
    name_argb: Option<String>,

    /// Camera device; stub://<name> selects the synthetic test pattern [default: /dev/video0].
    #[arg(long, env = "CAMERA_SHM_DEVICE")]
    device: Option<String>,

    /// Camera warm-up time before publishing [default: 3000].
    #[arg(long, env = "CAMERA_SHM_WARMUP_MS")]
    warmup_ms: Option<u64>,

    /// Display the captured image.
    #[arg(long)]
    verbose: bool,

    /// JSON config file (values on the command line take precedence).
    #[arg(long, env = "CAMERA_SHM_CONFIG")]
    config: Option<PathBuf>,
}

impl Args {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config,
            width: self.width,
            height: self.height,
            freq: self.freq,
            device: self.device,
            warmup_ms: self.warmup_ms,
            verbose: self.verbose,
            name_i420: self.name_i420,
            name_argb: self.name_argb,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = PublisherConfig::load(&args.into_overrides())?;

    let shutdown = ShutdownFlag::new();
    shutdown.install_signal_handler()?;

    let source = CameraSource::new(&cfg.device)?;
    let preview = preview::select(cfg.verbose)?;

    let mut capture = CaptureLoop::initialize(&cfg.capture, source, preview)?;
    capture.run(&shutdown)?;
    Ok(())
}
