//! shm_watch - follow a region published by camera_shm
//!
//! Attaches to a named shared memory region as a consumer, waits for the
//! producer's broadcasts and reports how many frames arrived. Useful to check
//! that a publisher is alive without writing a full consumer.

use anyhow::{bail, Result};
use clap::Parser;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use camera_shm::{ShutdownFlag, SubscribedBuffer, TerminationSignal};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch a camera_shm shared memory region")]
struct Args {
    /// Name of the shared memory region to follow.
    #[arg(long, env = "SHM_WATCH_NAME", default_value = "video0.argb")]
    name: String,

    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Give up if no frame arrives for this long.
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
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
    let shutdown = ShutdownFlag::new();
    shutdown.install_signal_handler()?;

    let region = SubscribedBuffer::attach(&args.name)?;
    log::info!(
        "attached to shared memory '{}' ({} bytes)",
        region.name(),
        region.size()
    );

    let timeout = Duration::from_millis(args.timeout_ms);
    let mut frames: u64 = 0;
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();
    let mut frames_at_last_report: u64 = 0;

    while !shutdown.is_signaled() {
        if args.frames.is_some_and(|limit| frames >= limit) {
            break;
        }
        // Short waits so Ctrl-C is noticed even when the producer stalls.
        if !region.wait_timeout(Duration::from_millis(250))? {
            if last_frame.elapsed() >= timeout {
                bail!(
                    "no frame on '{}' for {} ms",
                    region.name(),
                    timeout.as_millis()
                );
            }
            continue;
        }

        let checksum = {
            let frame = region.lock()?;
            frame.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
        };
        frames += 1;
        last_frame = Instant::now();
        log::debug!("frame {frames}: checksum {checksum:#010x}");

        if last_report.elapsed() >= REPORT_INTERVAL {
            let window = last_report.elapsed().as_secs_f64();
            log::info!(
                "received {} frames ({:.1} fps)",
                frames,
                (frames - frames_at_last_report) as f64 / window
            );
            last_report = Instant::now();
            frames_at_last_report = frames;
        }
    }

    log::info!("stopped after {frames} frames");
    Ok(())
}
