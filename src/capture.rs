//! The capture loop.
//!
//! ```text
//! Initializing --(ok)--> Running --(signal)--> Terminating
//!      |                                           ^
//!      +----------------(fatal error)--------------+
//! ```
//!
//! One cycle:
//! 1. check the termination signal
//! 2. lock planar, acquire camera frame into it, unlock, notify planar
//! 3. lock packed, convert planar -> packed, blit preview, unlock, notify packed
//!
//! The two region locks are never held at the same time. The planar region is
//! read during step 3 without its lock: this loop is its only writer.

use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};

use crate::convert::i420_to_argb;
use crate::frame::{FrameGeometry, FrameRate};
use crate::ingest::FrameSource;
use crate::preview::PreviewSink;
use crate::shm::PublishedBuffer;
use crate::signal::TerminationSignal;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Everything the loop needs to come up.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub geometry: FrameGeometry,
    pub frame_rate: FrameRate,
    /// Shared memory name of the I420 region.
    pub planar_name: String,
    /// Shared memory name of the ARGB region.
    pub packed_name: String,
    /// Pause after opening the camera, before publishing anything.
    pub warmup: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    Terminating,
}

#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub frames_published: u64,
    pub elapsed: Duration,
}

impl CaptureStats {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_published as f64 / secs
        } else {
            0.0
        }
    }
}

pub struct CaptureLoop<S, P> {
    geometry: FrameGeometry,
    source: S,
    planar: PublishedBuffer,
    packed: PublishedBuffer,
    preview: P,
    state: LoopState,
    frames_published: u64,
}

impl<S: FrameSource, P: PreviewSink> CaptureLoop<S, P> {
    /// Open the camera, create both regions and bring up the preview.
    ///
    /// Any error here is fatal. Regions created before the failure are
    /// removed again when they drop.
    pub fn initialize(settings: &CaptureSettings, mut source: S, mut preview: P) -> Result<Self> {
        let geometry = settings.geometry;

        source.open(geometry, settings.frame_rate)?;
        if !settings.warmup.is_zero() {
            log::info!(
                "camera warm-up: waiting {} ms before publishing",
                settings.warmup.as_millis()
            );
            std::thread::sleep(settings.warmup);
        }

        let planar = PublishedBuffer::create(&settings.planar_name, geometry.planar_len())?;
        let packed = PublishedBuffer::create(&settings.packed_name, geometry.packed_len())?;
        log::info!(
            "data from camera available in I420 format in shared memory '{}' ({}) and in ARGB format in shared memory '{}' ({})",
            planar.name(),
            planar.size(),
            packed.name(),
            packed.size()
        );

        preview.initialize(geometry)?;

        Ok(Self {
            geometry,
            source,
            planar,
            packed,
            preview,
            state: LoopState::Initializing,
            frames_published: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published
    }

    /// Run cycles until `signal` is raised, then shut the preview down.
    ///
    /// The signal is checked once per cycle, so a cycle in flight always
    /// completes. A cycle error ends the loop and is returned after cleanup.
    pub fn run<T: TerminationSignal + ?Sized>(&mut self, signal: &T) -> Result<CaptureStats> {
        if self.state == LoopState::Terminating {
            bail!("capture loop already terminated");
        }
        self.state = LoopState::Running;
        log::info!("capture loop running ({})", self.geometry);

        let started = Instant::now();
        let mut last_health_log = started;
        let mut frames_at_last_log = self.frames_published;

        let result = loop {
            if signal.is_signaled() {
                break Ok(());
            }
            if let Err(err) = self.cycle() {
                break Err(err);
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let window = last_health_log.elapsed().as_secs_f64();
                log::info!(
                    "published {} frames ({:.1} fps)",
                    self.frames_published,
                    (self.frames_published - frames_at_last_log) as f64 / window
                );
                last_health_log = Instant::now();
                frames_at_last_log = self.frames_published;
            }
        };

        self.state = LoopState::Terminating;
        self.preview.shutdown();

        let stats = CaptureStats {
            frames_published: self.frames_published,
            elapsed: started.elapsed(),
        };
        match &result {
            Ok(()) => log::info!(
                "capture loop stopped after {} frames ({:.1} fps)",
                stats.frames_published,
                stats.fps()
            ),
            Err(err) => log::error!(
                "capture loop aborted after {} frames: {:#}",
                stats.frames_published,
                err
            ),
        }
        result.map(|()| stats)
    }

    /// One acquire -> convert -> publish cycle.
    fn cycle(&mut self) -> Result<()> {
        {
            let mut planar = self.planar.lock()?;
            self.source
                .acquire_into(&mut planar)
                .with_context(|| format!("acquire frame from {}", self.source.describe()))?;
        }
        self.planar.notify_all()?;

        {
            let mut packed = self.packed.lock()?;
            let planar = self.planar.last_written();
            i420_to_argb(planar, self.geometry, &mut packed)?;
            self.preview.blit(&packed).context("preview blit")?;
        }
        self.packed.notify_all()?;

        self.frames_published += 1;
        Ok(())
    }
}
