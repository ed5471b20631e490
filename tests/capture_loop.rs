use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

use camera_shm::{
    CameraSource, CaptureLoop, CaptureSettings, FrameGeometry, FrameRate, FrameSource, LoopState,
    NullPreview, PreviewSink, PublishedBuffer, PublisherError, ShutdownFlag, SubscribedBuffer,
    TerminationSignal,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn settings(width: u32, height: u32) -> CaptureSettings {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id();
    CaptureSettings {
        geometry: FrameGeometry::new(width, height).unwrap(),
        frame_rate: FrameRate::new(30.0).unwrap(),
        planar_name: format!("camera-shm-it-loop-{pid}-{n}.i420"),
        packed_name: format!("camera-shm-it-loop-{pid}-{n}.argb"),
        warmup: Duration::ZERO,
    }
}

/// Fills every frame with a constant luma and counts acquisitions.
struct CountingSource {
    acquired: Arc<AtomicUsize>,
    fail_open: bool,
}

impl CountingSource {
    fn new(acquired: &Arc<AtomicUsize>) -> Self {
        Self {
            acquired: Arc::clone(acquired),
            fail_open: false,
        }
    }
}

impl FrameSource for CountingSource {
    fn open(&mut self, _geometry: FrameGeometry, _rate: FrameRate) -> Result<()> {
        if self.fail_open {
            return Err(PublisherError::device_open("mock", "no such camera").into());
        }
        Ok(())
    }

    fn acquire_into(&mut self, planar: &mut [u8]) -> Result<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        planar.fill(128);
        Ok(())
    }

    fn describe(&self) -> String {
        "counting mock".to_string()
    }
}

#[derive(Default)]
struct PreviewLog {
    initialized: usize,
    blits: usize,
    shutdowns: usize,
}

struct RecordingPreview {
    log: Arc<Mutex<PreviewLog>>,
}

impl PreviewSink for RecordingPreview {
    fn initialize(&mut self, _geometry: FrameGeometry) -> Result<()> {
        self.log.lock().unwrap().initialized += 1;
        Ok(())
    }

    fn blit(&mut self, packed: &[u8]) -> Result<()> {
        assert!(packed.chunks_exact(4).all(|px| px[3] == 0xFF));
        self.log.lock().unwrap().blits += 1;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.log.lock().unwrap().shutdowns += 1;
    }
}

/// Raises `flag` from inside the source after `after` acquisitions.
struct SelfStoppingSource {
    flag: ShutdownFlag,
    after: usize,
    acquired: usize,
}

impl FrameSource for SelfStoppingSource {
    fn open(&mut self, _geometry: FrameGeometry, _rate: FrameRate) -> Result<()> {
        Ok(())
    }

    fn acquire_into(&mut self, planar: &mut [u8]) -> Result<()> {
        self.acquired += 1;
        if self.acquired == self.after {
            self.flag.raise();
        }
        planar.fill(16);
        Ok(())
    }

    fn describe(&self) -> String {
        "self stopping mock".to_string()
    }
}

#[test]
fn signal_raised_before_run_publishes_nothing() -> Result<()> {
    let acquired = Arc::new(AtomicUsize::new(0));
    let mut capture =
        CaptureLoop::initialize(&settings(8, 4), CountingSource::new(&acquired), NullPreview)?;

    let flag = ShutdownFlag::new();
    flag.raise();
    let stats = capture.run(&flag)?;

    assert_eq!(stats.frames_published, 0);
    assert_eq!(acquired.load(Ordering::SeqCst), 0);
    assert_eq!(capture.state(), LoopState::Terminating);
    Ok(())
}

#[test]
fn loop_stops_at_next_cycle_boundary() -> Result<()> {
    let flag = ShutdownFlag::new();
    let source = SelfStoppingSource {
        flag: flag.clone(),
        after: 5,
        acquired: 0,
    };
    let mut capture = CaptureLoop::initialize(&settings(8, 4), source, NullPreview)?;

    // The cycle that raised the flag still completes and is published.
    let stats = capture.run(&flag)?;
    assert_eq!(stats.frames_published, 5);
    assert_eq!(capture.source().acquired, 5);
    Ok(())
}

#[test]
fn preview_sees_every_frame_and_is_shut_down_once() -> Result<()> {
    let acquired = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(Mutex::new(PreviewLog::default()));
    let preview = RecordingPreview {
        log: Arc::clone(&log),
    };
    let mut capture =
        CaptureLoop::initialize(&settings(16, 8), CountingSource::new(&acquired), preview)?;
    assert_eq!(log.lock().unwrap().initialized, 1);

    let remaining = AtomicUsize::new(4);
    let stop = || remaining.fetch_sub(1, Ordering::SeqCst) == 0;
    let stats = capture.run(&stop)?;

    let log = log.lock().unwrap();
    assert_eq!(stats.frames_published, 4);
    assert_eq!(acquired.load(Ordering::SeqCst), 4);
    assert_eq!(log.blits, 4);
    assert_eq!(log.shutdowns, 1);
    Ok(())
}

#[test]
fn regions_are_visible_while_running_and_removed_afterwards() -> Result<()> {
    let cfg = settings(8, 4);
    let acquired = Arc::new(AtomicUsize::new(0));
    let mut capture =
        CaptureLoop::initialize(&cfg, CountingSource::new(&acquired), NullPreview)?;

    let planar = SubscribedBuffer::attach(&cfg.planar_name)?;
    let packed = SubscribedBuffer::attach(&cfg.packed_name)?;
    assert_eq!(planar.size(), 8 * 4 * 3 / 2);
    assert_eq!(packed.size(), 8 * 4 * 4);

    let remaining = AtomicUsize::new(1);
    capture.run(&|| remaining.fetch_sub(1, Ordering::SeqCst) == 0)?;

    assert!(planar.lock()?.iter().all(|&b| b == 128));
    assert!(packed
        .lock()?
        .chunks_exact(4)
        .all(|px| px == &[130, 130, 130, 0xFF]));

    drop(capture);
    assert!(SubscribedBuffer::attach(&cfg.planar_name).is_err());
    assert!(SubscribedBuffer::attach(&cfg.packed_name).is_err());
    Ok(())
}

#[test]
fn name_collision_fails_before_any_frame_is_acquired() -> Result<()> {
    let cfg = settings(8, 4);
    let _squatter = PublishedBuffer::create(&cfg.packed_name, 16)?;

    let acquired = Arc::new(AtomicUsize::new(0));
    let err = match CaptureLoop::initialize(&cfg, CountingSource::new(&acquired), NullPreview) {
        Ok(_) => bail!("initialize must fail on a taken name"),
        Err(err) => err,
    };

    assert!(matches!(
        err.downcast_ref::<PublisherError>(),
        Some(PublisherError::ResourceAllocation { .. })
    ));
    assert_eq!(acquired.load(Ordering::SeqCst), 0);
    // The planar region created before the failure is gone again.
    assert!(SubscribedBuffer::attach(&cfg.planar_name).is_err());
    Ok(())
}

#[test]
fn source_open_failure_is_a_device_error() -> Result<()> {
    let cfg = settings(8, 4);
    let acquired = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        acquired: Arc::clone(&acquired),
        fail_open: true,
    };
    let err = match CaptureLoop::initialize(&cfg, source, NullPreview) {
        Ok(_) => bail!("initialize must fail when the camera cannot be opened"),
        Err(err) => err,
    };

    assert!(matches!(
        err.downcast_ref::<PublisherError>(),
        Some(PublisherError::DeviceOpen { .. })
    ));
    assert!(SubscribedBuffer::attach(&cfg.planar_name).is_err());
    Ok(())
}

#[test]
fn synthetic_camera_runs_end_to_end() -> Result<()> {
    // Pacing is the source's job; a high rate keeps the test fast.
    let cfg = CaptureSettings {
        frame_rate: FrameRate::new(1000.0)?,
        ..settings(32, 24)
    };
    let source = CameraSource::new("stub://capture-loop")?;
    let mut capture = CaptureLoop::initialize(&cfg, source, NullPreview)?;
    assert_eq!(capture.geometry(), cfg.geometry);

    let remaining = AtomicUsize::new(10);
    let stop: &dyn TerminationSignal = &|| remaining.fetch_sub(1, Ordering::SeqCst) == 0;
    let stats = capture.run(stop)?;

    assert_eq!(stats.frames_published, 10);
    assert_eq!(capture.source().frames_captured(), 10);
    Ok(())
}

#[test]
fn vanishingly_low_rate_fails_startup_cleanly() -> Result<()> {
    let cfg = CaptureSettings {
        frame_rate: FrameRate::new(1e-20)?,
        ..settings(8, 4)
    };
    let source = CameraSource::new("stub://slow")?;
    let err = match CaptureLoop::initialize(&cfg, source, NullPreview) {
        Ok(_) => bail!("a rate that cannot be paced must be refused"),
        Err(err) => err,
    };

    assert!(matches!(
        err.downcast_ref::<PublisherError>(),
        Some(PublisherError::Configuration(_))
    ));
    assert!(SubscribedBuffer::attach(&cfg.planar_name).is_err());
    Ok(())
}
