//! camera-shm
//!
//! Publishes camera frames to named shared memory in two encodings:
//!
//! - I420 (planar 4:2:0), `width * height * 3 / 2` bytes
//! - ARGB (packed, B G R A in memory), `width * height * 4` bytes
//!
//! Each region carries its own process-shared lock and condition variable.
//! The producer writes a frame under the lock, releases it and broadcasts;
//! consumers wait for the broadcast and read under the same lock. Regions
//! always hold only the latest frame.
//!
//! # Module Structure
//!
//! - `frame`: geometry, frame rate, plane layout
//! - `convert`: I420 -> ARGB
//! - `shm`: published (producer) and subscribed (consumer) regions
//! - `ingest`: frame sources (synthetic, V4L2)
//! - `preview`: optional preview window
//! - `signal`: termination signal
//! - `capture`: the capture loop tying it together
//! - `config`: publisher configuration

pub mod capture;
pub mod config;
pub mod convert;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod preview;
pub mod shm;
pub mod signal;

pub use capture::{CaptureLoop, CaptureSettings, CaptureStats, LoopState};
pub use config::{ConfigOverrides, PublisherConfig};
pub use convert::i420_to_argb;
pub use error::PublisherError;
pub use frame::{FrameGeometry, FrameRate, PlanarLayout};
pub use ingest::{CameraSource, FrameSource};
pub use preview::{NullPreview, PreviewSink};
pub use shm::{PublishedBuffer, ReadGuard, SubscribedBuffer, WriteGuard};
pub use signal::{ShutdownFlag, TerminationSignal};
