//! Frame sources.
//!
//! A source delivers I420 frames straight into a caller-provided buffer:
//! - `stub://...` devices: synthetic moving test pattern (no hardware)
//! - V4L2 devices such as `/dev/video0` (feature: ingest-v4l2)
//!
//! The source paces the capture loop. `acquire_into` blocks until the next
//! frame is available; there is no other throttle.

use anyhow::Result;

use crate::frame::{FrameGeometry, FrameRate};

pub mod camera;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use camera::CameraSource;

/// Capability to acquire raw planar frames.
pub trait FrameSource {
    /// Open the sensor for `geometry`. `rate` is a hint.
    ///
    /// Failure here is fatal to the publisher; it is never retried.
    fn open(&mut self, geometry: FrameGeometry, rate: FrameRate) -> Result<()>;

    /// Block until the next frame is ready and write it into `planar`.
    ///
    /// `planar` is exactly `geometry.planar_len()` bytes.
    fn acquire_into(&mut self, planar: &mut [u8]) -> Result<()>;

    /// Human-readable identity for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self, geometry: FrameGeometry, rate: FrameRate) -> Result<()> {
        (**self).open(geometry, rate)
    }

    fn acquire_into(&mut self, planar: &mut [u8]) -> Result<()> {
        (**self).acquire_into(planar)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
