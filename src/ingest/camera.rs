//! Camera frame source.
//!
//! `CameraSource` picks a backend from the device path: `stub://` paths get
//! the synthetic generator, anything else is opened as a V4L2 device.

use anyhow::Result;

use super::synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::DeviceSource;
use super::FrameSource;
use crate::error::PublisherError;
use crate::frame::{FrameGeometry, FrameRate};

pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Camera frame source.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceSource),
}

impl CameraSource {
    pub fn new(device: &str) -> Result<Self> {
        if device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticSource::new(device)),
            });
        }

        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceSource::new(device)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(PublisherError::device_open(
                device,
                "built without the ingest-v4l2 feature; only stub:// devices are available",
            )
            .into())
        }
    }

    /// Frames delivered since `open`.
    pub fn frames_captured(&self) -> u64 {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.frames_captured(),
        }
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self, geometry: FrameGeometry, rate: FrameRate) -> Result<()> {
        let result = match &mut self.backend {
            CameraBackend::Synthetic(source) => source.open(geometry, rate),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.open(geometry, rate),
        };
        result.map_err(|err| match err.downcast::<PublisherError>() {
            Ok(err) => err.into(),
            Err(err) => PublisherError::device_open(self.describe(), format!("{err:#}")).into(),
        })
    }

    fn acquire_into(&mut self, planar: &mut [u8]) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.acquire_into(planar),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.acquire_into(planar),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            CameraBackend::Synthetic(source) => format!("{} (synthetic)", source.device()),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.device().to_string(),
        }
    }
}
