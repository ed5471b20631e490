//! V4L2 device backend.
//!
//! Requests `YU12` (I420) at the configured geometry. The geometry is fixed for
//! the lifetime of the published regions, so a device that negotiates a
//! different size or pixel format is rejected at open time instead of being
//! scaled or converted here.

use anyhow::{anyhow, bail, Context, Result};
use ouroboros::self_referencing;

use crate::error::PublisherError;
use crate::frame::{FrameGeometry, FrameRate};

const FOURCC_YU12: &[u8; 4] = b"YU12";
const STREAM_BUFFERS: u32 = 4;

pub(super) struct DeviceSource {
    device: String,
    state: Option<DeviceState>,
    frame_count: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceSource {
    pub(super) fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            state: None,
            frame_count: 0,
        }
    }

    pub(super) fn device(&self) -> &str {
        &self.device
    }

    pub(super) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    pub(super) fn open(&mut self, geometry: FrameGeometry, rate: FrameRate) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = geometry.width();
        format.height = geometry.height();
        format.fourcc = v4l::FourCC::new(FOURCC_YU12);

        let format = device.set_format(&format).context("set v4l2 format")?;
        if format.fourcc != v4l::FourCC::new(FOURCC_YU12) {
            return Err(PublisherError::device_open(
                &self.device,
                format!("device does not deliver YU12 (negotiated {})", format.fourcc),
            )
            .into());
        }
        if format.width != geometry.width() || format.height != geometry.height() {
            return Err(PublisherError::device_open(
                &self.device,
                format!(
                    "device negotiated {}x{} instead of {}",
                    format.width, format.height, geometry
                ),
            )
            .into());
        }

        let params = v4l::video::capture::Parameters::with_fps(rate.whole_fps());
        if let Err(err) = device.set_params(&params) {
            log::warn!(
                "CameraSource: failed to set fps on {}: {}",
                self.device,
                err
            );
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        self.frame_count = 0;

        log::info!(
            "CameraSource: connected to {} ({} YU12 @ {} fps)",
            self.device,
            geometry,
            rate.whole_fps()
        );
        Ok(())
    }

    pub(super) fn acquire_into(&mut self, planar: &mut [u8]) -> Result<()> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| anyhow!(err).context("capture v4l2 frame"))?;

        if buf.len() < planar.len() {
            bail!(
                "v4l2 frame is {} bytes, expected at least {}",
                buf.len(),
                planar.len()
            );
        }
        planar.copy_from_slice(&buf[..planar.len()]);
        self.frame_count += 1;
        Ok(())
    }
}
