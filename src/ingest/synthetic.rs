use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};

use crate::error::PublisherError;
use crate::frame::{FrameGeometry, FrameRate};

/// Synthetic source for `stub://` devices.
///
/// Produces a diagonal luma ramp that scrolls one pixel per frame over a
/// fixed chroma gradient, paced to the requested frame rate.
pub(super) struct SyntheticSource {
    device: String,
    geometry: Option<FrameGeometry>,
    frame_interval: Duration,
    next_due: Option<Instant>,
    frame_count: u64,
}

impl SyntheticSource {
    pub(super) fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            geometry: None,
            frame_interval: Duration::ZERO,
            next_due: None,
            frame_count: 0,
        }
    }

    pub(super) fn device(&self) -> &str {
        &self.device
    }

    pub(super) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Synthetic sources are always available; only the rate can be refused.
    pub(super) fn open(&mut self, geometry: FrameGeometry, rate: FrameRate) -> Result<()> {
        let frame_interval = Duration::try_from_secs_f64(1.0 / rate.fps() as f64)
            .ok()
            .filter(|&interval| Instant::now().checked_add(interval).is_some())
            .ok_or_else(|| {
                PublisherError::configuration(format!(
                    "freq {} is too low to pace frames",
                    rate.fps()
                ))
            })?;
        self.geometry = Some(geometry);
        self.frame_interval = frame_interval;
        self.next_due = None;
        self.frame_count = 0;
        log::info!(
            "CameraSource: connected to {} (synthetic, {} @ {:.1} fps)",
            self.device,
            geometry,
            rate.fps()
        );
        Ok(())
    }

    pub(super) fn acquire_into(&mut self, planar: &mut [u8]) -> Result<()> {
        let geometry = self.geometry.context("synthetic source not opened")?;
        if planar.len() != geometry.planar_len() {
            bail!(
                "planar buffer is {} bytes, expected {}",
                planar.len(),
                geometry.planar_len()
            );
        }

        self.pace();
        self.fill(geometry, planar);
        self.frame_count += 1;
        Ok(())
    }

    /// Sleep until the next frame is due, like a sensor exposing at `rate`.
    fn pace(&mut self) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Do not try to catch up after a stall.
        let from = due.max(now);
        self.next_due = Some(from.checked_add(self.frame_interval).unwrap_or(from));
    }

    fn fill(&self, geometry: FrameGeometry, planar: &mut [u8]) {
        let width = geometry.width() as usize;
        let height = geometry.height() as usize;
        let layout = geometry.planar_layout();
        let shift = self.frame_count as usize;

        let (luma, chroma) = planar.split_at_mut(layout.luma_len);
        for (y, row) in luma.chunks_exact_mut(width).enumerate() {
            for (x, sample) in row.iter_mut().enumerate() {
                *sample = 16 + ((x + y + shift) % 220) as u8;
            }
        }

        let (u_plane, v_plane) = chroma.split_at_mut(layout.chroma_len);
        let chroma_width = layout.chroma_stride;
        let chroma_height = height / 2;
        for (y, (u_row, v_row)) in u_plane
            .chunks_exact_mut(chroma_width)
            .zip(v_plane.chunks_exact_mut(chroma_width))
            .enumerate()
        {
            let v = 64 + (y * 128 / chroma_height.max(1)) as u8;
            for (x, (u, v_sample)) in u_row.iter_mut().zip(v_row.iter_mut()).enumerate() {
                *u = 64 + (x * 128 / chroma_width.max(1)) as u8;
                *v_sample = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(width: u32, height: u32) -> Result<(SyntheticSource, FrameGeometry)> {
        let geometry = FrameGeometry::new(width, height)?;
        let mut source = SyntheticSource::new("stub://pattern");
        source.open(geometry, FrameRate::new(1000.0)?)?;
        Ok((source, geometry))
    }

    #[test]
    fn pattern_scrolls_between_frames() -> Result<()> {
        let (mut source, geometry) = opened(16, 8)?;
        let mut first = vec![0u8; geometry.planar_len()];
        let mut second = vec![0u8; geometry.planar_len()];

        source.acquire_into(&mut first)?;
        source.acquire_into(&mut second)?;

        assert_ne!(first, second);
        // Luma moves by one sample per frame.
        assert_eq!(second[0], first[1]);
        // Chroma is static.
        let luma_len = geometry.pixel_count();
        assert_eq!(first[luma_len..], second[luma_len..]);
        Ok(())
    }

    #[test]
    fn samples_stay_in_video_range() -> Result<()> {
        let (mut source, geometry) = opened(640, 480)?;
        let mut planar = vec![0u8; geometry.planar_len()];
        source.acquire_into(&mut planar)?;

        let luma_len = geometry.pixel_count();
        assert!(planar[..luma_len].iter().all(|&y| (16..=235).contains(&y)));
        assert!(planar[luma_len..].iter().all(|&c| (64..=192).contains(&c)));
        Ok(())
    }

    #[test]
    fn rejects_wrong_buffer_and_unopened_use() -> Result<()> {
        let mut unopened = SyntheticSource::new("stub://pattern");
        assert!(unopened.acquire_into(&mut [0u8; 12]).is_err());

        let (mut source, _) = opened(4, 2)?;
        assert!(source.acquire_into(&mut [0u8; 11]).is_err());
        Ok(())
    }

    #[test]
    fn unpaceable_rate_is_a_configuration_error() -> Result<()> {
        let geometry = FrameGeometry::new(4, 2)?;
        for fps in [1e-20, 1e-19, f32::MIN_POSITIVE] {
            let mut source = SyntheticSource::new("stub://slow");
            let err = source
                .open(geometry, FrameRate::new(fps)?)
                .err()
                .expect("rate must be rejected");
            assert!(matches!(
                err.downcast_ref::<PublisherError>(),
                Some(PublisherError::Configuration(_))
            ));
            assert!(source.acquire_into(&mut [0u8; 12]).is_err());
        }
        Ok(())
    }

    #[test]
    fn paces_to_frame_rate() -> Result<()> {
        let geometry = FrameGeometry::new(4, 2)?;
        let mut source = SyntheticSource::new("stub://paced");
        source.open(geometry, FrameRate::new(50.0)?)?;
        let mut planar = vec![0u8; geometry.planar_len()];

        let start = Instant::now();
        for _ in 0..4 {
            source.acquire_into(&mut planar)?;
        }
        // First frame is immediate, three more at 20ms each.
        assert!(start.elapsed() >= Duration::from_millis(55));
        Ok(())
    }
}
