//! Frame geometry and byte layout.
//!
//! Everything that depends on the frame size is derived here, once, from
//! `FrameGeometry`:
//!
//! - `planar_len()`: I420 frame, one luma plane of `width * height` bytes
//!   followed by the U and V planes of `width * height / 4` bytes each.
//! - `packed_len()`: 4 bytes per pixel, row-major, stride `width * 4`.
//!
//! Geometry is fixed for the lifetime of the process. Both shared regions are
//! sized from it at startup and never resized.

use anyhow::Result;

use crate::error::PublisherError;

// ----------------------------------------------------------------------------
// FrameGeometry
// ----------------------------------------------------------------------------

/// Immutable frame size. Width and height are positive and even (4:2:0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    width: u32,
    height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PublisherError::configuration(format!(
                "frame size must be positive; found {width}x{height}"
            ))
            .into());
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(PublisherError::configuration(format!(
                "frame size must be even for 4:2:0 chroma; found {width}x{height}"
            ))
            .into());
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte size of one I420 frame.
    pub fn planar_len(&self) -> usize {
        self.pixel_count() * 3 / 2
    }

    /// Byte size of one packed 4-channel frame.
    pub fn packed_len(&self) -> usize {
        self.pixel_count() * 4
    }

    /// Row stride of the packed frame in bytes.
    pub fn packed_stride(&self) -> usize {
        self.width as usize * 4
    }

    pub fn planar_layout(&self) -> PlanarLayout {
        let luma_len = self.pixel_count();
        let chroma_len = luma_len / 4;
        PlanarLayout {
            luma_len,
            chroma_len,
            u_offset: luma_len,
            v_offset: luma_len + chroma_len,
            chroma_stride: self.width as usize / 2,
        }
    }
}

impl std::fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Plane offsets inside an I420 frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanarLayout {
    pub luma_len: usize,
    pub chroma_len: usize,
    pub u_offset: usize,
    pub v_offset: usize,
    /// Bytes per chroma row (`width / 2`).
    pub chroma_stride: usize,
}

impl PlanarLayout {
    /// Split a full planar frame into its `(y, u, v)` planes.
    pub fn split<'a>(&self, planar: &'a [u8]) -> (&'a [u8], &'a [u8], &'a [u8]) {
        let (y, chroma) = planar.split_at(self.luma_len);
        let (u, v) = chroma.split_at(self.chroma_len);
        (y, u, &v[..self.chroma_len])
    }
}

// ----------------------------------------------------------------------------
// FrameRate
// ----------------------------------------------------------------------------

/// Target frame rate in frames per second.
///
/// Only a hint for the camera; the capture loop is paced by acquisition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameRate(f32);

impl FrameRate {
    pub fn new(fps: f32) -> Result<Self> {
        // Written this way so NaN is rejected too.
        if !(fps > 0.0) || !fps.is_finite() {
            return Err(
                PublisherError::configuration(format!("freq must be larger than 0; found {fps}"))
                    .into(),
            );
        }
        Ok(Self(fps))
    }

    pub fn fps(&self) -> f32 {
        self.0
    }

    /// Whole frames per second for devices that only accept integers.
    pub fn whole_fps(&self) -> u32 {
        (self.0.round() as u32).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes_follow_geometry() -> Result<()> {
        for (w, h) in [(2, 2), (4, 2), (640, 480), (1280, 720), (1920, 1080)] {
            let g = FrameGeometry::new(w, h)?;
            let pixels = (w * h) as usize;
            assert_eq!(g.planar_len(), pixels * 3 / 2);
            assert_eq!(g.packed_len(), pixels * 4);
            assert_eq!(g.packed_stride(), w as usize * 4);
        }
        Ok(())
    }

    #[test]
    fn planar_layout_offsets() -> Result<()> {
        let layout = FrameGeometry::new(640, 480)?.planar_layout();
        assert_eq!(layout.luma_len, 307_200);
        assert_eq!(layout.chroma_len, 76_800);
        assert_eq!(layout.u_offset, 307_200);
        assert_eq!(layout.v_offset, 384_000);
        assert_eq!(layout.v_offset + layout.chroma_len, 460_800);
        assert_eq!(layout.chroma_stride, 320);
        Ok(())
    }

    #[test]
    fn split_returns_planes_in_order() -> Result<()> {
        let g = FrameGeometry::new(4, 2)?;
        let planar: Vec<u8> = (0..12).collect();
        let (y, u, v) = g.planar_layout().split(&planar);
        assert_eq!(y, &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(u, &[8, 9]);
        assert_eq!(v, &[10, 11]);
        Ok(())
    }

    #[test]
    fn rejects_odd_or_empty_geometry() {
        assert!(FrameGeometry::new(0, 480).is_err());
        assert!(FrameGeometry::new(640, 0).is_err());
        assert!(FrameGeometry::new(641, 480).is_err());
        assert!(FrameGeometry::new(640, 481).is_err());
    }

    #[test]
    fn rejects_non_positive_frame_rate() {
        assert!(FrameRate::new(0.0).is_err());
        assert!(FrameRate::new(-5.0).is_err());
        assert!(FrameRate::new(f32::NAN).is_err());
        assert!(FrameRate::new(f32::INFINITY).is_err());
        assert!(FrameRate::new(0.5).is_ok());
    }

    #[test]
    fn whole_fps_never_drops_to_zero() -> Result<()> {
        assert_eq!(FrameRate::new(0.2)?.whole_fps(), 1);
        assert_eq!(FrameRate::new(29.97)?.whole_fps(), 30);
        Ok(())
    }
}
