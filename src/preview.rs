//! Local preview of the packed frame.
//!
//! The capture loop always talks to a `PreviewSink`; when no preview was
//! requested it gets a `NullPreview`. `blit` is called with the packed region
//! still locked, so sinks must copy what they need before returning.

use anyhow::Result;

#[cfg(not(feature = "preview-window"))]
use crate::error::PublisherError;
use crate::frame::FrameGeometry;

pub trait PreviewSink {
    /// Prepare a display surface for frames of `geometry`.
    fn initialize(&mut self, geometry: FrameGeometry) -> Result<()>;

    /// Show one packed BGRA frame. Called with the packed region locked.
    fn blit(&mut self, packed: &[u8]) -> Result<()>;

    /// Release display resources. Called once, when the loop terminates.
    fn shutdown(&mut self);
}

impl<P: PreviewSink + ?Sized> PreviewSink for Box<P> {
    fn initialize(&mut self, geometry: FrameGeometry) -> Result<()> {
        (**self).initialize(geometry)
    }

    fn blit(&mut self, packed: &[u8]) -> Result<()> {
        (**self).blit(packed)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Preview that shows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn initialize(&mut self, _geometry: FrameGeometry) -> Result<()> {
        Ok(())
    }

    fn blit(&mut self, _packed: &[u8]) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) {}
}

/// Pick the preview for the `--verbose` flag.
///
/// Asking for a window in a build without `preview-window` is a fatal
/// configuration problem, not a silent downgrade.
pub fn select(verbose: bool) -> Result<Box<dyn PreviewSink>> {
    if !verbose {
        return Ok(Box::new(NullPreview));
    }

    #[cfg(feature = "preview-window")]
    {
        Ok(Box::new(window::WindowPreview::new()))
    }
    #[cfg(not(feature = "preview-window"))]
    {
        Err(PublisherError::PreviewUnavailable(
            "built without the preview-window feature".to_string(),
        )
        .into())
    }
}

#[cfg(feature = "preview-window")]
pub use window::WindowPreview;

#[cfg(feature = "preview-window")]
mod window {
    use anyhow::{Context, Result};
    use minifb::{Window, WindowOptions};

    use super::PreviewSink;
    use crate::error::PublisherError;
    use crate::frame::FrameGeometry;

    const WINDOW_TITLE: &str = "camera-shm preview";

    /// Desktop window showing the packed frame.
    pub struct WindowPreview {
        window: Option<Window>,
        pixels: Vec<u32>,
        width: usize,
        height: usize,
    }

    impl WindowPreview {
        pub fn new() -> Self {
            Self {
                window: None,
                pixels: Vec::new(),
                width: 0,
                height: 0,
            }
        }
    }

    impl Default for WindowPreview {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PreviewSink for WindowPreview {
        fn initialize(&mut self, geometry: FrameGeometry) -> Result<()> {
            self.width = geometry.width() as usize;
            self.height = geometry.height() as usize;
            let window = Window::new(
                WINDOW_TITLE,
                self.width,
                self.height,
                WindowOptions::default(),
            )
            .map_err(|err| PublisherError::PreviewUnavailable(err.to_string()))?;
            // Allocated once; reused for every frame.
            self.pixels = vec![0u32; geometry.pixel_count()];
            self.window = Some(window);
            log::info!("preview window opened ({})", geometry);
            Ok(())
        }

        fn blit(&mut self, packed: &[u8]) -> Result<()> {
            let Some(window) = self.window.as_mut() else {
                return Ok(());
            };
            // BGRA bytes read as a little-endian word are 0xAARRGGBB, which
            // is what minifb expects (alpha ignored).
            for (dst, src) in self.pixels.iter_mut().zip(packed.chunks_exact(4)) {
                *dst = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            }
            window
                .update_with_buffer(&self.pixels, self.width, self.height)
                .context("update preview window")
        }

        fn shutdown(&mut self) {
            if self.window.take().is_some() {
                log::info!("preview window closed");
            }
        }
    }
}
