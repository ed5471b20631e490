//! I420 to ARGB conversion.
//!
//! Output is "ARGB" as a little-endian 32-bit word per pixel, so the bytes in
//! memory are `B, G, R, A` with `A = 0xFF`. This is the layout X11 and most
//! framebuffer APIs accept directly for 24/32-bit visuals.
//!
//! Colour math is BT.601 limited range in 8.8 fixed point:
//! - R = 1.164 * (Y - 16) + 1.596 * (V - 128)
//! - G = 1.164 * (Y - 16) - 0.391 * (U - 128) - 0.813 * (V - 128)
//! - B = 1.164 * (Y - 16) + 2.018 * (U - 128)
//!
//! Coefficients are `298/409/100/208/516` with a `>> 8`. libyuv's
//! `I420ToARGB` uses 6-bit coefficients (`YG = 18997`, `UB = 128`, `UG = 25`,
//! `VG = 52`, `VR = 102`, `>> 6`), so individual channels can differ from its
//! output by 1. Consumers comparing against libyuv bytes need a tolerance of 1.

use anyhow::{bail, Result};

use crate::frame::FrameGeometry;

/// Convert one YUV sample triple to `(r, g, b)`.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert a full I420 frame into a packed BGRA frame.
///
/// `planar` must be exactly `geometry.planar_len()` bytes and `packed` exactly
/// `geometry.packed_len()` bytes. Every output byte is overwritten.
pub fn i420_to_argb(planar: &[u8], geometry: FrameGeometry, packed: &mut [u8]) -> Result<()> {
    if planar.len() != geometry.planar_len() {
        bail!(
            "planar frame is {} bytes, expected {} for {}",
            planar.len(),
            geometry.planar_len(),
            geometry
        );
    }
    if packed.len() != geometry.packed_len() {
        bail!(
            "packed frame is {} bytes, expected {} for {}",
            packed.len(),
            geometry.packed_len(),
            geometry
        );
    }

    let width = geometry.width() as usize;
    let layout = geometry.planar_layout();
    let (y_plane, u_plane, v_plane) = layout.split(planar);

    for (row, (out_row, y_row)) in packed
        .chunks_exact_mut(geometry.packed_stride())
        .zip(y_plane.chunks_exact(width))
        .enumerate()
    {
        let chroma_start = (row / 2) * layout.chroma_stride;
        let chroma_end = chroma_start + layout.chroma_stride;
        let u_row = &u_plane[chroma_start..chroma_end];
        let v_row = &v_plane[chroma_start..chroma_end];

        for (col, (pixel, &y)) in out_row.chunks_exact_mut(4).zip(y_row).enumerate() {
            let (r, g, b) = yuv_to_rgb(y, u_row[col / 2], v_row[col / 2]);
            pixel.copy_from_slice(&[b, g, r, 0xFF]);
        }
    }

    Ok(())
}
