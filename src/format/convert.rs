//! Pixel layout conversion.
//!
//! All functions work on rows whose stride is rounded up to a 4-byte
//! boundary, matching how raw video buffers are laid out by the graph.

use crate::error::CodecError;

/// Row stride of a packed frame, or `None` if it does not fit in `usize`.
#[inline]
pub fn packed_stride(width: usize, bytes_per_pixel: usize) -> Option<usize> {
    width
        .checked_mul(bytes_per_pixel)?
        .checked_add(3)
        .map(|n| n & !3)
}

/// Plane geometry of a planar YUV 4:2:0 (I420) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I420Layout {
    /// Luma row stride.
    pub y_stride: usize,
    /// Chroma row stride (both planes).
    pub chroma_stride: usize,
    /// Offset of the U plane.
    pub u_offset: usize,
    /// Offset of the V plane.
    pub v_offset: usize,
    /// Total frame size in bytes.
    pub size: usize,
}

impl I420Layout {
    /// Computes the layout for the given dimensions.
    ///
    /// Returns `None` if the frame size does not fit in `usize`.
    pub fn new(width: usize, height: usize) -> Option<Self> {
        let y_stride = packed_stride(width, 1)?;
        let chroma_stride = packed_stride(width / 2 + width % 2, 1)?;
        let chroma_height = height / 2 + height % 2;
        let u_offset = y_stride.checked_mul(height)?;
        let chroma_size = chroma_stride.checked_mul(chroma_height)?;
        let v_offset = u_offset.checked_add(chroma_size)?;
        Some(Self {
            y_stride,
            chroma_stride,
            u_offset,
            v_offset,
            size: v_offset.checked_add(chroma_size)?,
        })
    }
}

/// Exchanges the first and third byte of every pixel in place.
///
/// Padding bytes at the end of each row are left untouched. Applying the
/// swap twice restores the original bytes.
pub fn swap_red_blue(
    data: &mut [u8],
    width: usize,
    height: usize,
    stride: usize,
    bytes_per_pixel: usize,
) {
    for row in data.chunks_mut(stride).take(height) {
        for pixel in row.chunks_exact_mut(bytes_per_pixel).take(width) {
            pixel.swap(0, 2);
        }
    }
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Decodes one YUV sample to RGB with integer BT.601-style coefficients.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = i32::from(y);
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;
    let d = (88 * u + 184 * v) >> 8;
    let e = (455 * u) >> 8;
    let f = (360 * v) >> 8;
    [clamp_u8(y + f), clamp_u8(y - d), clamp_u8(y + e)]
}

/// Decodes an I420 frame into packed RGB.
///
/// The output rows are padded to a 4-byte stride; the stride is returned
/// alongside the bytes.
pub fn i420_to_rgb(
    data: &[u8],
    width: usize,
    height: usize,
) -> Result<(Vec<u8>, usize), CodecError> {
    let too_large = || CodecError::FrameTooLarge { width, height };
    let layout = I420Layout::new(width, height).ok_or_else(too_large)?;
    if data.len() < layout.size {
        return Err(CodecError::BufferTooShort {
            expected: layout.size,
            actual: data.len(),
        });
    }

    let stride = packed_stride(width, 3).ok_or_else(too_large)?;
    let size = stride.checked_mul(height).ok_or_else(too_large)?;
    let mut rgb = vec![0u8; size];

    for (row, out) in rgb.chunks_exact_mut(stride).enumerate() {
        let luma = &data[row * layout.y_stride..][..width];
        let chroma_row = (row / 2) * layout.chroma_stride;
        let u_plane = &data[layout.u_offset + chroma_row..];
        let v_plane = &data[layout.v_offset + chroma_row..];

        for (col, pixel) in out.chunks_exact_mut(3).take(width).enumerate() {
            let rgb_px = yuv_to_rgb(luma[col], u_plane[col / 2], v_plane[col / 2]);
            pixel.copy_from_slice(&rgb_px);
        }
    }

    Ok((rgb, stride))
}

/// Packs RGB rows into an I420 frame.
///
/// Chroma is taken from the top-left pixel of every 2x2 block. Used to
/// produce planar test frames. Returns an empty buffer if the frame size
/// does not fit in `usize`.
pub fn rgb_to_i420(rgb: &[u8], width: usize, height: usize, stride: usize) -> Vec<u8> {
    let Some(layout) = I420Layout::new(width, height) else {
        return Vec::new();
    };
    let mut out = vec![0u8; layout.size];

    for row in 0..height {
        for col in 0..width {
            let px = &rgb[row * stride + col * 3..][..3];
            let (r, g, b) = (i32::from(px[0]), i32::from(px[1]), i32::from(px[2]));
            out[row * layout.y_stride + col] = clamp_u8((77 * r + 150 * g + 29 * b) >> 8);
            if row % 2 == 0 && col % 2 == 0 {
                let chroma = (row / 2) * layout.chroma_stride + col / 2;
                out[layout.u_offset + chroma] = clamp_u8(((-43 * r - 85 * g + 128 * b) >> 8) + 128);
                out[layout.v_offset + chroma] = clamp_u8(((128 * r - 107 * g - 21 * b) >> 8) + 128);
            }
        }
    }

    out
}
