//! Raw frame bytes with geometry.

use std::borrow::Cow;

use crate::error::CodecError;
use crate::format::{i420_to_rgb, packed_stride, swap_red_blue, PixelFormat, VideoCaps};

/// A frame's bytes together with the geometry needed to read them.
///
/// Buffers delivered by the graph are only borrowed for the duration of
/// the delivery callback. Conversions that have to change bytes produce an
/// owned copy; the delivered bytes are never mutated.
///
/// # Example
///
/// ```
/// use frame_saver::{PixelBuffer, VideoCaps};
///
/// let caps = VideoCaps::parse("video/x-raw, format=(string)BGR, width=(int)1, height=(int)1").unwrap();
/// let bgr = [10u8, 20, 30, 0];
/// let rgb = PixelBuffer::decode(&bgr, &caps).unwrap();
/// assert_eq!(&rgb.row(0)[..3], &[30, 20, 10]);
/// assert_eq!(bgr, [10, 20, 30, 0]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer<'a> {
    data: Cow<'a, [u8]>,
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes from the start of one row to the next.
    pub stride: usize,
    /// Bits per pixel.
    pub bit_depth: u32,
}

impl<'a> PixelBuffer<'a> {
    /// Wraps packed bytes without copying.
    ///
    /// Accepts rows padded to a 4-byte stride or tightly packed rows.
    pub fn packed(data: &'a [u8], caps: &VideoCaps) -> Result<Self, CodecError> {
        let bpp = caps
            .format
            .bytes_per_pixel()
            .ok_or_else(|| CodecError::UnsupportedFormat {
                format: caps.format.to_string(),
            })?;
        let width = caps.width as usize;
        let height = caps.height as usize;
        let too_large = || CodecError::FrameTooLarge { width, height };
        let padded = packed_stride(width, bpp).ok_or_else(too_large)?;
        let padded_size = padded.checked_mul(height).ok_or_else(too_large)?;
        // a padded size that fits bounds the tight one
        let tight = width * bpp;

        let stride = if data.len() >= padded_size {
            padded
        } else if data.len() >= tight * height {
            tight
        } else {
            return Err(CodecError::BufferTooShort {
                expected: padded_size,
                actual: data.len(),
            });
        };

        Ok(Self {
            data: Cow::Borrowed(data),
            format: caps.format.clone(),
            width: caps.width,
            height: caps.height,
            stride,
            bit_depth: (bpp * 8) as u32,
        })
    }

    /// Decodes delivered bytes into a red-first packed frame.
    ///
    /// - red-first packed formats are borrowed as-is
    /// - blue-first packed formats are copied, then swapped
    /// - I420 is decoded to 24-bit RGB
    pub fn decode(data: &'a [u8], caps: &VideoCaps) -> Result<Self, CodecError> {
        match caps.format {
            PixelFormat::I420 => {
                let (rgb, stride) = i420_to_rgb(data, caps.width as usize, caps.height as usize)?;
                Ok(Self {
                    data: Cow::Owned(rgb),
                    format: PixelFormat::Rgb,
                    width: caps.width,
                    height: caps.height,
                    stride,
                    bit_depth: 24,
                })
            }
            ref format if format.is_blue_first() => {
                let mut frame = Self::packed(data, caps)?;
                frame.swap_red_blue();
                Ok(frame)
            }
            _ => Self::packed(data, caps),
        }
    }

    /// Exchanges red and blue in every pixel, copying borrowed bytes first.
    pub fn swap_red_blue(&mut self) {
        let Some(bpp) = self.format.bytes_per_pixel() else {
            return;
        };
        swap_red_blue(
            self.data.to_mut(),
            self.width as usize,
            self.height as usize,
            self.stride,
            bpp,
        );
        self.format = self.format.swapped();
    }

    /// Returns the raw bytes including row padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns `true` if the bytes are owned rather than borrowed.
    pub fn is_owned(&self) -> bool {
        matches!(self.data, Cow::Owned(_))
    }

    /// Returns the pixels of one row, without padding.
    pub fn row(&self, index: usize) -> &[u8] {
        let len = self.width as usize * (self.bit_depth as usize / 8);
        &self.data[index * self.stride..][..len]
    }

    /// Returns the pixels of every row concatenated, without padding.
    pub fn tight_pixels(&self) -> Cow<'_, [u8]> {
        let row_len = self.width as usize * (self.bit_depth as usize / 8);
        if row_len == self.stride {
            return Cow::Borrowed(&self.data[..row_len * self.height as usize]);
        }
        let mut out = Vec::with_capacity(row_len * self.height as usize);
        for row in 0..self.height as usize {
            out.extend_from_slice(self.row(row));
        }
        Cow::Owned(out)
    }

    /// Detaches the frame from the delivered buffer.
    pub fn into_owned(self) -> PixelBuffer<'static> {
        PixelBuffer {
            data: Cow::Owned(self.data.into_owned()),
            format: self.format,
            width: self.width,
            height: self.height,
            stride: self.stride,
            bit_depth: self.bit_depth,
        }
    }
}
