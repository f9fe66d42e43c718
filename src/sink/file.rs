//! PNG file sink implementation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::PixelFormat;
use crate::sink::{Snapshot, SnapshotSink};
use crate::{CodecError, PixelBuffer};

/// Paths containing this tag get a raw byte dump instead of a PNG.
pub const RAW_PATH_TAG: &str = ".RAW.";

/// Width of the zero-padded counter in snapshot file names.
const INDEX_DIGITS: usize = 5;

/// A sink that writes each snapshot to `<folder>/<index>_<unixtime>.png`.
///
/// The folder is the dated run folder created by the scheduler. If the
/// folder path contains [`RAW_PATH_TAG`], frames are dumped as raw bytes
/// (rows including padding) under the same file names.
///
/// # Example
///
/// ```
/// use frame_saver::FileSink;
///
/// let sink = FileSink::png();
/// assert_eq!(sink.file_name(7, 1_700_000_000), "00007_1700000000.png");
/// ```
pub struct FileSink {
    name: String,
}

impl Default for FileSink {
    fn default() -> Self {
        Self::png()
    }
}

impl FileSink {
    /// Creates a sink writing PNG files into the run folder.
    pub fn png() -> Self {
        Self {
            name: "file:png".to_string(),
        }
    }

    /// Returns the file name used for a snapshot.
    pub fn file_name(&self, index: u64, unix_time: i64) -> String {
        format!("{index:0width$}_{unix_time}.png", width = INDEX_DIGITS)
    }

    /// Returns the full path used for a snapshot.
    pub fn path_for(&self, snapshot: &Snapshot<'_>) -> PathBuf {
        snapshot
            .folder
            .join(self.file_name(snapshot.index, snapshot.unix_time))
    }
}

impl SnapshotSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, snapshot: &Snapshot<'_>) -> Result<(), CodecError> {
        let path = self.path_for(snapshot);
        tracing::trace!(
            "FileSink {}: writing {}x{} to {}",
            self.name,
            snapshot.frame.width,
            snapshot.frame.height,
            path.display()
        );
        encode(snapshot.frame, &path)
    }
}

/// Encodes a frame to `path`.
///
/// PNG output supports red-first 24-bit (RGB) and 32-bit (RGBx/RGBA)
/// frames. A path containing [`RAW_PATH_TAG`] gets the frame bytes as-is.
pub fn encode(frame: &PixelBuffer<'_>, path: &Path) -> Result<(), CodecError> {
    if path.to_string_lossy().contains(RAW_PATH_TAG) {
        return std::fs::write(path, frame.data()).map_err(|e| CodecError::file_error(path, e));
    }

    let color = match (&frame.format, frame.bit_depth) {
        (PixelFormat::Rgb, 24) => png::ColorType::Rgb,
        (PixelFormat::Rgbx | PixelFormat::Rgba, 32) => png::ColorType::Rgba,
        (format, depth) => {
            return Err(CodecError::UnsupportedFormat {
                format: format!("{format}/{depth}"),
            })
        }
    };

    let file = File::create(path).map_err(|e| CodecError::file_error(path, e))?;
    let mut writer = BufWriter::new(file);
    {
        let mut encoder = png::Encoder::new(&mut writer, frame.width, frame.height);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        let mut png_writer = encoder.write_header()?;
        png_writer.write_image_data(&frame.tight_pixels())?;
        png_writer.finish()?;
    }
    writer.flush().map_err(|e| CodecError::file_error(path, e))
}
