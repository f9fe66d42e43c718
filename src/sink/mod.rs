//! Snapshot destinations.
//!
//! A [`SnapshotSink`] receives every frame the scheduler decided to keep.
//! The crate provides two built-in sinks:
//!
//! - [`FileSink`]: Encodes each snapshot to a PNG file (or a raw dump)
//! - [`ChannelSink`]: Sends owned copies to a tokio mpsc channel
//!
//! Sinks run synchronously on whichever graph thread delivered the frame.
//! Delivery is already limited by the snapshot cadence, so blocking file
//! I/O is acceptable here.

mod channel;
mod file;

pub use channel::{CapturedFrame, ChannelSink};
pub use file::{encode, FileSink, RAW_PATH_TAG};

use std::path::Path;

use crate::{CodecError, PixelBuffer};

/// A frame selected for saving, plus where and when it was taken.
#[derive(Debug)]
pub struct Snapshot<'a> {
    /// Decoded red-first frame.
    pub frame: &'a PixelBuffer<'a>,
    /// 1-based snapshot number within the current run.
    pub index: u64,
    /// Wall-clock time of capture, seconds since the Unix epoch.
    pub unix_time: i64,
    /// Dated folder of the current run.
    pub folder: &'a Path,
}

/// A destination for snapshots.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability if needed
/// - `write` may be called from any graph worker thread
/// - Errors are counted as failed snapshots; they never stop the session
///
/// # Example
///
/// ```
/// use frame_saver::{CodecError, Snapshot, SnapshotSink};
///
/// struct PrintSink;
///
/// impl SnapshotSink for PrintSink {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     fn write(&self, snapshot: &Snapshot<'_>) -> Result<(), CodecError> {
///         println!("snapshot {} is {}x{}", snapshot.index, snapshot.frame.width, snapshot.frame.height);
///         Ok(())
///     }
/// }
/// ```
pub trait SnapshotSink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Stores one snapshot.
    fn write(&self, snapshot: &Snapshot<'_>) -> Result<(), CodecError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VideoCaps;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        count: AtomicUsize,
    }

    impl SnapshotSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        fn write(&self, _snapshot: &Snapshot<'_>) -> Result<(), CodecError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_sink_write() {
        let sink = CountingSink {
            count: AtomicUsize::new(0),
        };
        let caps = VideoCaps::parse("video/x-raw, format=(string)RGB, width=1, height=1").unwrap();
        let data = [0u8; 4];
        let frame = PixelBuffer::decode(&data, &caps).unwrap();
        let snapshot = Snapshot {
            frame: &frame,
            index: 1,
            unix_time: 0,
            folder: Path::new("/tmp"),
        };

        sink.write(&snapshot).unwrap();
        sink.write(&snapshot).unwrap();
        assert_eq!(sink.count.load(Ordering::SeqCst), 2);
        assert_eq!(sink.name(), "counting");
    }

    #[test]
    fn test_sink_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<Arc<dyn SnapshotSink>>();
    }
}
