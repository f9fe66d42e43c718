//! Tokio mpsc channel sink implementation.

use tokio::sync::mpsc;

use crate::sink::{Snapshot, SnapshotSink};
use crate::{CodecError, PixelBuffer};

/// An owned copy of a snapshot, as delivered by [`ChannelSink`].
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// 1-based snapshot number within the run.
    pub index: u64,
    /// Wall-clock capture time, seconds since the Unix epoch.
    pub unix_time: i64,
    /// Decoded red-first frame.
    pub frame: PixelBuffer<'static>,
}

/// A sink that forwards snapshots to a tokio mpsc channel.
///
/// Sending never blocks the graph thread: if the channel is full the
/// snapshot is counted as failed.
///
/// # Example
///
/// ```
/// use frame_saver::{CapturedFrame, ChannelSink};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<CapturedFrame>(8);
/// let sink = ChannelSink::new(tx);
///
/// // Use sink with the FrameSaver builder...
/// // while let Some(captured) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<CapturedFrame>,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    pub fn new(sender: mpsc::Sender<CapturedFrame>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<CapturedFrame>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

impl SnapshotSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, snapshot: &Snapshot<'_>) -> Result<(), CodecError> {
        let captured = CapturedFrame {
            index: snapshot.index,
            unix_time: snapshot.unix_time,
            frame: snapshot.frame.clone().into_owned(),
        };
        self.sender.try_send(captured).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CodecError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => CodecError::ChannelClosed,
        })
    }
}
