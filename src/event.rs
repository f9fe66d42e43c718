//! Runtime events for monitoring a capture session.
//!
//! Events are non-fatal notifications. The session keeps running after
//! every event except [`CaptureEvent::PlayEnded`], which is emitted once
//! when the session terminates.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::SessionId;

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Elapsed playtime exceeded `play=`.
    PlayDurationElapsed,
    /// The graph reported end of stream.
    EndOfStream,
    /// The graph reported an error.
    GraphError(String),
    /// The host posted the `turn_off` application message.
    TurnOff,
    /// [`Session::stop`](crate::Session::stop) was called or the session
    /// was dropped.
    Stopped,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlayDurationElapsed => f.write_str("play duration elapsed"),
            Self::EndOfStream => f.write_str("end of stream"),
            Self::GraphError(message) => write!(f, "graph error: {message}"),
            Self::TurnOff => f.write_str("turn_off requested"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Runtime events emitted during capture.
///
/// # Example
///
/// ```
/// use frame_saver::CaptureEvent;
///
/// fn handle_event(event: CaptureEvent) {
///     match event {
///         CaptureEvent::SpliceCompleted { session } => {
///             eprintln!("{session}: snapshot branch live");
///         }
///         CaptureEvent::SpliceFailed { session, error, retry_in } => {
///             eprintln!("{session}: splice failed ({error}), retry in {retry_in:?}");
///         }
///         CaptureEvent::SnapshotFailed { session, index, error } => {
///             eprintln!("{session}: snapshot {index} failed: {error}");
///         }
///         CaptureEvent::PlayEnded { session, reason, saved, failed } => {
///             eprintln!("{session}: {reason} ({saved} saved, {failed} failed)");
///         }
///         _ => {}
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// The snapshot branch was inserted and the graph resumed.
    SpliceCompleted {
        /// Session that spliced.
        session: SessionId,
    },

    /// A splice attempt failed. The graph is paused until the retry.
    SpliceFailed {
        /// Session that attempted the splice.
        session: SessionId,
        /// Description of the failure.
        error: String,
        /// Delay before the next attempt.
        retry_in: Duration,
    },

    /// The dated run folder was created on the first snapshot signal.
    FolderCreated {
        /// Session owning the folder.
        session: SessionId,
        /// Path of the new folder.
        path: PathBuf,
    },

    /// A snapshot was written by every sink.
    SnapshotSaved {
        /// Session that saved the frame.
        session: SessionId,
        /// 1-based snapshot number.
        index: u64,
        /// Frame width in pixels.
        width: u32,
        /// Frame height in pixels.
        height: u32,
    },

    /// A snapshot could not be decoded or written.
    ///
    /// The failure counter was incremented; capture continues.
    SnapshotFailed {
        /// Session that attempted the frame.
        session: SessionId,
        /// 1-based snapshot number.
        index: u64,
        /// Description of the failure.
        error: String,
    },

    /// A quota was reached and snapshots are disabled.
    QuotaReached {
        /// Session whose quota was reached.
        session: SessionId,
        /// Frames saved so far.
        saved: u64,
        /// Frames failed so far.
        failed: u64,
    },

    /// The session terminated.
    PlayEnded {
        /// Session that ended.
        session: SessionId,
        /// Why it ended.
        reason: TerminationReason,
        /// Frames saved over the run.
        saved: u64,
        /// Frames failed over the run.
        failed: u64,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via [`FrameSaverBuilder::on_event()`]. The callback may be
/// invoked from a graph worker thread as well as from the scheduler task,
/// so it should return quickly.
///
/// [`FrameSaverBuilder::on_event()`]: crate::FrameSaverBuilder::on_event
pub type EventCallback = Arc<dyn Fn(CaptureEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use frame_saver::{event_callback, CaptureEvent};
///
/// let callback = event_callback(|event: CaptureEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(CaptureEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
