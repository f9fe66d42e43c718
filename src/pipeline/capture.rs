//! Buffer arrival handling.
//!
//! Every buffer reaching the snapshot sink (or handed to
//! [`Session::receive_buffer`](crate::Session::receive_buffer)) passes
//! through [`FrameCapture::on_buffer`]. It answers at most one frame per
//! scheduler signal:
//! - Claims the newest outstanding signal, if any
//! - Decodes the buffer to red-first pixels
//! - Hands the snapshot to every sink and updates the counters
//!
//! Runs synchronously on the thread that delivered the buffer.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::event::EventCallback;
use crate::graph::FrameCallback;
use crate::registry::SessionId;
use crate::session::SessionState;
use crate::sink::{Snapshot, SnapshotSink};
use crate::{CaptureEvent, FrameSaverError, PixelBuffer, VideoCaps};

/// Turns delivered buffers into snapshots.
pub(crate) struct FrameCapture {
    session: SessionId,
    state: Arc<SessionState>,
    sinks: Vec<Arc<dyn SnapshotSink>>,
    event_callback: Option<EventCallback>,
}

impl FrameCapture {
    pub fn new(
        session: SessionId,
        state: Arc<SessionState>,
        sinks: Vec<Arc<dyn SnapshotSink>>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            session,
            state,
            sinks,
            event_callback,
        }
    }

    /// Wraps this capture as a graph frame callback.
    pub fn frame_callback(self: &Arc<Self>) -> FrameCallback {
        let capture = Arc::clone(self);
        Arc::new(move |data: &[u8], caps: &str| {
            // failures are counted and reported inside
            let _ = capture.on_buffer(data, caps);
        })
    }

    fn emit_event(&self, event: CaptureEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    /// Takes every outstanding signal at once. Returns the newest signal
    /// number, or `None` if nothing is due.
    fn claim(&self) -> Option<u64> {
        let state = &self.state;
        loop {
            let claimed = state.claimed.load(Ordering::SeqCst);
            let signals = state.signals.load(Ordering::SeqCst);
            if signals <= claimed {
                return None;
            }
            if state
                .claimed
                .compare_exchange(claimed, signals, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(signals);
            }
        }
    }

    /// Handles one delivered buffer.
    ///
    /// Returns the snapshot number if the buffer was saved and `None` if no
    /// snapshot was due or a quota is already met.
    pub fn on_buffer(&self, data: &[u8], caps: &str) -> Result<Option<u64>, FrameSaverError> {
        self.state.frames_seen.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(session = %self.session, bytes = data.len(), caps, "buffer");

        let Some(index) = self.claim() else {
            return Ok(None);
        };

        let _guard = self.state.save_lock.lock();
        if self.state.quota_reached() {
            tracing::debug!(session = %self.session, index, "quota met, frame skipped");
            return Ok(None);
        }
        let Some(folder) = self.state.work_folder.lock().clone() else {
            tracing::debug!(session = %self.session, index, "no run folder, frame skipped");
            return Ok(None);
        };

        let unix_time = chrono::Utc::now().timestamp();
        let written = VideoCaps::parse(caps)
            .map_err(FrameSaverError::from)
            .and_then(|video| Ok(PixelBuffer::decode(data, &video)?))
            .and_then(|frame| {
                let snapshot = Snapshot {
                    frame: &frame,
                    index,
                    unix_time,
                    folder: &folder,
                };
                for sink in &self.sinks {
                    sink.write(&snapshot)?;
                }
                Ok((frame.width, frame.height))
            });

        match written {
            Ok((width, height)) => {
                self.state.saved.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(session = %self.session, index, width, height, "snapshot saved");
                self.emit_event(CaptureEvent::SnapshotSaved {
                    session: self.session,
                    index,
                    width,
                    height,
                });
                Ok(Some(index))
            }
            Err(e) => {
                self.state.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(session = %self.session, index, error = %e, "snapshot failed");
                self.emit_event(CaptureEvent::SnapshotFailed {
                    session: self.session,
                    index,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CapsError, FileSink};
    use parking_lot::Mutex;
    use std::num::NonZeroU32;
    use tempfile::tempdir;

    const RGB_4X2: &str = "video/x-raw, format=(string)RGB, width=(int)4, height=(int)2";

    fn capture_in(dir: &std::path::Path, max_saved: u32) -> (FrameCapture, Arc<SessionState>) {
        let state = Arc::new(SessionState::new(max_saved, 0));
        *state.work_folder.lock() = Some(dir.to_path_buf());
        let sinks: Vec<Arc<dyn SnapshotSink>> = vec![Arc::new(FileSink::png())];
        let capture = FrameCapture::new(SessionId::new(NonZeroU32::MIN), state.clone(), sinks, None);
        (capture, state)
    }

    #[test]
    fn test_no_signal_no_snapshot() {
        let dir = tempdir().unwrap();
        let (capture, state) = capture_in(dir.path(), 0);

        assert_eq!(capture.on_buffer(&[0u8; 24], RGB_4X2).unwrap(), None);
        assert_eq!(state.frames_seen.load(Ordering::SeqCst), 1);
        assert_eq!(state.saved.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_one_frame_per_signal() {
        let dir = tempdir().unwrap();
        let (capture, state) = capture_in(dir.path(), 0);
        state.signals.store(1, Ordering::SeqCst);

        assert_eq!(capture.on_buffer(&[0u8; 24], RGB_4X2).unwrap(), Some(1));
        assert_eq!(capture.on_buffer(&[0u8; 24], RGB_4X2).unwrap(), None);
        assert_eq!(state.saved.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_backlog_is_answered_once() {
        let dir = tempdir().unwrap();
        let (capture, state) = capture_in(dir.path(), 0);
        state.signals.store(3, Ordering::SeqCst);

        assert_eq!(capture.on_buffer(&[0u8; 24], RGB_4X2).unwrap(), Some(3));
        assert_eq!(capture.on_buffer(&[0u8; 24], RGB_4X2).unwrap(), None);
    }

    #[test]
    fn test_bad_caps_counts_failure() {
        let dir = tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();
        let state = Arc::new(SessionState::new(0, 0));
        *state.work_folder.lock() = Some(dir.path().to_path_buf());
        state.signals.store(1, Ordering::SeqCst);
        let sinks: Vec<Arc<dyn SnapshotSink>> = vec![Arc::new(FileSink::png())];
        let capture = FrameCapture::new(
            SessionId::new(NonZeroU32::MIN),
            state.clone(),
            sinks,
            Some(Arc::new(move |e: CaptureEvent| recorded.lock().push(e))),
        );

        let err = capture
            .on_buffer(&[0u8; 24], "video/x-raw, format=(string)RGB, height=(int)2")
            .unwrap_err();
        assert!(matches!(err, FrameSaverError::Caps(CapsError::MissingField { .. })));
        assert_eq!(state.failed.load(Ordering::SeqCst), 1);
        assert_eq!(state.saved.load(Ordering::SeqCst), 0);
        assert!(matches!(
            events.lock().as_slice(),
            [CaptureEvent::SnapshotFailed { index: 1, .. }]
        ));
    }

    #[test]
    fn test_saved_quota_is_enforced() {
        let dir = tempdir().unwrap();
        let (capture, state) = capture_in(dir.path(), 1);
        state.signals.store(1, Ordering::SeqCst);
        assert_eq!(capture.on_buffer(&[0u8; 24], RGB_4X2).unwrap(), Some(1));

        state.signals.store(2, Ordering::SeqCst);
        assert_eq!(capture.on_buffer(&[0u8; 24], RGB_4X2).unwrap(), None);
        assert_eq!(state.saved.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_frame_callback_feeds_capture() {
        let dir = tempdir().unwrap();
        let (capture, state) = capture_in(dir.path(), 0);
        state.signals.store(1, Ordering::SeqCst);
        let callback = Arc::new(capture).frame_callback();

        callback(&[0u8; 24], RGB_4X2);
        assert_eq!(state.saved.load(Ordering::SeqCst), 1);
    }
}
