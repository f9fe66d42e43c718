//! Capture session management.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::graph::MediaGraph;
use crate::pipeline::{FrameCapture, SchedulerCommand};
use crate::registry::{HostHandle, InstanceRegistry, SessionId};
use crate::FrameSaverError;

/// Counters of a capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Buffers delivered to the session.
    pub frames_seen: u64,
    /// Snapshot signals issued by the scheduler.
    pub signals: u64,
    /// Snapshots written by every sink.
    pub saved: u64,
    /// Snapshots that failed to decode or write.
    pub failed: u64,
    /// Error messages received from the graph.
    pub stream_errors: u64,
}

/// Internal state shared between Session, the scheduler and graph callbacks.
pub(crate) struct SessionState {
    pub running: AtomicBool,
    pub frames_seen: AtomicU64,
    pub signals: AtomicU64,
    /// Highest signal already answered by a frame.
    pub claimed: AtomicU64,
    pub saved: AtomicU64,
    pub failed: AtomicU64,
    pub stream_errors: AtomicU64,
    pub max_saved: AtomicU64,
    pub max_failed: AtomicU64,
    /// Dated folder of the current run, created on the first signal.
    pub work_folder: Mutex<Option<PathBuf>>,
    /// Serializes the quota check with the write it guards.
    pub save_lock: Mutex<()>,
}

impl SessionState {
    pub fn new(max_saved: u32, max_failed: u32) -> Self {
        Self {
            running: AtomicBool::new(true),
            frames_seen: AtomicU64::new(0),
            signals: AtomicU64::new(0),
            claimed: AtomicU64::new(0),
            saved: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
            max_saved: AtomicU64::new(u64::from(max_saved)),
            max_failed: AtomicU64::new(u64::from(max_failed)),
            work_folder: Mutex::new(None),
            save_lock: Mutex::new(()),
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_seen: self.frames_seen.load(Ordering::SeqCst),
            signals: self.signals.load(Ordering::SeqCst),
            saved: self.saved.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            stream_errors: self.stream_errors.load(Ordering::SeqCst),
        }
    }

    /// Returns `true` once either quota is met. Zero means unlimited.
    pub fn quota_reached(&self) -> bool {
        let reached = |count: &AtomicU64, max: &AtomicU64| {
            let max = max.load(Ordering::SeqCst);
            max > 0 && count.load(Ordering::SeqCst) >= max
        };
        reached(&self.saved, &self.max_saved) || reached(&self.failed, &self.max_failed)
    }

    /// Clears every counter and forgets the run folder.
    pub fn reset(&self, max_saved: u32, max_failed: u32) {
        let _guard = self.save_lock.lock();
        for counter in [
            &self.frames_seen,
            &self.signals,
            &self.claimed,
            &self.saved,
            &self.failed,
            &self.stream_errors,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.max_saved.store(u64::from(max_saved), Ordering::SeqCst);
        self.max_failed.store(u64::from(max_failed), Ordering::SeqCst);
        *self.work_folder.lock() = None;
    }
}

/// Handle to a running capture session.
///
/// The `Session` is returned by [`FrameSaverBuilder::start()`]. The
/// scheduler runs in a background task until the play duration elapses,
/// the graph ends, or `stop()` is called.
///
/// # Lifecycle
///
/// 1. Created by [`FrameSaverBuilder::start()`], attached to the registry
/// 2. The scheduler splices, then signals snapshots on cadence
/// 3. [`wait()`](Session::wait) for the run to end, or
///    [`stop()`](Session::stop) it early
/// 4. Dropping the `Session` also stops it and detaches from the registry
///
/// # Example
///
/// ```no_run
/// use frame_saver::{CaptureParams, FrameSaver};
///
/// # async fn run() -> Result<(), frame_saver::FrameSaverError> {
/// let session = FrameSaver::builder()
///     .params(CaptureParams::from_args(["snap=500,10,0", "play=5000"])?)
///     .start()
///     .await?;
///
/// println!("{}", session.update_param("wait=0").await?);
/// let stats = session.wait().await?;
/// println!("saved {} frames", stats.saved);
/// # Ok(())
/// # }
/// ```
///
/// [`FrameSaverBuilder::start()`]: crate::FrameSaverBuilder::start
pub struct Session {
    id: SessionId,
    handle: HostHandle,
    registry: Arc<InstanceRegistry>,
    state: Arc<SessionState>,
    capture: Arc<FrameCapture>,
    graph: Option<Arc<dyn MediaGraph>>,
    cmd_tx: mpsc::Sender<SchedulerCommand>,
    scheduler_handle: Option<JoinHandle<()>>,
    source_handles: Vec<JoinHandle<()>>,
    attached: bool,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        handle: HostHandle,
        registry: Arc<InstanceRegistry>,
        state: Arc<SessionState>,
        capture: Arc<FrameCapture>,
        graph: Option<Arc<dyn MediaGraph>>,
        cmd_tx: mpsc::Sender<SchedulerCommand>,
        scheduler_handle: JoinHandle<()>,
        source_handles: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            id,
            handle,
            registry,
            state,
            capture,
            graph,
            cmd_tx,
            scheduler_handle: Some(scheduler_handle),
            source_handles,
            attached: true,
        }
    }

    /// The registry id of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The host handle this session is attached under.
    pub fn handle(&self) -> HostHandle {
        self.handle
    }

    /// The graph this session splices into, if any.
    pub fn graph(&self) -> Option<&Arc<dyn MediaGraph>> {
        self.graph.as_ref()
    }

    /// Returns `true` until the session terminates.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> SessionStats {
        self.state.stats()
    }

    /// The dated folder of the current run, once created.
    pub fn work_folder(&self) -> Option<PathBuf> {
        self.state.work_folder.lock().clone()
    }

    /// Applies one `key=value` parameter to the running session and
    /// returns its canonical echo.
    ///
    /// `wait=0` on a session with a non-zero wait pauses snapshots; a
    /// non-zero wait afterwards resumes them. `snap=` resets every counter.
    pub async fn update_param(&self, token: &str) -> Result<String, FrameSaverError> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(SchedulerCommand::Update {
                token: token.to_string(),
                reply,
            })
            .await
            .map_err(|_| FrameSaverError::SessionStopped)?;
        let (echo, params) = response
            .await
            .map_err(|_| FrameSaverError::SessionStopped)??;
        self.registry.set_params(self.id, params)?;
        Ok(echo)
    }

    /// Delivers one buffer directly, for sessions embedded in a host filter.
    ///
    /// Returns the snapshot number when the buffer was saved, `None` when
    /// no snapshot was due. Decode and write failures are counted and
    /// returned.
    pub fn receive_buffer(&self, data: &[u8], caps: &str) -> Result<Option<u64>, FrameSaverError> {
        self.capture.on_buffer(data, caps)
    }

    /// Waits for the session to end on its own and returns the final stats.
    pub async fn wait(mut self) -> Result<SessionStats, FrameSaverError> {
        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }
        self.finish().await?;
        Ok(self.stats())
    }

    /// Stops the session and returns the final stats.
    ///
    /// This will:
    /// 1. Tell the scheduler to end the stream
    /// 2. Wait for the scheduler and test sources to finish
    /// 3. Detach from the registry
    pub async fn stop(mut self) -> Result<SessionStats, FrameSaverError> {
        let _ = self.cmd_tx.send(SchedulerCommand::Stop).await;
        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }
        self.finish().await?;
        Ok(self.stats())
    }

    async fn finish(&mut self) -> Result<(), FrameSaverError> {
        for handle in self.source_handles.drain(..) {
            let _ = handle.await;
        }
        if std::mem::take(&mut self.attached) {
            self.registry.detach(self.handle)?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.running.load(Ordering::SeqCst) {
            let _ = self.cmd_tx.try_send(SchedulerCommand::Stop);
        }
        for handle in &self.source_handles {
            handle.abort();
        }
        if self.attached {
            if let Err(e) = self.registry.detach(self.handle) {
                tracing::warn!(session = %self.id, error = %e, "detach on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_new() {
        let state = SessionState::new(3, 0);
        assert!(state.running.load(Ordering::SeqCst));
        assert_eq!(state.stats(), SessionStats::default());
        assert!(!state.quota_reached());
    }

    #[test]
    fn test_quota_reached() {
        let state = SessionState::new(2, 1);
        state.saved.store(1, Ordering::SeqCst);
        assert!(!state.quota_reached());
        state.saved.store(2, Ordering::SeqCst);
        assert!(state.quota_reached());

        let state = SessionState::new(0, 1);
        state.saved.store(500, Ordering::SeqCst);
        assert!(!state.quota_reached());
        state.failed.store(1, Ordering::SeqCst);
        assert!(state.quota_reached());
    }

    #[test]
    fn test_reset_clears_counters_and_folder() {
        let state = SessionState::new(1, 0);
        state.saved.store(1, Ordering::SeqCst);
        state.signals.store(4, Ordering::SeqCst);
        *state.work_folder.lock() = Some(PathBuf::from("/tmp/frames_1"));

        state.reset(5, 2);
        assert_eq!(state.stats(), SessionStats::default());
        assert_eq!(state.max_saved.load(Ordering::SeqCst), 5);
        assert_eq!(state.max_failed.load(Ordering::SeqCst), 2);
        assert!(state.work_folder.lock().is_none());
    }
}
