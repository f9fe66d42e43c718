//! Per-session cadence, quotas, splice retry and termination.
//!
//! The scheduler task owns the [`Splicer`] and the session's parameters.
//! Two timers drive it:
//! - The idle poll (every few milliseconds): advances a pending splice and
//!   issues snapshot signals when due
//! - The tick (`tick=`): checks the play duration and logs progress
//!
//! Commands from the [`Session`](crate::Session) and graph bus messages
//! arrive on channels in the same loop, so all scheduling state has a
//! single owner.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use super::splicer::{SpliceOutcome, Splicer, SplicerStatus};
use crate::config::parse::ParamChange;
use crate::event::EventCallback;
use crate::graph::{GraphMessage, GraphState, MediaGraph, TURN_OFF};
use crate::registry::SessionId;
use crate::session::SessionState;
use crate::{CaptureEvent, CaptureParams, FrameSaverError, TerminationReason};

/// How far the next snapshot is pushed out while snapshots are disabled.
pub const SNAPSHOT_DISABLED_OFFSET: Duration = Duration::new(86_400, 9);

/// A failed splice is retried after this many ticks.
pub const SPLICE_RETRY_TICKS: u32 = 10;

/// Default period of the idle poll.
pub const DEFAULT_IDLE_PERIOD: Duration = Duration::from_millis(10);

/// Commands sent to the scheduler task.
pub(crate) enum SchedulerCommand {
    /// Apply one `key=value` parameter; reply with its echo and the new
    /// parameters.
    Update {
        token: String,
        reply: oneshot::Sender<Result<(String, CaptureParams), FrameSaverError>>,
    },
    /// End the session.
    Stop,
}

fn disabled_after(now: Instant) -> Instant {
    now.checked_add(SNAPSHOT_DISABLED_OFFSET).unwrap_or(now)
}

pub(crate) struct CaptureScheduler {
    session: SessionId,
    params: CaptureParams,
    graph: Option<Arc<dyn MediaGraph>>,
    splicer: Option<Splicer>,
    state: Arc<SessionState>,
    event_callback: Option<EventCallback>,
    idle_period: Duration,
    started: Instant,
    next_due: Instant,
    /// Earliest time of the next splice attempt. `None` while paused.
    splice_due: Option<Instant>,
    quota_reported: bool,
    paused: bool,
    ended: Option<TerminationReason>,
}

impl CaptureScheduler {
    /// Creates a scheduler. Without a splicer the session is inline and
    /// snapshots start right away.
    pub fn new(
        session: SessionId,
        params: CaptureParams,
        graph: Option<Arc<dyn MediaGraph>>,
        splicer: Option<Splicer>,
        state: Arc<SessionState>,
        event_callback: Option<EventCallback>,
        idle_period: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            session,
            next_due: now + params.snapshot.interval,
            params,
            graph,
            splicer,
            state,
            event_callback,
            idle_period,
            started: now,
            splice_due: None,
            quota_reported: false,
            paused: false,
            ended: None,
        }
    }

    fn emit_event(&self, event: CaptureEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    fn playtime_ms(&self, now: Instant) -> u128 {
        now.saturating_duration_since(self.started).as_millis()
    }

    /// Returns `true` once snapshots can be taken.
    fn capturing(&self) -> bool {
        self.splicer
            .as_ref()
            .map_or(true, |s| s.status() == SplicerStatus::Consumed)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_some()
    }

    /// Begins the run at `now`.
    ///
    /// With `wait=0` the splice happens before the graph plays; otherwise
    /// an owned graph starts playing and the splice waits.
    pub fn start(&mut self, now: Instant) {
        self.started = now;
        self.next_due = now + self.params.snapshot.interval;
        tracing::info!(
            session = %self.session,
            tick_ms = self.params.tick.as_millis(),
            snap = %self.params.snapshot,
            wait_ms = self.params.wait.as_millis(),
            play_ms = self.params.play.as_millis(),
            "session started"
        );

        if self.splicer.is_none() {
            return;
        }
        if self.params.wait.is_zero() {
            self.splice_due = Some(now);
            self.drive_splice(now);
        } else {
            if self.params.owns_graph() {
                self.set_graph_state(GraphState::Playing);
            }
            self.splice_due = Some(now + self.params.wait);
        }
    }

    fn set_graph_state(&self, state: GraphState) {
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.set_state(state) {
                tracing::warn!(session = %self.session, ?state, error = %e, "graph state change failed");
            }
        }
    }

    /// Advances a pending splice. Does nothing while a retry is not yet due
    /// or after the branch is live.
    fn drive_splice(&mut self, now: Instant) {
        let Some(splicer) = self.splicer.as_mut() else {
            return;
        };
        match splicer.status() {
            SplicerStatus::Consumed => return,
            SplicerStatus::Draining => {}
            _ if self.splice_due.is_some_and(|due| now >= due) => {}
            _ => return,
        }

        match splicer.poll() {
            SpliceOutcome::Consumed => self.on_spliced(now),
            SpliceOutcome::Waiting => {
                tracing::trace!(session = %self.session, "waiting for drain");
            }
            SpliceOutcome::Failed(e) => self.on_splice_failed(now, &e),
            SpliceOutcome::NeedsReset => {
                if let Some(splicer) = self.splicer.as_mut() {
                    splicer.reset();
                }
            }
        }
    }

    fn on_spliced(&mut self, now: Instant) {
        if let (Some(graph), Some(splicer)) = (&self.graph, &self.splicer) {
            let branch = splicer.branch().map(|b| {
                let mut elements = vec![b.tee, b.pass_queue, b.snap_queue, b.convert, b.snap_sink];
                elements.extend(&b.effects);
                elements
            });
            let elements = [splicer.producer(), splicer.consumer()]
                .into_iter()
                .flatten()
                .chain(branch.into_iter().flatten());
            for element in elements {
                if let Err(e) = graph.set_element_state(element, GraphState::Playing) {
                    tracing::warn!(session = %self.session, error = %e, "element did not start");
                }
            }
        }
        self.set_graph_state(GraphState::Playing);
        if !self.paused {
            self.next_due = now + self.params.snapshot.interval;
        }
        tracing::info!(
            session = %self.session,
            playtime_ms = self.playtime_ms(now),
            "splice completed, graph playing"
        );
        self.emit_event(CaptureEvent::SpliceCompleted {
            session: self.session,
        });
    }

    fn on_splice_failed(&mut self, now: Instant, error: &FrameSaverError) {
        let retry_in = self.params.tick * SPLICE_RETRY_TICKS;
        self.set_graph_state(GraphState::Paused);
        if let Some(splicer) = self.splicer.as_mut() {
            splicer.reset();
        }
        if self.splice_due.is_some() {
            self.splice_due = Some(now + retry_in);
        }
        tracing::warn!(
            session = %self.session,
            playtime_ms = self.playtime_ms(now),
            error = %error,
            retry_ms = retry_in.as_millis(),
            "splice failed, graph paused"
        );
        self.emit_event(CaptureEvent::SpliceFailed {
            session: self.session,
            error: error.to_string(),
            retry_in,
        });
    }

    /// The idle trigger.
    pub fn on_idle(&mut self, now: Instant) {
        if self.is_ended() {
            return;
        }
        self.drive_splice(now);
        self.check_cadence(now);
    }

    /// The timer trigger.
    pub fn on_tick(&mut self, now: Instant) {
        if self.is_ended() {
            return;
        }
        let playtime_ms = self.playtime_ms(now);
        tracing::debug!(
            session = %self.session,
            playtime_ms,
            saved = self.state.saved.load(Ordering::SeqCst),
            splicer = ?self.splicer.as_ref().map(Splicer::status),
            "tick"
        );
        if now.saturating_duration_since(self.started) > self.params.play {
            self.terminate(now, TerminationReason::PlayDurationElapsed);
            return;
        }
        self.drive_splice(now);
    }

    fn check_cadence(&mut self, now: Instant) {
        if self.paused || now < self.next_due || !self.capturing() {
            return;
        }

        if self.state.quota_reached() {
            self.next_due = disabled_after(now);
            if !self.quota_reported {
                self.quota_reported = true;
                let saved = self.state.saved.load(Ordering::SeqCst);
                let failed = self.state.failed.load(Ordering::SeqCst);
                tracing::info!(session = %self.session, saved, failed, "quota reached, snapshots disabled");
                self.emit_event(CaptureEvent::QuotaReached {
                    session: self.session,
                    saved,
                    failed,
                });
            }
            return;
        }

        self.next_due = now + self.params.snapshot.interval;
        if !self.ensure_folder() {
            return;
        }
        let signal = self.state.signals.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            session = %self.session,
            playtime_ms = self.playtime_ms(now),
            signal,
            "snapshot signalled"
        );
    }

    /// Creates the dated run folder on the first signal.
    fn ensure_folder(&self) -> bool {
        let mut folder = self.state.work_folder.lock();
        if folder.is_some() {
            return true;
        }
        let path = self
            .params
            .folder
            .join(format!("frames_{}", chrono::Utc::now().timestamp()));
        match std::fs::create_dir_all(&path) {
            Ok(()) => {
                tracing::info!(session = %self.session, path = %path.display(), "run folder created");
                *folder = Some(path.clone());
                drop(folder);
                self.emit_event(CaptureEvent::FolderCreated {
                    session: self.session,
                    path,
                });
                true
            }
            Err(e) => {
                self.state.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    session = %self.session,
                    error = %FrameSaverError::io(&path, e),
                    "run folder not created"
                );
                false
            }
        }
    }

    /// Handles a graph bus message.
    pub fn handle_message(&mut self, now: Instant, message: GraphMessage) {
        match message {
            GraphMessage::Error(text) => {
                self.state.stream_errors.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(session = %self.session, error = %text, "graph error");
                self.terminate(now, TerminationReason::GraphError(text));
            }
            GraphMessage::EndOfStream => self.terminate(now, TerminationReason::EndOfStream),
            GraphMessage::Application(name) if name == TURN_OFF => {
                self.terminate(now, TerminationReason::TurnOff);
            }
            GraphMessage::Application(name) => {
                tracing::debug!(session = %self.session, name, "application message ignored");
            }
            GraphMessage::StateChanged { from, to } => {
                tracing::debug!(session = %self.session, ?from, ?to, "graph state changed");
            }
        }
    }

    /// Applies a live parameter update.
    pub fn update(&mut self, now: Instant, token: &str) -> Result<(String, CaptureParams), FrameSaverError> {
        let change = self.params.update(token)?;
        let mut echo = self.params.echo(&change);

        match change {
            ParamChange::Wait { previous } => {
                let wait = self.params.wait;
                if wait.is_zero() && !previous.is_zero() && !self.paused {
                    self.paused = true;
                    self.next_due = disabled_after(now);
                    self.splice_due = None;
                    echo.push_str(" (PAUSED)");
                } else if !wait.is_zero() && (self.paused || previous.is_zero()) {
                    self.paused = false;
                    self.next_due = now + self.params.snapshot.interval;
                    if !self.capturing() {
                        self.splice_due = Some(now + wait);
                    }
                    echo.push_str(" (RESUMED)");
                }
            }
            ParamChange::Snapshot => {
                let policy = self.params.snapshot;
                self.state.reset(policy.max_saved, policy.max_failed);
                self.quota_reported = false;
                if !self.paused {
                    self.next_due = now + policy.interval;
                }
            }
            ParamChange::Link | ParamChange::Pads => {
                if let Some(splicer) = self.splicer.as_mut() {
                    if !splicer.retarget(self.params.link.clone(), self.params.pads.clone()) {
                        tracing::warn!(session = %self.session, "branch already live, new targets unused");
                    }
                }
            }
            ParamChange::Pipeline => {
                tracing::info!(session = %self.session, "graph spec applies to the next session");
            }
            _ => {}
        }

        tracing::info!(session = %self.session, echo, "parameter updated");
        Ok((echo, self.params.clone()))
    }

    /// Ends the session. Later calls do nothing.
    pub fn terminate(&mut self, now: Instant, reason: TerminationReason) {
        if self.is_ended() {
            return;
        }
        tracing::info!(
            session = %self.session,
            playtime_ms = self.playtime_ms(now),
            reason = %reason,
            "session ending"
        );

        if let Some(graph) = &self.graph {
            if let Some(producer) = graph.element_by_name(&self.params.link.producer) {
                if let Err(e) = graph.send_end_of_stream(producer) {
                    tracing::warn!(session = %self.session, error = %e, "end of stream not sent");
                }
                if let Err(e) = graph.set_element_state(producer, GraphState::Ready) {
                    tracing::warn!(session = %self.session, error = %e, "producer not stopped");
                }
            }
        }
        self.set_graph_state(GraphState::Null);
        self.splicer = None;

        self.state.running.store(false, Ordering::SeqCst);
        self.ended = Some(reason.clone());
        let stats = self.state.stats();
        self.emit_event(CaptureEvent::PlayEnded {
            session: self.session,
            reason,
            saved: stats.saved,
            failed: stats.failed,
        });
    }

    fn ticker(start: Instant, period: Duration) -> Interval {
        let mut ticker = time::interval_at(start + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Runs until the session terminates.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SchedulerCommand>,
        mut msg_rx: mpsc::UnboundedReceiver<GraphMessage>,
    ) {
        let start = Instant::now();
        self.start(start);
        let mut ticker = Self::ticker(start, self.params.tick);
        let mut idle = time::interval(self.idle_period);
        idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.is_ended() {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(Instant::now()),
                _ = idle.tick() => self.on_idle(Instant::now()),
                cmd = cmd_rx.recv() => match cmd {
                    Some(SchedulerCommand::Update { token, reply }) => {
                        let now = Instant::now();
                        let tick = self.params.tick;
                        let result = self.update(now, &token);
                        if self.params.tick != tick {
                            ticker = Self::ticker(now, self.params.tick);
                        }
                        let _ = reply.send(result);
                    }
                    Some(SchedulerCommand::Stop) | None => {
                        self.terminate(Instant::now(), TerminationReason::Stopped);
                    }
                },
                Some(message) = msg_rx.recv() => self.handle_message(Instant::now(), message),
            }
        }
        tracing::debug!(session = %self.session, "scheduler finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkTargets, PadNames};
    use crate::graph::{launch, MemoryGraph};
    use parking_lot::Mutex;
    use std::num::NonZeroU32;
    use std::path::Path;
    use tempfile::tempdir;

    type Events = Arc<Mutex<Vec<CaptureEvent>>>;

    fn session() -> SessionId {
        SessionId::new(NonZeroU32::MIN)
    }

    fn params(folder: &Path, args: &[&str]) -> CaptureParams {
        let mut params = CaptureParams::from_args(args).unwrap();
        params.folder = folder.to_path_buf();
        params
    }

    fn recorder() -> (EventCallback, Events) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();
        (Arc::new(move |e: CaptureEvent| recorded.lock().push(e)), events)
    }

    fn inline(params: CaptureParams) -> (CaptureScheduler, Arc<SessionState>, Events) {
        let state = Arc::new(SessionState::new(
            params.snapshot.max_saved,
            params.snapshot.max_failed,
        ));
        let (callback, events) = recorder();
        let scheduler = CaptureScheduler::new(
            session(),
            params,
            None,
            None,
            state.clone(),
            Some(callback),
            DEFAULT_IDLE_PERIOD,
        );
        (scheduler, state, events)
    }

    fn spliced(params: CaptureParams, graph: &Arc<MemoryGraph>) -> (CaptureScheduler, Arc<SessionState>, Events) {
        let state = Arc::new(SessionState::new(
            params.snapshot.max_saved,
            params.snapshot.max_failed,
        ));
        let (callback, events) = recorder();
        let dyn_graph: Arc<dyn MediaGraph> = graph.clone();
        let splicer = Splicer::new(
            dyn_graph.clone(),
            session(),
            params.link.clone(),
            params.pads.clone(),
            Vec::new(),
            Arc::new(|_: &[u8], _: &str| {}),
        );
        let scheduler = CaptureScheduler::new(
            session(),
            params,
            Some(dyn_graph),
            Some(splicer),
            state.clone(),
            Some(callback),
            DEFAULT_IDLE_PERIOD,
        );
        (scheduler, state, events)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_signals_respect_cadence() {
        let dir = tempdir().unwrap();
        let (mut scheduler, state, _) = inline(params(dir.path(), &["snap=100,0,0"]));
        let t0 = Instant::now();
        scheduler.start(t0);

        let mut signalled = Vec::new();
        let mut last = 0;
        for step in 0..200u64 {
            let now = t0 + ms(step * 7);
            scheduler.on_idle(now);
            let signals = state.signals.load(Ordering::SeqCst);
            if signals != last {
                signalled.push(now);
                last = signals;
            }
        }

        assert!(signalled.len() >= 12, "only {} signals", signalled.len());
        for pair in signalled.windows(2) {
            assert!(pair[1] - pair[0] >= ms(100));
        }
    }

    #[test]
    fn test_first_signal_creates_one_folder() {
        let dir = tempdir().unwrap();
        let (mut scheduler, _, events) = inline(params(dir.path(), &["snap=100,0,0"]));
        let t0 = Instant::now();
        scheduler.start(t0);
        scheduler.on_idle(t0 + ms(100));
        scheduler.on_idle(t0 + ms(200));

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        let created = events
            .lock()
            .iter()
            .filter(|e| matches!(e, CaptureEvent::FolderCreated { .. }))
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn test_quota_disables_snapshots() {
        let dir = tempdir().unwrap();
        let (mut scheduler, state, events) = inline(params(dir.path(), &["snap=100,2,0"]));
        let t0 = Instant::now();
        scheduler.start(t0);
        state.saved.store(2, Ordering::SeqCst);

        scheduler.on_idle(t0 + ms(100));
        scheduler.on_idle(t0 + ms(5000));
        assert_eq!(state.signals.load(Ordering::SeqCst), 0);
        assert!(scheduler.next_due >= t0 + ms(100) + SNAPSHOT_DISABLED_OFFSET);

        let reached = events
            .lock()
            .iter()
            .filter(|e| matches!(e, CaptureEvent::QuotaReached { saved: 2, .. }))
            .count();
        assert_eq!(reached, 1);
    }

    #[test]
    fn test_play_duration_terminates_once() {
        let dir = tempdir().unwrap();
        let (mut scheduler, state, events) = inline(params(dir.path(), &["tick=100", "snap=100", "play=300"]));
        let t0 = Instant::now();
        scheduler.start(t0);

        scheduler.on_tick(t0 + ms(200));
        // reaching the play duration exactly is not past it
        scheduler.on_tick(t0 + ms(300));
        assert!(!scheduler.is_ended());
        scheduler.on_tick(t0 + ms(400));
        assert!(scheduler.is_ended());
        scheduler.terminate(t0 + ms(500), TerminationReason::Stopped);

        assert!(!state.running.load(Ordering::SeqCst));
        let ended: Vec<_> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::PlayEnded { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ended, vec![TerminationReason::PlayDurationElapsed]);
    }

    #[test]
    fn test_play_end_stops_spliced_graph() {
        let dir = tempdir().unwrap();
        let graph = launch::build("untitledPipe0", crate::config::DEFAULT_PIPELINE).unwrap();
        let (mut scheduler, _, events) = spliced(params(dir.path(), &["wait=0", "tick=100", "play=300"]), &graph);
        let t0 = Instant::now();
        scheduler.start(t0);
        assert_eq!(graph.state(), GraphState::Playing);

        scheduler.on_tick(t0 + ms(400));
        assert!(scheduler.is_ended());

        let producer = graph.element_by_name("videotestsrc0").unwrap();
        let display = graph.element_by_name("autovideosink0").unwrap();
        assert!(graph.has_end_of_stream(producer));
        assert!(graph.has_end_of_stream(display));
        assert_eq!(graph.element_state(producer), Some(GraphState::Ready));
        assert_eq!(graph.state(), GraphState::Null);
        assert!(matches!(
            events.lock().last(),
            Some(CaptureEvent::PlayEnded {
                reason: TerminationReason::PlayDurationElapsed,
                ..
            })
        ));
    }

    #[test]
    fn test_wait_zero_splices_before_playing() {
        let dir = tempdir().unwrap();
        let graph = launch::build("untitledPipe0", crate::config::DEFAULT_PIPELINE).unwrap();
        let (mut scheduler, _, events) = spliced(params(dir.path(), &["wait=0"]), &graph);

        scheduler.start(Instant::now());
        assert_eq!(graph.state(), GraphState::Playing);
        let tee = graph.element_by_name("fsl1_tee").unwrap();
        assert_eq!(graph.element_state(tee), Some(GraphState::Playing));
        assert!(matches!(
            events.lock().as_slice(),
            [CaptureEvent::SpliceCompleted { .. }]
        ));
    }

    #[test]
    fn test_waits_before_splicing_running_graph() {
        let dir = tempdir().unwrap();
        let graph = launch::build("untitledPipe0", crate::config::DEFAULT_PIPELINE).unwrap();
        let (mut scheduler, _, _) = spliced(params(dir.path(), &["wait=1000"]), &graph);
        let t0 = Instant::now();

        scheduler.start(t0);
        assert_eq!(graph.state(), GraphState::Playing);
        scheduler.on_idle(t0 + ms(500));
        assert_eq!(graph.probe_count(), 0);

        scheduler.on_idle(t0 + ms(1000));
        assert_eq!(graph.probe_count(), 1);
        // a second poll while draining adds nothing
        scheduler.on_idle(t0 + ms(1010));
        assert_eq!(graph.probe_count(), 1);
    }

    #[test]
    fn test_failed_splice_pauses_and_backs_off() {
        let dir = tempdir().unwrap();
        let graph = launch::build("untitledPipe0", crate::config::DEFAULT_PIPELINE).unwrap();
        let mut p = params(dir.path(), &["wait=0", "tick=100"]);
        p.link = LinkTargets {
            consumer: "missing0".into(),
            ..Default::default()
        };
        let (mut scheduler, _, events) = spliced(p, &graph);
        let t0 = Instant::now();

        scheduler.start(t0);
        assert_eq!(graph.state(), GraphState::Paused);
        assert!(matches!(
            events.lock().as_slice(),
            [CaptureEvent::SpliceFailed { retry_in, .. }] if *retry_in == ms(1000)
        ));

        scheduler.on_tick(t0 + ms(500));
        assert_eq!(events.lock().len(), 1);

        scheduler.update(t0 + ms(600), "link=auto,auto,auto").unwrap();
        scheduler.on_tick(t0 + ms(1000));
        assert!(matches!(
            events.lock().last(),
            Some(CaptureEvent::SpliceCompleted { .. })
        ));
        assert_eq!(graph.state(), GraphState::Playing);
    }

    #[test]
    fn test_wait_update_pauses_and_resumes() {
        let dir = tempdir().unwrap();
        let (mut scheduler, state, _) = inline(params(dir.path(), &["snap=100", "wait=3000"]));
        let t0 = Instant::now();
        scheduler.start(t0);

        let (echo, params) = scheduler.update(t0, "wait=0").unwrap();
        assert_eq!(echo, "wait=0 (PAUSED)");
        assert!(params.wait.is_zero());
        scheduler.on_idle(t0 + ms(500));
        assert_eq!(state.signals.load(Ordering::SeqCst), 0);

        let (echo, _) = scheduler.update(t0 + ms(500), "wait=200").unwrap();
        assert_eq!(echo, "wait=200 (RESUMED)");
        scheduler.on_idle(t0 + ms(550));
        assert_eq!(state.signals.load(Ordering::SeqCst), 0);
        scheduler.on_idle(t0 + ms(600));
        assert_eq!(state.signals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snap_update_resets_counters() {
        let dir = tempdir().unwrap();
        let (mut scheduler, state, _) = inline(params(dir.path(), &["snap=100,1,0"]));
        let t0 = Instant::now();
        scheduler.start(t0);
        scheduler.on_idle(t0 + ms(100));
        state.saved.store(1, Ordering::SeqCst);

        let (echo, _) = scheduler.update(t0 + ms(150), "snap=100,5,1").unwrap();
        assert_eq!(echo, "snap=100,5,1");
        assert_eq!(state.stats(), crate::SessionStats::default());
        assert!(state.work_folder.lock().is_none());
        assert!(!state.quota_reached());
    }

    #[test]
    fn test_rejected_update_changes_nothing() {
        let dir = tempdir().unwrap();
        let (mut scheduler, _, _) = inline(params(dir.path(), &[]));
        assert!(scheduler.update(Instant::now(), "tick=5").is_err());
        assert_eq!(scheduler.params.tick, ms(1000));
        assert_eq!(scheduler.params.pads, PadNames::default());
    }

    #[test]
    fn test_bus_messages_terminate() {
        let dir = tempdir().unwrap();
        let (mut scheduler, state, events) = inline(params(dir.path(), &[]));
        let now = Instant::now();
        scheduler.start(now);
        scheduler.handle_message(now, GraphMessage::Application("hello".into()));
        assert!(!scheduler.is_ended());

        scheduler.handle_message(now, GraphMessage::Error("decoder broke".into()));
        scheduler.handle_message(now, GraphMessage::Application(TURN_OFF.into()));
        assert_eq!(state.stream_errors.load(Ordering::SeqCst), 1);
        assert!(matches!(
            events.lock().as_slice(),
            [CaptureEvent::PlayEnded {
                reason: TerminationReason::GraphError(_),
                ..
            }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ends_after_play_duration() {
        let dir = tempdir().unwrap();
        let (scheduler, state, events) = inline(params(dir.path(), &["tick=100", "snap=200", "play=1000"]));
        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let (_msg_tx, msg_rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        scheduler.run(cmd_rx, msg_rx).await;

        assert!(started.elapsed() >= ms(1000));
        assert!(!state.running.load(Ordering::SeqCst));
        assert!(state.signals.load(Ordering::SeqCst) >= 4);
        assert!(matches!(
            events.lock().last(),
            Some(CaptureEvent::PlayEnded {
                reason: TerminationReason::PlayDurationElapsed,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_command() {
        let dir = tempdir().unwrap();
        let (scheduler, _, events) = inline(params(dir.path(), &[]));
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (_msg_tx, msg_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(scheduler.run(cmd_rx, msg_rx));
        let (reply, response) = oneshot::channel();
        cmd_tx
            .send(SchedulerCommand::Update {
                token: "play=5000".into(),
                reply,
            })
            .await
            .unwrap();
        let (echo, _) = response.await.unwrap().unwrap();
        assert_eq!(echo, "play=5000");

        cmd_tx.send(SchedulerCommand::Stop).await.unwrap();
        task.await.unwrap();
        assert!(matches!(
            events.lock().last(),
            Some(CaptureEvent::PlayEnded {
                reason: TerminationReason::Stopped,
                ..
            })
        ));
    }
}
