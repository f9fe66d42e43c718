//! Inserts the snapshot branch between a linked producer and consumer.
//!
//! ```text
//! before:  producer ──────────────────────────────► consumer
//! after:   producer ──► tee ──► pass-queue ───────► consumer
//!                        └────► snap-queue ─► [effects] ─► convert ─► snap-sink
//! ```
//!
//! On a flowing graph the producer pad is blocked first. Once the block
//! holds a buffer, an end-of-segment signal is pushed into the consumer and
//! intercepted there; seeing it proves nothing is in flight between the
//! two, and the links can be rewired. Releasing the block afterwards lets
//! the held buffers continue through the new branch.
//!
//! Host callbacks only send [`SpliceEvent`]s over a channel. The
//! [`Splicer`] owner is the single writer of the status.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;

use crate::config::{LinkTargets, PadNames};
use crate::format::{negotiate, CapsSet, CapsStructure, CapsValue};
use crate::graph::{ElementId, FrameCallback, GraphState, MediaGraph, PadId, ProbeId};
use crate::registry::SessionId;
use crate::{FrameSaverError, GraphError, LinkStage};

/// Progress of a splice attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplicerStatus {
    /// No attempt in progress.
    Idle,
    /// Waiting for the producer block and consumer drain.
    Draining,
    /// Quiescent; safe to rewire.
    Done,
    /// Branch inserted and live.
    Consumed,
    /// The attempt failed; reset before retrying.
    Failed,
}

impl SplicerStatus {
    /// Returns `true` if `next` may follow `self`.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Draining | Self::Failed)
                | (Self::Draining, Self::Done | Self::Failed)
                | (Self::Done, Self::Consumed | Self::Failed)
        )
    }
}

/// Notifications from graph callbacks to the splicer owner.
#[derive(Debug)]
pub(crate) enum SpliceEvent {
    /// The producer pad holds a buffer; the drain signal was sent.
    ProducerBlocked { intercept: ProbeId },
    /// The drain signal reached the consumer.
    ConsumerDrained,
    /// The drain could not be started.
    DrainFailed(GraphError),
}

/// Result of one [`Splicer::poll`].
#[derive(Debug)]
pub enum SpliceOutcome {
    /// The branch is live.
    Consumed,
    /// Draining; poll again later.
    Waiting,
    /// This attempt failed.
    Failed(FrameSaverError),
    /// A previous attempt failed and [`Splicer::reset`] was not called.
    NeedsReset,
}

/// Elements added by a successful splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// The branch point.
    pub tee: ElementId,
    /// Queue feeding the original consumer.
    pub pass_queue: ElementId,
    /// Queue heading the snapshot path.
    pub snap_queue: ElementId,
    /// Effect elements on the snapshot path, in order.
    pub effects: Vec<ElementId>,
    /// Converter before the snapshot sink.
    pub convert: ElementId,
    /// The sink delivering frames to the session.
    pub snap_sink: ElementId,
}

/// Caps forced on the snapshot sink link.
pub fn snapshot_caps() -> CapsSet {
    CapsSet::single(
        CapsStructure::new("video/x-raw")
            .with("format", CapsValue::Str("RGB".into()))
            .with("bpp", CapsValue::Int(24)),
    )
}

struct Targets {
    producer: ElementId,
    producer_out: PadId,
    consumer: ElementId,
    consumer_in: PadId,
}

struct Attempt {
    targets: Targets,
    block: Option<ProbeId>,
    intercept: Option<ProbeId>,
    producer_caps: CapsSet,
    consumer_caps: CapsSet,
}

/// Per-session splice state machine.
pub struct Splicer {
    graph: Arc<dyn MediaGraph>,
    session: SessionId,
    link: LinkTargets,
    pads: PadNames,
    effects: Vec<String>,
    on_frame: FrameCallback,
    status: SplicerStatus,
    history: Vec<SplicerStatus>,
    attempt: Option<Attempt>,
    branch: Option<Branch>,
    events_tx: mpsc::UnboundedSender<SpliceEvent>,
    events_rx: mpsc::UnboundedReceiver<SpliceEvent>,
}

impl Splicer {
    /// Creates an idle splicer. `on_frame` is installed on the snapshot
    /// sink once the branch is live.
    pub fn new(
        graph: Arc<dyn MediaGraph>,
        session: SessionId,
        link: LinkTargets,
        pads: PadNames,
        effects: Vec<String>,
        on_frame: FrameCallback,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            graph,
            session,
            link,
            pads,
            effects,
            on_frame,
            status: SplicerStatus::Idle,
            history: vec![SplicerStatus::Idle],
            attempt: None,
            branch: None,
            events_tx,
            events_rx,
        }
    }

    /// Current status.
    pub fn status(&self) -> SplicerStatus {
        self.status
    }

    /// Every status taken so far, starting with `Idle`.
    pub fn history(&self) -> &[SplicerStatus] {
        &self.history
    }

    /// The inserted branch, once consumed.
    pub fn branch(&self) -> Option<&Branch> {
        self.branch.as_ref()
    }

    /// The producer element, if it exists.
    pub fn producer(&self) -> Option<ElementId> {
        self.graph.element_by_name(&self.link.producer)
    }

    /// The consumer element, if it exists.
    pub fn consumer(&self) -> Option<ElementId> {
        self.graph.element_by_name(&self.link.consumer)
    }

    fn advance(&mut self, next: SplicerStatus) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::warn!(
                session = %self.session,
                from = ?self.status,
                to = ?next,
                "rejected splicer transition"
            );
            return false;
        }
        tracing::debug!(session = %self.session, from = ?self.status, to = ?next, "splicer");
        self.status = next;
        self.history.push(next);
        true
    }

    /// Drives the splice one step.
    ///
    /// While draining, repeated polls only read pending events.
    pub fn poll(&mut self) -> SpliceOutcome {
        match self.status {
            SplicerStatus::Consumed => SpliceOutcome::Consumed,
            SplicerStatus::Failed => SpliceOutcome::NeedsReset,
            SplicerStatus::Draining => self.poll_draining(),
            SplicerStatus::Done => self.finish(),
            SplicerStatus::Idle => self.begin(),
        }
    }

    fn begin(&mut self) -> SpliceOutcome {
        let targets = match self.resolve() {
            Ok(targets) => targets,
            Err(e) => return self.fail(e),
        };

        if self.branch_present(&targets) {
            tracing::info!(session = %self.session, "snapshot branch already present");
            self.advance(SplicerStatus::Draining);
            self.advance(SplicerStatus::Done);
            self.advance(SplicerStatus::Consumed);
            return SpliceOutcome::Consumed;
        }

        let producer_caps = self.graph.allowed_caps(targets.producer_out);
        let consumer_caps = self.graph.allowed_caps(targets.consumer_in);
        let flowing = self.graph.state().is_flowing();

        let block = if flowing {
            match self.install_block(&targets) {
                Ok(probe) => Some(probe),
                Err(e) => return self.fail(e.into()),
            }
        } else {
            None
        };

        self.attempt = Some(Attempt {
            targets,
            block,
            intercept: None,
            producer_caps,
            consumer_caps,
        });
        self.advance(SplicerStatus::Draining);

        if flowing {
            SpliceOutcome::Waiting
        } else {
            // nothing in flight
            self.advance(SplicerStatus::Done);
            self.finish()
        }
    }

    fn resolve(&self) -> Result<Targets, FrameSaverError> {
        let graph_name = self.graph.name();
        if graph_name != self.link.graph {
            return Err(FrameSaverError::Lookup {
                what: "graph",
                name: self.link.graph.clone(),
            });
        }

        let element = |name: &str| {
            self.graph
                .element_by_name(name)
                .ok_or_else(|| FrameSaverError::Lookup {
                    what: "element",
                    name: name.to_string(),
                })
        };
        let producer = element(&self.link.producer)?;
        let consumer = element(&self.link.consumer)?;

        let pad = |element: ElementId, owner: &str, name: &str| {
            self.graph
                .static_pad(element, name)
                .ok_or_else(|| FrameSaverError::Lookup {
                    what: "pad",
                    name: format!("{owner}.{name}"),
                })
        };
        let producer_out = pad(producer, &self.link.producer, &self.pads.producer_out)?;
        let consumer_in = pad(consumer, &self.link.consumer, &self.pads.consumer_in)?;
        if self.graph.static_pad(consumer, &self.pads.consumer_out).is_none() {
            tracing::debug!(
                session = %self.session,
                consumer = %self.link.consumer,
                pad = %self.pads.consumer_out,
                "consumer has no output pad"
            );
        }

        Ok(Targets {
            producer,
            producer_out,
            consumer,
            consumer_in,
        })
    }

    /// Producer feeds a tee, and the consumer is fed by that tee directly or
    /// through one queue.
    fn branch_present(&self, targets: &Targets) -> bool {
        let graph = &self.graph;
        let Some(tee) = graph
            .peer(targets.producer_out)
            .and_then(|pad| graph.element_of(pad))
        else {
            return false;
        };
        if graph.factory_of(tee).as_deref() != Some("tee") {
            return false;
        }
        let Some(upstream) = graph
            .peer(targets.consumer_in)
            .and_then(|pad| graph.element_of(pad))
        else {
            return false;
        };
        if upstream == tee {
            return true;
        }
        graph.factory_of(upstream).as_deref() == Some("queue")
            && graph
                .static_pad(upstream, "sink")
                .and_then(|pad| graph.peer(pad))
                .and_then(|pad| graph.element_of(pad))
                == Some(tee)
    }

    fn install_block(&self, targets: &Targets) -> Result<ProbeId, GraphError> {
        let graph: Weak<dyn MediaGraph> = Arc::downgrade(&self.graph);
        let events = self.events_tx.clone();
        let consumer_in = targets.consumer_in;

        self.graph.block_pad(
            targets.producer_out,
            Box::new(move || {
                let Some(graph) = graph.upgrade() else {
                    return;
                };
                let drained = events.clone();
                let started = graph
                    .intercept_end_of_segment(
                        consumer_in,
                        Box::new(move || {
                            let _ = drained.send(SpliceEvent::ConsumerDrained);
                        }),
                    )
                    .and_then(|intercept| {
                        let _ = events.send(SpliceEvent::ProducerBlocked { intercept });
                        graph.send_end_of_segment(consumer_in)
                    });
                if let Err(e) = started {
                    let _ = events.send(SpliceEvent::DrainFailed(e));
                }
            }),
        )
    }

    fn poll_draining(&mut self) -> SpliceOutcome {
        loop {
            match self.events_rx.try_recv() {
                Ok(SpliceEvent::ProducerBlocked { intercept }) => {
                    tracing::debug!(session = %self.session, "producer blocked, draining consumer");
                    if let Some(attempt) = self.attempt.as_mut() {
                        attempt.intercept = Some(intercept);
                    }
                }
                Ok(SpliceEvent::ConsumerDrained) => {
                    if let Some(attempt) = self.attempt.as_mut() {
                        attempt.intercept = None;
                    }
                    self.advance(SplicerStatus::Done);
                    return self.finish();
                }
                Ok(SpliceEvent::DrainFailed(e)) => return self.fail(e.into()),
                Err(_) => return SpliceOutcome::Waiting,
            }
        }
    }

    fn finish(&mut self) -> SpliceOutcome {
        match self.relink() {
            Ok(branch) => {
                tracing::info!(
                    session = %self.session,
                    producer = %self.link.producer,
                    consumer = %self.link.consumer,
                    "snapshot branch inserted"
                );
                self.branch = Some(branch);
                self.advance(SplicerStatus::Consumed);
                SpliceOutcome::Consumed
            }
            Err(e) => self.fail(e),
        }
    }

    fn relink(&mut self) -> Result<Branch, FrameSaverError> {
        let Some(attempt) = self.attempt.take() else {
            return Err(FrameSaverError::link(LinkStage::Unlink, "no splice attempt"));
        };
        let result = self.rewire(&attempt);
        self.release(&attempt);
        result
    }

    /// Swaps the direct link for the branch. The attempt's probes stay
    /// installed; the caller releases them whatever the outcome.
    fn rewire(&self, attempt: &Attempt) -> Result<Branch, FrameSaverError> {
        let graph = &self.graph;
        let t = &attempt.targets;

        for element in [t.producer, t.consumer] {
            graph.set_element_state(element, GraphState::Paused)?;
        }
        graph
            .unlink(t.producer_out, t.consumer_in)
            .map_err(|e| FrameSaverError::link(LinkStage::Unlink, e.to_string()))?;

        let mut added = Vec::new();
        let result = self.build_branch(attempt, &mut added);

        if let Err(e) = &result {
            tracing::warn!(session = %self.session, error = %e, "rolling back splice");
            for element in added.iter().rev() {
                if let Err(e) = graph.remove_element(*element) {
                    tracing::warn!(session = %self.session, error = %e, "could not remove branch element");
                }
            }
            let original = filter_of(&attempt.consumer_caps);
            if let Err(e) = graph.link(t.producer_out, t.consumer_in, original) {
                tracing::warn!(session = %self.session, error = %e, "could not restore original link");
            }
        }
        result
    }

    fn add(
        &self,
        factory: &str,
        role: &str,
        stage: LinkStage,
        added: &mut Vec<ElementId>,
    ) -> Result<ElementId, FrameSaverError> {
        let name = format!("fsl{}_{role}", self.session.get());
        let element = self
            .graph
            .create_element(factory, &name)
            .map_err(|e| FrameSaverError::link(stage, e.to_string()))?;
        added.push(element);
        Ok(element)
    }

    fn pad(&self, element: ElementId, name: &str, stage: LinkStage) -> Result<PadId, FrameSaverError> {
        self.graph
            .static_pad(element, name)
            .ok_or_else(|| FrameSaverError::link(stage, format!("{element} has no '{name}' pad")))
    }

    fn connect(
        &self,
        src: PadId,
        sink: PadId,
        filter: Option<&CapsSet>,
        stage: LinkStage,
    ) -> Result<(), FrameSaverError> {
        self.graph
            .link(src, sink, filter)
            .map_err(|e| FrameSaverError::link(stage, e.to_string()))
    }

    fn build_branch(&self, attempt: &Attempt, added: &mut Vec<ElementId>) -> Result<Branch, FrameSaverError> {
        let graph = &self.graph;
        let t = &attempt.targets;

        let tee = self.add("tee", "tee", LinkStage::TeePads, added)?;
        let pass_queue = self.add("queue", "passq", LinkStage::PassQueue, added)?;
        let snap_queue = self.add("queue", "snapq", LinkStage::SnapQueue, added)?;
        let mut effects = Vec::with_capacity(self.effects.len());
        for (i, factory) in self.effects.iter().enumerate() {
            effects.push(self.add(factory, &format!("fx{i}"), LinkStage::SnapQueue, added)?);
        }
        let convert = self.add("videoconvert", "conv", LinkStage::SnapQueue, added)?;
        let snap_sink = self.add("appsink", "sink", LinkStage::SnapSink, added)?;

        let request = |stage| {
            graph
                .request_pad(tee, "src_%u")
                .map_err(|e| FrameSaverError::link(stage, e.to_string()))
        };
        let tee_pass = request(LinkStage::TeePads)?;
        let tee_snap = request(LinkStage::TeePads)?;

        let tee_in = self.pad(tee, "sink", LinkStage::TeeUplink)?;
        self.connect(t.producer_out, tee_in, None, LinkStage::TeeUplink)?;

        let negotiated = negotiate(
            &attempt.producer_caps,
            &graph.template_caps(t.consumer_in),
            &attempt.consumer_caps,
        );
        tracing::debug!(session = %self.session, caps = %negotiated, "negotiated consumer caps");
        let pass_in = self.pad(pass_queue, "sink", LinkStage::PassQueue)?;
        let pass_out = self.pad(pass_queue, "src", LinkStage::PassQueue)?;
        self.connect(tee_pass, pass_in, None, LinkStage::PassQueue)?;
        self.connect(pass_out, t.consumer_in, filter_of(&negotiated), LinkStage::PassQueue)?;

        let mut upstream = tee_snap;
        for element in std::iter::once(snap_queue)
            .chain(effects.iter().copied())
            .chain(std::iter::once(convert))
        {
            let input = self.pad(element, "sink", LinkStage::SnapQueue)?;
            self.connect(upstream, input, None, LinkStage::SnapQueue)?;
            upstream = self.pad(element, "src", LinkStage::SnapQueue)?;
        }
        let sink_in = self.pad(snap_sink, "sink", LinkStage::SnapSink)?;
        self.connect(upstream, sink_in, Some(&snapshot_caps()), LinkStage::SnapSink)?;

        graph
            .set_frame_callback(snap_sink, self.on_frame.clone())
            .map_err(|e| FrameSaverError::link(LinkStage::SnapSink, e.to_string()))?;

        Ok(Branch {
            tee,
            pass_queue,
            snap_queue,
            effects,
            convert,
            snap_sink,
        })
    }

    /// Removes the probes of an attempt, releasing held buffers.
    fn release(&self, attempt: &Attempt) {
        for probe in [attempt.intercept, attempt.block].into_iter().flatten() {
            if let Err(e) = self.graph.remove_probe(probe) {
                tracing::debug!(session = %self.session, error = %e, "probe already gone");
            }
        }
    }

    fn fail(&mut self, error: FrameSaverError) -> SpliceOutcome {
        if let Some(attempt) = self.attempt.take() {
            self.release(&attempt);
        }
        tracing::warn!(session = %self.session, error = %error, "splice failed");
        self.advance(SplicerStatus::Failed);
        SpliceOutcome::Failed(error)
    }

    /// Abandons any attempt and returns to `Idle`.
    ///
    /// Events from the abandoned attempt are discarded. Returns `false`
    /// once the branch is live.
    pub fn reset(&mut self) -> bool {
        if self.status == SplicerStatus::Consumed {
            return false;
        }
        while let Ok(event) = self.events_rx.try_recv() {
            if let (SpliceEvent::ProducerBlocked { intercept }, Some(attempt)) =
                (event, self.attempt.as_mut())
            {
                attempt.intercept = Some(intercept);
            }
        }
        if let Some(attempt) = self.attempt.take() {
            self.release(&attempt);
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;
        self.status = SplicerStatus::Idle;
        self.history.push(SplicerStatus::Idle);
        true
    }

    /// Points the splicer at different elements or pads.
    ///
    /// Ignored once the branch is live.
    pub fn retarget(&mut self, link: LinkTargets, pads: PadNames) -> bool {
        if self.status == SplicerStatus::Consumed {
            return false;
        }
        self.link = link;
        self.pads = pads;
        self.reset()
    }
}

impl Drop for Splicer {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            self.release(&attempt);
        }
    }
}

fn filter_of(caps: &CapsSet) -> Option<&CapsSet> {
    (!caps.is_any()).then_some(caps)
}
