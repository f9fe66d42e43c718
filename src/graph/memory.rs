//! In-process media graph.
//!
//! Buffers pushed at a source element travel hop by hop along links. The
//! graph lock is held for one hop at a time and released before any
//! callback runs, so probe, frame and message callbacks may re-enter the
//! graph from inside a delivery.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    ElementId, FrameCallback, GraphMessage, GraphState, MediaGraph, MessageCallback, PadId,
    ProbeCallback, ProbeId,
};
use crate::format::{CapsSet, CapsStructure, CapsValue};
use crate::GraphError;

/// Role of an element in the data flow, derived from its factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Produces buffers on its `src` pad.
    Source,
    /// One `sink` pad in, one `src` pad out.
    Filter,
    /// One `sink` pad in, a copy to every requested `src_%u` pad.
    Tee,
    /// Consumes buffers on its `sink` pad.
    Sink,
}

impl ElementKind {
    /// Returns the kind for a known factory name.
    pub fn of_factory(factory: &str) -> Option<Self> {
        match factory {
            "videotestsrc" | "fakesrc" => Some(Self::Source),
            "tee" => Some(Self::Tee),
            "queue" | "videoconvert" | "videoscale" | "capsfilter" | "videoflip" | "identity"
            | "edgetv" | "agingtv" => Some(Self::Filter),
            "autovideosink" | "fakesink" | "appsink" | "ximagesink" => Some(Self::Sink),
            _ => None,
        }
    }
}

/// Output caps of a new source element.
pub fn default_source_caps() -> CapsSet {
    CapsSet::single(
        CapsStructure::new("video/x-raw")
            .with("format", CapsValue::Str("RGB".into()))
            .with("width", CapsValue::Int(320))
            .with("height", CapsValue::Int(240))
            .with("framerate", CapsValue::Fraction(30, 1)),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Src,
    Sink,
}

#[derive(Clone)]
enum Packet {
    Buffer { data: Arc<[u8]>, caps: Arc<str> },
    EndOfSegment,
    EndOfStream,
}

enum Hop {
    /// Leaving through a source pad.
    Out(PadId, Packet),
    /// Arriving at a sink pad.
    In(PadId, Packet),
}

enum Action {
    Probe(ProbeCallback),
    Frame(FrameCallback, Arc<[u8]>, Arc<str>),
    Message(MessageCallback, GraphMessage),
}

impl Action {
    fn invoke(self) {
        match self {
            Self::Probe(callback) => callback(),
            Self::Frame(callback, data, caps) => callback(&data, &caps),
            Self::Message(callback, message) => callback(message),
        }
    }
}

struct Element {
    name: String,
    factory: String,
    kind: ElementKind,
    state: GraphState,
    pads: Vec<PadId>,
    next_request: u32,
    output_caps: CapsSet,
    frames: u64,
    eos: bool,
    frame_callback: Option<FrameCallback>,
}

struct Pad {
    name: String,
    element: ElementId,
    direction: Direction,
    peer: Option<PadId>,
    /// Caps filter of the link, kept on the source side.
    filter: Option<CapsSet>,
    template: CapsSet,
    queued: VecDeque<Packet>,
}

enum ProbeKind {
    Block { on_blocked: Option<ProbeCallback> },
    EndOfSegment { on_signal: Option<ProbeCallback> },
}

struct Probe {
    pad: PadId,
    kind: ProbeKind,
}

struct Inner {
    name: String,
    state: GraphState,
    elements: BTreeMap<ElementId, Element>,
    pads: BTreeMap<PadId, Pad>,
    probes: BTreeMap<ProbeId, Probe>,
    next_id: u32,
    next_probe: u64,
    mutations: u64,
    eos_posted: bool,
    message_callback: Option<MessageCallback>,
}

impl Inner {
    fn element(&self, id: ElementId) -> Result<&Element, GraphError> {
        self.elements
            .get(&id)
            .ok_or_else(|| GraphError::NoSuchElement(id.to_string()))
    }

    fn pad(&self, id: PadId) -> Result<&Pad, GraphError> {
        self.pads
            .get(&id)
            .ok_or_else(|| GraphError::NoSuchPad(id.to_string()))
    }

    fn pad_label(&self, id: PadId) -> String {
        match self.pads.get(&id) {
            Some(pad) => {
                let element = self
                    .elements
                    .get(&pad.element)
                    .map_or("?", |e| e.name.as_str());
                format!("{element}.{}", pad.name)
            }
            None => id.to_string(),
        }
    }

    fn add_pad(&mut self, element: ElementId, name: &str, direction: Direction, template: CapsSet) -> PadId {
        self.next_id += 1;
        let id = PadId::new(self.next_id);
        self.pads.insert(
            id,
            Pad {
                name: name.to_string(),
                element,
                direction,
                peer: None,
                filter: None,
                template,
                queued: VecDeque::new(),
            },
        );
        if let Some(element) = self.elements.get_mut(&element) {
            element.pads.push(id);
        }
        id
    }

    fn src_pads(&self, element: &Element) -> Vec<PadId> {
        element
            .pads
            .iter()
            .copied()
            .filter(|p| self.pads.get(p).is_some_and(|p| p.direction == Direction::Src))
            .collect()
    }

    fn block_on(&self, pad: PadId) -> Option<ProbeId> {
        self.probes
            .iter()
            .find(|(_, p)| p.pad == pad && matches!(p.kind, ProbeKind::Block { .. }))
            .map(|(id, _)| *id)
    }

    fn intercept_on(&self, pad: PadId) -> Option<ProbeId> {
        self.probes
            .iter()
            .find(|(_, p)| p.pad == pad && matches!(p.kind, ProbeKind::EndOfSegment { .. }))
            .map(|(id, _)| *id)
    }

    fn post(&self, message: GraphMessage) -> Option<Action> {
        self.message_callback
            .clone()
            .map(|callback| Action::Message(callback, message))
    }

    fn detach_pad(&mut self, id: PadId) {
        if let Some(pad) = self.pads.remove(&id) {
            if let Some(peer) = pad.peer.and_then(|p| self.pads.get_mut(&p)) {
                peer.peer = None;
                peer.filter = None;
            }
        }
        self.probes.retain(|_, probe| probe.pad != id);
    }

    fn check_end_of_stream(&mut self) -> Option<Action> {
        if self.eos_posted {
            return None;
        }
        let mut sinks = self
            .elements
            .values()
            .filter(|e| e.kind == ElementKind::Sink)
            .peekable();
        sinks.peek()?;
        if sinks.all(|e| e.eos) {
            self.eos_posted = true;
            return self.post(GraphMessage::EndOfStream);
        }
        None
    }

    /// Moves one packet one hop, queueing follow-up hops.
    fn step(&mut self, hop: Hop, work: &mut VecDeque<Hop>) -> Option<Action> {
        match hop {
            Hop::Out(pad_id, packet) => {
                if let Some(probe_id) = self.block_on(pad_id) {
                    self.pads.get_mut(&pad_id)?.queued.push_back(packet);
                    return match self.probes.get_mut(&probe_id)?.kind {
                        ProbeKind::Block { ref mut on_blocked } => {
                            on_blocked.take().map(Action::Probe)
                        }
                        ProbeKind::EndOfSegment { .. } => None,
                    };
                }
                let pad = self.pads.get(&pad_id)?;
                let peer = pad.peer?;
                let packet = match (packet, &pad.filter) {
                    (Packet::Buffer { data, caps }, Some(filter)) => Packet::Buffer {
                        data,
                        caps: restrict(&caps, filter),
                    },
                    (packet, _) => packet,
                };
                work.push_back(Hop::In(peer, packet));
                None
            }
            Hop::In(pad_id, packet) => {
                if matches!(packet, Packet::EndOfSegment) {
                    if let Some(probe_id) = self.intercept_on(pad_id) {
                        return match self.probes.remove(&probe_id)?.kind {
                            ProbeKind::EndOfSegment { on_signal } => on_signal.map(Action::Probe),
                            ProbeKind::Block { .. } => None,
                        };
                    }
                }

                let element_id = self.pads.get(&pad_id)?.element;
                let element = self.elements.get_mut(&element_id)?;
                if element.kind == ElementKind::Sink {
                    return match packet {
                        Packet::Buffer { data, caps } => {
                            element.frames += 1;
                            element
                                .frame_callback
                                .clone()
                                .map(|callback| Action::Frame(callback, data, caps))
                        }
                        Packet::EndOfStream => {
                            element.eos = true;
                            self.check_end_of_stream()
                        }
                        Packet::EndOfSegment => None,
                    };
                }

                if matches!(packet, Packet::EndOfStream) {
                    element.eos = true;
                }
                let element = self.elements.get(&element_id)?;
                for out in self.src_pads(element) {
                    work.push_back(Hop::Out(out, packet.clone()));
                }
                None
            }
        }
    }
}

/// Narrows a buffer's caps text by a link filter. Falls back to the
/// original text when the two do not intersect.
fn restrict(caps: &Arc<str>, filter: &CapsSet) -> Arc<str> {
    let Ok(current) = caps.parse::<CapsSet>() else {
        return caps.clone();
    };
    match current.intersect(filter).structures().first() {
        Some(structure) => Arc::from(structure.to_string()),
        None => caps.clone(),
    }
}

/// An in-process [`MediaGraph`].
///
/// # Example
///
/// ```
/// use frame_saver::graph::{GraphState, MediaGraph, MemoryGraph};
///
/// let graph = MemoryGraph::new("demo");
/// let src = graph.create_element("videotestsrc", "src").unwrap();
/// let sink = graph.create_element("fakesink", "out").unwrap();
/// let src_pad = graph.static_pad(src, "src").unwrap();
/// let sink_pad = graph.static_pad(sink, "sink").unwrap();
/// graph.link(src_pad, sink_pad, None).unwrap();
///
/// graph.set_state(GraphState::Playing).unwrap();
/// graph.push_buffer(src, &[0; 12], "video/x-raw, format=(string)RGB, width=(int)2, height=(int)2").unwrap();
/// assert_eq!(graph.frames_received(sink), 1);
/// ```
pub struct MemoryGraph {
    inner: Mutex<Inner>,
}

impl MemoryGraph {
    /// Creates an empty graph in the `Null` state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                name: name.into(),
                state: GraphState::Null,
                elements: BTreeMap::new(),
                pads: BTreeMap::new(),
                probes: BTreeMap::new(),
                next_id: 0,
                next_probe: 0,
                mutations: 0,
                eos_posted: false,
                message_callback: None,
            }),
        }
    }

    fn run(&self, mut work: VecDeque<Hop>) {
        loop {
            let action = {
                let mut inner = self.inner.lock();
                let Some(hop) = work.pop_front() else {
                    break;
                };
                inner.step(hop, &mut work)
            };
            if let Some(action) = action {
                action.invoke();
            }
        }
    }

    fn post(&self, message: GraphMessage) {
        let action = self.inner.lock().post(message);
        if let Some(action) = action {
            action.invoke();
        }
    }

    /// Pushes one buffer out of a source element.
    ///
    /// Fails with [`GraphError::Flushing`] unless the graph is playing.
    pub fn push_buffer(&self, source: ElementId, data: &[u8], caps: &str) -> Result<(), GraphError> {
        let work = {
            let inner = self.inner.lock();
            if !inner.state.is_flowing() {
                return Err(GraphError::Flushing);
            }
            let element = inner.element(source)?;
            if element.kind != ElementKind::Source {
                return Err(GraphError::NoSuchElement(format!(
                    "{} is not a source",
                    element.name
                )));
            }
            let packet = Packet::Buffer {
                data: Arc::from(data),
                caps: Arc::from(caps),
            };
            inner
                .src_pads(element)
                .into_iter()
                .map(|pad| Hop::Out(pad, packet.clone()))
                .collect()
        };
        self.run(work);
        Ok(())
    }

    /// Posts a named application message on the bus.
    pub fn post_application(&self, name: &str) {
        self.post(GraphMessage::Application(name.to_string()));
    }

    /// Posts an error message on the bus.
    pub fn post_error(&self, message: &str) {
        self.post(GraphMessage::Error(message.to_string()));
    }

    /// Number of link, unlink, create, remove and request-pad operations
    /// performed so far.
    pub fn mutation_count(&self) -> u64 {
        self.inner.lock().mutations
    }

    /// Number of installed probes.
    pub fn probe_count(&self) -> usize {
        self.inner.lock().probes.len()
    }

    /// Buffers received by a sink element.
    pub fn frames_received(&self, element: ElementId) -> u64 {
        self.inner
            .lock()
            .elements
            .get(&element)
            .map_or(0, |e| e.frames)
    }

    /// Returns `true` once an element has seen end of stream.
    pub fn has_end_of_stream(&self, element: ElementId) -> bool {
        self.inner
            .lock()
            .elements
            .get(&element)
            .is_some_and(|e| e.eos)
    }

    /// State recorded for one element.
    pub fn element_state(&self, element: ElementId) -> Option<GraphState> {
        self.inner.lock().elements.get(&element).map(|e| e.state)
    }

    /// Name of an element.
    pub fn element_name(&self, element: ElementId) -> Option<String> {
        self.inner
            .lock()
            .elements
            .get(&element)
            .map(|e| e.name.clone())
    }

    /// Elements of one kind, in creation order.
    pub fn elements_of_kind(&self, kind: ElementKind) -> Vec<ElementId> {
        self.inner
            .lock()
            .elements
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Names of the elements directly downstream of `element`.
    pub fn downstream_of(&self, element: ElementId) -> Vec<String> {
        let inner = self.inner.lock();
        let Ok(el) = inner.element(element) else {
            return Vec::new();
        };
        inner
            .src_pads(el)
            .into_iter()
            .filter_map(|pad| inner.pads.get(&pad)?.peer)
            .filter_map(|peer| {
                let owner = inner.pads.get(&peer)?.element;
                inner.elements.get(&owner).map(|e| e.name.clone())
            })
            .collect()
    }

    /// Output caps of a source element.
    pub fn output_caps(&self, source: ElementId) -> Option<CapsSet> {
        let inner = self.inner.lock();
        let element = inner.elements.get(&source)?;
        (element.kind == ElementKind::Source).then(|| element.output_caps.clone())
    }

    /// Replaces the output caps of a source element.
    pub fn set_output_caps(&self, source: ElementId, caps: CapsSet) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let element = inner
            .elements
            .get_mut(&source)
            .ok_or_else(|| GraphError::NoSuchElement(source.to_string()))?;
        element.output_caps = caps;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryGraph")
            .field("name", &inner.name)
            .field("state", &inner.state)
            .field("elements", &inner.elements.len())
            .finish_non_exhaustive()
    }
}

impl MediaGraph for MemoryGraph {
    fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    fn state(&self) -> GraphState {
        self.inner.lock().state
    }

    fn set_state(&self, state: GraphState) -> Result<(), GraphError> {
        let action = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.state = state;
            if from == state {
                None
            } else {
                inner.post(GraphMessage::StateChanged { from, to: state })
            }
        };
        if let Some(action) = action {
            action.invoke();
        }
        Ok(())
    }

    fn element_by_name(&self, name: &str) -> Option<ElementId> {
        self.inner
            .lock()
            .elements
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(id, _)| *id)
    }

    fn static_pad(&self, element: ElementId, name: &str) -> Option<PadId> {
        let inner = self.inner.lock();
        inner
            .elements
            .get(&element)?
            .pads
            .iter()
            .copied()
            .find(|p| inner.pads.get(p).is_some_and(|p| p.name == name))
    }

    fn set_element_state(&self, element: ElementId, state: GraphState) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let element = inner
            .elements
            .get_mut(&element)
            .ok_or_else(|| GraphError::NoSuchElement(element.to_string()))?;
        element.state = state;
        Ok(())
    }

    fn peer(&self, pad: PadId) -> Option<PadId> {
        self.inner.lock().pads.get(&pad)?.peer
    }

    fn element_of(&self, pad: PadId) -> Option<ElementId> {
        self.inner.lock().pads.get(&pad).map(|p| p.element)
    }

    fn factory_of(&self, element: ElementId) -> Option<String> {
        self.inner
            .lock()
            .elements
            .get(&element)
            .map(|e| e.factory.clone())
    }

    fn block_pad(&self, pad: PadId, on_blocked: ProbeCallback) -> Result<ProbeId, GraphError> {
        let mut inner = self.inner.lock();
        if inner.pad(pad)?.direction != Direction::Src {
            return Err(GraphError::NoSuchPad(format!(
                "{} is not a source pad",
                inner.pad_label(pad)
            )));
        }
        inner.next_probe += 1;
        let id = ProbeId::new(inner.next_probe);
        inner.probes.insert(
            id,
            Probe {
                pad,
                kind: ProbeKind::Block {
                    on_blocked: Some(on_blocked),
                },
            },
        );
        Ok(id)
    }

    fn remove_probe(&self, probe: ProbeId) -> Result<(), GraphError> {
        let work = {
            let mut inner = self.inner.lock();
            let removed = inner
                .probes
                .remove(&probe)
                .ok_or_else(|| GraphError::NoSuchProbe(probe.to_string()))?;
            match removed.kind {
                ProbeKind::Block { .. } if inner.block_on(removed.pad).is_none() => inner
                    .pads
                    .get_mut(&removed.pad)
                    .map(|pad| {
                        pad.queued
                            .drain(..)
                            .map(|packet| Hop::Out(removed.pad, packet))
                            .collect()
                    })
                    .unwrap_or_default(),
                _ => VecDeque::new(),
            }
        };
        self.run(work);
        Ok(())
    }

    fn intercept_end_of_segment(
        &self,
        pad: PadId,
        on_signal: ProbeCallback,
    ) -> Result<ProbeId, GraphError> {
        let mut inner = self.inner.lock();
        if inner.pad(pad)?.direction != Direction::Sink {
            return Err(GraphError::NoSuchPad(format!(
                "{} is not a sink pad",
                inner.pad_label(pad)
            )));
        }
        inner.next_probe += 1;
        let id = ProbeId::new(inner.next_probe);
        inner.probes.insert(
            id,
            Probe {
                pad,
                kind: ProbeKind::EndOfSegment {
                    on_signal: Some(on_signal),
                },
            },
        );
        Ok(id)
    }

    fn send_end_of_segment(&self, pad: PadId) -> Result<(), GraphError> {
        self.inner.lock().pad(pad)?;
        self.run(VecDeque::from([Hop::In(pad, Packet::EndOfSegment)]));
        Ok(())
    }

    fn send_end_of_stream(&self, element: ElementId) -> Result<(), GraphError> {
        let (work, action) = {
            let mut inner = self.inner.lock();
            let el = inner.element(element)?;
            let work: VecDeque<Hop> = inner
                .src_pads(el)
                .into_iter()
                .map(|pad| Hop::Out(pad, Packet::EndOfStream))
                .collect();
            let is_sink = el.kind == ElementKind::Sink;
            if let Some(el) = inner.elements.get_mut(&element) {
                el.eos = true;
            }
            let action = if is_sink {
                inner.check_end_of_stream()
            } else {
                None
            };
            (work, action)
        };
        if let Some(action) = action {
            action.invoke();
        }
        self.run(work);
        Ok(())
    }

    fn allowed_caps(&self, pad: PadId) -> CapsSet {
        let inner = self.inner.lock();
        let Some(p) = inner.pads.get(&pad) else {
            return CapsSet::empty();
        };
        let mut caps = p.template.clone();
        if let Some(element) = inner.elements.get(&p.element) {
            if element.kind == ElementKind::Source {
                caps = caps.intersect(&element.output_caps);
            }
        }
        let link_filter = match p.direction {
            Direction::Src => p.filter.as_ref(),
            Direction::Sink => p
                .peer
                .and_then(|peer| inner.pads.get(&peer))
                .and_then(|peer| peer.filter.as_ref()),
        };
        if let Some(filter) = link_filter {
            caps = caps.intersect(filter);
        }
        caps
    }

    fn template_caps(&self, pad: PadId) -> CapsSet {
        self.inner
            .lock()
            .pads
            .get(&pad)
            .map_or_else(CapsSet::empty, |p| p.template.clone())
    }

    fn create_element(&self, factory: &str, name: &str) -> Result<ElementId, GraphError> {
        let kind = ElementKind::of_factory(factory)
            .ok_or_else(|| GraphError::UnknownFactory(factory.to_string()))?;
        let mut inner = self.inner.lock();
        if inner.elements.values().any(|e| e.name == name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }

        inner.next_id += 1;
        let id = ElementId::new(inner.next_id);
        inner.elements.insert(
            id,
            Element {
                name: name.to_string(),
                factory: factory.to_string(),
                kind,
                state: GraphState::Null,
                pads: Vec::new(),
                next_request: 0,
                output_caps: if kind == ElementKind::Source {
                    default_source_caps()
                } else {
                    CapsSet::Any
                },
                frames: 0,
                eos: false,
                frame_callback: None,
            },
        );

        let sink_template = if factory == "appsink" {
            CapsSet::single(CapsStructure::new("video/x-raw"))
        } else {
            CapsSet::Any
        };
        match kind {
            ElementKind::Source => {
                inner.add_pad(id, "src", Direction::Src, CapsSet::Any);
            }
            ElementKind::Filter => {
                inner.add_pad(id, "sink", Direction::Sink, CapsSet::Any);
                inner.add_pad(id, "src", Direction::Src, CapsSet::Any);
            }
            ElementKind::Tee => {
                inner.add_pad(id, "sink", Direction::Sink, CapsSet::Any);
            }
            ElementKind::Sink => {
                inner.add_pad(id, "sink", Direction::Sink, sink_template);
            }
        }
        inner.mutations += 1;
        Ok(id)
    }

    fn remove_element(&self, element: ElementId) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let removed = inner
            .elements
            .remove(&element)
            .ok_or_else(|| GraphError::NoSuchElement(element.to_string()))?;
        for pad in removed.pads {
            inner.detach_pad(pad);
        }
        inner.mutations += 1;
        Ok(())
    }

    fn request_pad(&self, element: ElementId, template: &str) -> Result<PadId, GraphError> {
        let mut inner = self.inner.lock();
        let el = inner
            .elements
            .get_mut(&element)
            .ok_or_else(|| GraphError::NoSuchElement(element.to_string()))?;
        if el.kind != ElementKind::Tee || template != "src_%u" {
            return Err(GraphError::NoSuchPad(format!("{}.{template}", el.name)));
        }
        let name = format!("src_{}", el.next_request);
        el.next_request += 1;
        let pad = inner.add_pad(element, &name, Direction::Src, CapsSet::Any);
        inner.mutations += 1;
        Ok(pad)
    }

    fn link(&self, src: PadId, sink: PadId, filter: Option<&CapsSet>) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let refused = |inner: &Inner, reason: &str| GraphError::LinkRefused {
            src: inner.pad_label(src),
            sink: inner.pad_label(sink),
            reason: reason.to_string(),
        };

        let src_pad = inner.pad(src)?;
        let sink_pad = inner.pad(sink)?;
        if src_pad.direction != Direction::Src || sink_pad.direction != Direction::Sink {
            return Err(refused(&inner, "wrong pad direction"));
        }
        if src_pad.peer.is_some() || sink_pad.peer.is_some() {
            return Err(refused(&inner, "pad already linked"));
        }

        let mut caps = src_pad.template.intersect(&sink_pad.template);
        let upstream = inner.element(src_pad.element)?;
        if upstream.kind == ElementKind::Source {
            caps = caps.intersect(&upstream.output_caps);
        }
        if let Some(filter) = filter {
            caps = caps.intersect(filter);
        }
        if caps.is_empty() {
            return Err(refused(&inner, "no common caps"));
        }

        if let Some(pad) = inner.pads.get_mut(&src) {
            pad.peer = Some(sink);
            pad.filter = filter.cloned();
        }
        if let Some(pad) = inner.pads.get_mut(&sink) {
            pad.peer = Some(src);
        }
        inner.mutations += 1;
        Ok(())
    }

    fn unlink(&self, src: PadId, sink: PadId) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        if inner.pad(src)?.peer != Some(sink) {
            return Err(GraphError::NotLinked {
                src: inner.pad_label(src),
                sink: inner.pad_label(sink),
            });
        }
        if let Some(pad) = inner.pads.get_mut(&src) {
            pad.peer = None;
            pad.filter = None;
        }
        if let Some(pad) = inner.pads.get_mut(&sink) {
            pad.peer = None;
        }
        inner.mutations += 1;
        Ok(())
    }

    fn set_frame_callback(&self, sink: ElementId, callback: FrameCallback) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let element = inner
            .elements
            .get_mut(&sink)
            .ok_or_else(|| GraphError::NoSuchElement(sink.to_string()))?;
        if element.kind != ElementKind::Sink {
            return Err(GraphError::NoSuchElement(format!(
                "{} is not a sink",
                element.name
            )));
        }
        element.frame_callback = Some(callback);
        Ok(())
    }

    fn set_message_callback(&self, callback: MessageCallback) {
        self.inner.lock().message_callback = Some(callback);
    }
}
