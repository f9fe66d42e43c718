//! The host media graph a session splices into.
//!
//! [`MediaGraph`] is the boundary between frame-saver and whatever runs the
//! data flow: element and pad lookup, pad probes, stream signals, caps
//! queries, topology changes and the message channel. Callbacks handed to
//! the graph may run on any of its worker threads.
//!
//! [`MemoryGraph`] is an in-process implementation used by the binary and
//! the tests; [`launch`] builds one from a `pipe=` spec.

mod ids;
pub mod launch;
mod memory;
mod pattern;

pub use ids::{ElementId, PadId, ProbeId};
pub use memory::{ElementKind, MemoryGraph};
pub use pattern::{spawn_test_sources, TestPattern};

use std::sync::Arc;

use crate::format::CapsSet;
use crate::GraphError;

/// Application message name that asks every session on the graph to end.
pub const TURN_OFF: &str = "turn_off";

/// Playback state of a graph or element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GraphState {
    /// Torn down.
    Null,
    /// Resources allocated, no data.
    Ready,
    /// Prerolled, data held.
    Paused,
    /// Data flowing.
    Playing,
}

impl GraphState {
    /// Returns `true` if buffers are moving.
    pub fn is_flowing(self) -> bool {
        self == Self::Playing
    }
}

/// A message posted on the graph's bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphMessage {
    /// An element reported an error.
    Error(String),
    /// Every sink received end of stream.
    EndOfStream,
    /// A named application message.
    Application(String),
    /// The graph changed state.
    StateChanged {
        /// Previous state.
        from: GraphState,
        /// New state.
        to: GraphState,
    },
}

/// Invoked once when a probe fires.
pub type ProbeCallback = Box<dyn FnOnce() + Send>;

/// Invoked for each buffer reaching a sink element, with the buffer bytes
/// and its caps text.
pub type FrameCallback = Arc<dyn Fn(&[u8], &str) + Send + Sync>;

/// Invoked for each bus message.
pub type MessageCallback = Arc<dyn Fn(GraphMessage) + Send + Sync>;

/// Operations frame-saver needs from a host graph.
///
/// Callbacks are never invoked while the graph holds internal locks, so
/// they may call back into the graph.
pub trait MediaGraph: Send + Sync {
    /// Name of the graph.
    fn name(&self) -> String;

    /// Current graph state.
    fn state(&self) -> GraphState;

    /// Changes the graph state.
    fn set_state(&self, state: GraphState) -> Result<(), GraphError>;

    /// Looks up an element by name.
    fn element_by_name(&self, name: &str) -> Option<ElementId>;

    /// Looks up an always-present pad of an element.
    fn static_pad(&self, element: ElementId, name: &str) -> Option<PadId>;

    /// Changes the state of one element.
    fn set_element_state(&self, element: ElementId, state: GraphState) -> Result<(), GraphError>;

    /// The pad linked to `pad`, if any.
    fn peer(&self, pad: PadId) -> Option<PadId>;

    /// The element owning `pad`.
    fn element_of(&self, pad: PadId) -> Option<ElementId>;

    /// Factory name of an element, e.g. `tee`.
    fn factory_of(&self, element: ElementId) -> Option<String>;

    /// Blocks data on a source pad. `on_blocked` runs once, when the first
    /// buffer is held. Held data is released by [`remove_probe`].
    ///
    /// [`remove_probe`]: MediaGraph::remove_probe
    fn block_pad(&self, pad: PadId, on_blocked: ProbeCallback) -> Result<ProbeId, GraphError>;

    /// Removes a probe, releasing anything it held.
    fn remove_probe(&self, probe: ProbeId) -> Result<(), GraphError>;

    /// Intercepts the next end-of-segment signal arriving at a sink pad.
    /// The signal is consumed and `on_signal` runs once.
    fn intercept_end_of_segment(
        &self,
        pad: PadId,
        on_signal: ProbeCallback,
    ) -> Result<ProbeId, GraphError>;

    /// Injects an end-of-segment signal arriving at a sink pad.
    fn send_end_of_segment(&self, pad: PadId) -> Result<(), GraphError>;

    /// Sends end of stream downstream from an element.
    fn send_end_of_stream(&self, element: ElementId) -> Result<(), GraphError>;

    /// Caps a pad can currently carry.
    fn allowed_caps(&self, pad: PadId) -> CapsSet;

    /// Caps of the pad's template.
    fn template_caps(&self, pad: PadId) -> CapsSet;

    /// Creates and adds an element.
    fn create_element(&self, factory: &str, name: &str) -> Result<ElementId, GraphError>;

    /// Unlinks and removes an element.
    fn remove_element(&self, element: ElementId) -> Result<(), GraphError>;

    /// Requests a new pad from a pad template such as `src_%u`.
    fn request_pad(&self, element: ElementId, template: &str) -> Result<PadId, GraphError>;

    /// Links a source pad to a sink pad, optionally restricted to `filter`.
    fn link(&self, src: PadId, sink: PadId, filter: Option<&CapsSet>) -> Result<(), GraphError>;

    /// Removes a link.
    fn unlink(&self, src: PadId, sink: PadId) -> Result<(), GraphError>;

    /// Delivers every buffer reaching a sink element to `callback`.
    fn set_frame_callback(&self, sink: ElementId, callback: FrameCallback) -> Result<(), GraphError>;

    /// Delivers bus messages to `callback`, replacing any previous one.
    fn set_message_callback(&self, callback: MessageCallback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_playing_flows() {
        assert!(GraphState::Playing.is_flowing());
        assert!(!GraphState::Paused.is_flowing());
        assert!(!GraphState::Null.is_flowing());
        assert!(GraphState::Null < GraphState::Playing);
    }
}
