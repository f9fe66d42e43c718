//! Builder pattern for `FrameSaver`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::graph::{launch, spawn_test_sources, GraphMessage, MediaGraph};
use crate::pipeline::{CaptureScheduler, FrameCapture, Splicer, DEFAULT_IDLE_PERIOD};
use crate::registry::{HostHandle, InstanceRegistry, SessionId};
use crate::session::{Session, SessionState};
use crate::sink::SnapshotSink;
use crate::{event_callback, CaptureEvent, CaptureParams, EventCallback, FileSink, FrameSaverError};

/// Channel capacity for scheduler commands.
/// Commands are rare (live updates and Stop).
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Entry point for creating capture sessions.
pub struct FrameSaver;

impl FrameSaver {
    /// Creates a new builder for configuring a capture session.
    pub fn builder() -> FrameSaverBuilder {
        FrameSaverBuilder::new()
    }
}

/// Where the session's frames come from.
#[derive(Default)]
enum GraphSource {
    /// Build the graph from the `pipe=` parameter.
    #[default]
    FromParams,
    /// Splice into a graph supplied by the caller.
    Provided(Arc<dyn MediaGraph>),
    /// No graph; buffers arrive through [`Session::receive_buffer`].
    Inline,
}

/// Builder for configuring and starting a capture session.
///
/// Use [`FrameSaver::builder()`] to create a new builder.
///
/// # Example
///
/// ```no_run
/// use frame_saver::{CaptureEvent, FrameSaver};
///
/// # async fn run() -> Result<(), frame_saver::FrameSaverError> {
/// let session = FrameSaver::builder()
///     .args(["tick=500", "wait=0", "snap=100,3,0", "play=2000", "path=auto"])
///     .effect("edgetv")
///     .on_event(|e: CaptureEvent| tracing::info!(?e, "capture event"))
///     .start()
///     .await?;
///
/// let stats = session.wait().await?;
/// assert!(stats.saved <= 3);
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct FrameSaverBuilder {
    /// Base parameters.
    params: CaptureParams,
    /// `key=value` arguments applied on top of `params` at start.
    args: Vec<String>,
    /// Graph selection.
    graph: GraphSource,
    /// Configured sinks. A PNG file sink is used when empty.
    sinks: Vec<Arc<dyn SnapshotSink>>,
    /// Effect factories placed on the snapshot path.
    effects: Vec<String>,
    /// Event callback.
    event_callback: Option<EventCallback>,
    /// Registry to attach to; the process-wide one by default.
    registry: Option<Arc<InstanceRegistry>>,
    /// Host handle; a fresh one by default.
    handle: Option<HostHandle>,
    /// Period of the scheduler's idle poll.
    idle_period: Duration,
}

impl Default for FrameSaverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSaverBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            params: CaptureParams::default(),
            args: Vec::new(),
            graph: GraphSource::default(),
            sinks: Vec::new(),
            effects: Vec::new(),
            event_callback: None,
            registry: None,
            handle: None,
            idle_period: DEFAULT_IDLE_PERIOD,
        }
    }

    /// Set the base capture parameters.
    pub fn params(mut self, params: CaptureParams) -> Self {
        self.params = params;
        self
    }

    /// Add `key=value` arguments, applied in order on top of the base
    /// parameters when the session starts.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    /// Splice into an existing graph instead of building one from `pipe=`.
    ///
    /// The session drives the graph's state unless `pipe=` names a parent
    /// graph (a spec starting with `!`).
    pub fn graph(mut self, graph: Arc<dyn MediaGraph>) -> Self {
        self.graph = GraphSource::Provided(graph);
        self
    }

    /// Run without a graph. Buffers are delivered with
    /// [`Session::receive_buffer`].
    pub fn inline(mut self) -> Self {
        self.graph = GraphSource::Inline;
        self
    }

    /// Add a sink to receive every saved snapshot.
    pub fn add_sink<S: SnapshotSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add an effect element (by factory name) to the snapshot path.
    ///
    /// Effects run in the order added, between the snapshot queue and the
    /// converter.
    pub fn effect(mut self, factory: impl Into<String>) -> Self {
        self.effects.push(factory.into());
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include splice results, saved and failed snapshots, quota
    /// notices and the end of the run.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(CaptureEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Attach to this registry instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<InstanceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Attach under this host handle.
    pub fn handle(mut self, handle: HostHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Set the period of the scheduler's idle poll.
    ///
    /// Default: 10ms
    pub fn idle_period(mut self, period: Duration) -> Self {
        self.idle_period = period;
        self
    }

    /// Applies pending arguments and validates the result.
    fn resolve_params(&self) -> Result<CaptureParams, FrameSaverError> {
        let mut params = self.params.clone();
        if !self.args.is_empty() {
            params.apply_args(&self.args)?;
        }
        params.validate()?;
        Ok(params)
    }

    /// Builds or selects the graph. Returns the graph plus any test-source
    /// tasks feeding it.
    fn resolve_graph(
        &self,
        params: &CaptureParams,
    ) -> Result<(Option<Arc<dyn MediaGraph>>, Vec<JoinHandle<()>>), FrameSaverError> {
        match &self.graph {
            GraphSource::Inline => Ok((None, Vec::new())),
            GraphSource::Provided(graph) => Ok((Some(graph.clone()), Vec::new())),
            GraphSource::FromParams => {
                let Some(spec) = params.pipeline.launch_text() else {
                    return Err(FrameSaverError::config(
                        "pipe= names a parent graph; supply it with FrameSaverBuilder::graph",
                    ));
                };
                let graph = launch::build(&params.link.graph, spec)?;
                let sources = spawn_test_sources(&graph);
                tracing::debug!(graph = %params.link.graph, sources = sources.len(), "graph built");
                let graph: Arc<dyn MediaGraph> = graph;
                Ok((Some(graph), sources))
            }
        }
    }

    /// Start the capture session.
    ///
    /// Returns a [`Session`] handle to control the capture.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The parameters do not parse or validate
    /// - The registry is full or its lock times out
    /// - The graph cannot be built from `pipe=`
    #[allow(clippy::unused_async)]
    pub async fn start(self) -> Result<Session, FrameSaverError> {
        let params = self.resolve_params()?;
        let registry = self.registry.clone().unwrap_or_else(InstanceRegistry::global);
        let handle = self.handle.unwrap_or_else(HostHandle::unique);

        let id = registry.attach(handle)?;
        match self.start_attached(id, handle, params, &registry) {
            Ok(session) => Ok(session),
            Err(e) => {
                if let Err(detach) = registry.detach(handle) {
                    tracing::warn!(session = %id, error = %detach, "detach after failed start");
                }
                Err(e)
            }
        }
    }

    fn start_attached(
        self,
        id: SessionId,
        handle: HostHandle,
        params: CaptureParams,
        registry: &Arc<InstanceRegistry>,
    ) -> Result<Session, FrameSaverError> {
        registry.set_params(id, params.clone())?;
        let (graph, sources) = self.resolve_graph(&params)?;

        let sinks = if self.sinks.is_empty() {
            vec![Arc::new(FileSink::png()) as Arc<dyn SnapshotSink>]
        } else {
            self.sinks
        };
        let state = Arc::new(SessionState::new(
            params.snapshot.max_saved,
            params.snapshot.max_failed,
        ));
        let capture = Arc::new(FrameCapture::new(
            id,
            state.clone(),
            sinks,
            self.event_callback.clone(),
        ));

        let (msg_tx, msg_rx) = mpsc::unbounded_channel::<GraphMessage>();
        let splicer = graph.as_ref().map(|graph| {
            let tx = msg_tx.clone();
            graph.set_message_callback(Arc::new(move |message| {
                let _ = tx.send(message);
            }));
            Splicer::new(
                graph.clone(),
                id,
                params.link.clone(),
                params.pads.clone(),
                self.effects.clone(),
                capture.frame_callback(),
            )
        });
        drop(msg_tx);

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let scheduler = CaptureScheduler::new(
            id,
            params,
            graph.clone(),
            splicer,
            state.clone(),
            self.event_callback,
            self.idle_period,
        );
        let scheduler_handle = tokio::spawn(scheduler.run(cmd_rx, msg_rx));
        tracing::info!(session = %id, handle = handle.raw(), "session attached");

        Ok(Session::new(
            id,
            handle,
            registry.clone(),
            state,
            capture,
            graph,
            cmd_tx,
            scheduler_handle,
            sources,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_registry() -> Arc<InstanceRegistry> {
        Arc::new(InstanceRegistry::with_capacity(4))
    }

    #[test]
    fn test_args_apply_over_params() {
        let builder = FrameSaver::builder().args(["tick=500", "play=2000"]).args(["tick=700"]);
        let params = builder.resolve_params().unwrap();
        assert_eq!(params.tick, Duration::from_millis(700));
        assert_eq!(params.play, Duration::from_millis(2000));
    }

    #[test]
    fn test_invalid_args_rejected() {
        let builder = FrameSaver::builder().args(["tick=50"]);
        assert!(matches!(
            builder.resolve_params(),
            Err(FrameSaverError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_parent_pipeline_needs_graph() {
        let registry = local_registry();
        let result = FrameSaver::builder()
            .registry(registry.clone())
            .args(["pipe=! v4l2src ! autovideosink"])
            .start()
            .await;
        assert!(matches!(result, Err(FrameSaverError::Config { .. })));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_pipeline_detaches() {
        let registry = local_registry();
        let result = FrameSaver::builder()
            .registry(registry.clone())
            .args(["pipe=videotestsrc ! warpdrive"])
            .start()
            .await;
        assert!(matches!(result, Err(FrameSaverError::Graph(_))));
        assert!(registry.is_torn_down());
    }

    #[tokio::test]
    async fn test_start_attaches_and_stop_detaches() {
        let dir = tempfile::tempdir().unwrap();
        let registry = local_registry();
        let session = FrameSaver::builder()
            .registry(registry.clone())
            .args([format!("path={}", dir.path().display())])
            .inline()
            .start()
            .await
            .unwrap();

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.find(session.handle()), Some(session.id()));
        assert!(session.graph().is_none());

        session.stop().await.unwrap();
        assert_eq!(registry.active_count(), 0);
    }
}
