//! Builds a [`MemoryGraph`] from a `pipe=` spec.
//!
//! ```text
//! videotestsrc name=cam ! video/x-raw,width=500,height=200 ! videoconvert ! autovideosink
//! ```
//!
//! Stages are separated by `!`. A stage whose first word contains `/` is a
//! caps filter applied to the link it sits on; any other stage is an
//! element `factory [name=value] [property=value]...`. Unnamed elements
//! are called `<factory><n>`, counting per factory from zero.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ElementId, MediaGraph, MemoryGraph};
use crate::format::{CapsSet, CapsValue};
use crate::GraphError;

enum Stage {
    Element { factory: String, name: Option<String> },
    Caps(CapsSet),
}

fn parse_stage(text: &str) -> Result<Stage, GraphError> {
    let mut words = text.split_whitespace();
    let first = words
        .next()
        .ok_or_else(|| GraphError::BadSpec("empty stage".to_string()))?;

    if first.contains('/') {
        let caps = text
            .parse::<CapsSet>()
            .map_err(|e| GraphError::BadSpec(format!("'{text}': {e}")))?;
        return Ok(Stage::Caps(caps));
    }

    let mut name = None;
    for property in words {
        match property.split_once('=') {
            Some(("name", value)) if !value.is_empty() => name = Some(value.to_string()),
            Some((key, _)) => tracing::debug!(factory = first, key, "ignoring element property"),
            None => {
                return Err(GraphError::BadSpec(format!(
                    "expected property=value after '{first}', got '{property}'"
                )))
            }
        }
    }
    Ok(Stage::Element {
        factory: first.to_string(),
        name,
    })
}

/// Parses `spec` and builds the graph it describes, named `graph_name`.
///
/// The graph is left in the `Null` state.
///
/// # Example
///
/// ```
/// use frame_saver::graph::{launch, MediaGraph};
///
/// let graph = launch::build("untitledPipe0", "videotestsrc ! videoconvert ! fakesink").unwrap();
/// assert!(graph.element_by_name("videotestsrc0").is_some());
/// assert!(graph.element_by_name("videoconvert0").is_some());
/// ```
pub fn build(graph_name: &str, spec: &str) -> Result<Arc<MemoryGraph>, GraphError> {
    let stages = spec
        .split('!')
        .map(str::trim)
        .map(|stage| {
            if stage.is_empty() {
                Err(GraphError::BadSpec(format!("empty stage in '{spec}'")))
            } else {
                parse_stage(stage)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let graph = MemoryGraph::new(graph_name);
    let mut counters: HashMap<String, u32> = HashMap::new();
    let mut previous: Option<ElementId> = None;
    let mut pending: Option<CapsSet> = None;

    for stage in stages {
        match stage {
            Stage::Caps(caps) => {
                if previous.is_none() {
                    return Err(GraphError::BadSpec(
                        "caps filter before the first element".to_string(),
                    ));
                }
                pending = Some(match pending.take() {
                    Some(existing) => existing.intersect(&caps),
                    None => caps,
                });
            }
            Stage::Element { factory, name } => {
                let counter = counters.entry(factory.clone()).or_insert(0);
                let name = name.unwrap_or_else(|| format!("{factory}{counter}"));
                *counter += 1;

                let element = graph.create_element(&factory, &name)?;
                if let Some(upstream) = previous {
                    link_stages(&graph, upstream, element, pending.take())?;
                }
                previous = Some(element);
            }
        }
    }

    if pending.is_some() {
        return Err(GraphError::BadSpec(
            "caps filter after the last element".to_string(),
        ));
    }
    tracing::debug!(graph = graph_name, spec, "graph built");
    Ok(Arc::new(graph))
}

fn link_stages(
    graph: &MemoryGraph,
    upstream: ElementId,
    downstream: ElementId,
    filter: Option<CapsSet>,
) -> Result<(), GraphError> {
    let src = match graph.static_pad(upstream, "src") {
        Some(pad) => pad,
        None => graph.request_pad(upstream, "src_%u")?,
    };
    let sink = graph
        .static_pad(downstream, "sink")
        .ok_or_else(|| GraphError::NoSuchPad(format!("{downstream}.sink")))?;

    if let Some(filter) = &filter {
        apply_to_source(graph, upstream, filter)?;
    }
    graph.link(src, sink, filter.as_ref())
}

/// Fixes a source's output caps to the fixed fields of a filter placed
/// directly after it.
fn apply_to_source(graph: &MemoryGraph, source: ElementId, filter: &CapsSet) -> Result<(), GraphError> {
    let (Some(output), Some(wanted)) = (graph.output_caps(source), filter.structures().first()) else {
        return Ok(());
    };
    let Some(mut structure) = output.structures().first().cloned() else {
        return Ok(());
    };
    for (name, value) in wanted.fields() {
        if matches!(
            value,
            CapsValue::Int(_) | CapsValue::Fraction(..) | CapsValue::Str(_)
        ) {
            structure.set(name, value.clone());
        }
    }
    graph.set_output_caps(source, CapsSet::single(structure))
}
