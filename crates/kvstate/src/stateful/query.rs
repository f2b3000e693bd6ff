//! Read-only questions about a graph's public ports.

use crate::graph::Graph;

/// Name of the input carrying beam-search reorder indices.
pub const BEAM_IDX: &str = "beam_idx";

/// Name of the primary token input whose axis 0 is the live batch.
pub const INPUT_IDS: &str = "input_ids";

/// `true` when any input or output carries `name`.
pub fn has_named_port(graph: &Graph, name: &str) -> bool {
    has_named_input(graph, name) || graph.output_index(name).is_some()
}

/// `true` when any input carries `name`.
pub fn has_named_input(graph: &Graph, name: &str) -> bool {
    graph.input(name).is_some()
}

/// `true` when beam reordering has already been fused into the graph.
pub fn has_cache_reorder(graph: &Graph) -> bool {
    has_named_input(graph, BEAM_IDX)
}

/// `true` when the graph writes persistent state.
pub fn has_persistent_state(graph: &Graph) -> bool {
    !graph.sinks.is_empty()
}
