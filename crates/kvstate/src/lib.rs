//! Rewrites the graph of one decoder step so that its key/value cache becomes persistent
//! state owned by the graph.
//!
//! In the input graph every cache tensor is an explicit input (`past_key_values.*`) paired with
//! an explicit output (`present.*`), and beam-search reordering happens outside the graph. After
//! [`patch_stateful`] the pairs are gone: each one is a `read_value`/`assign` pair over a
//! variable, a `beam_idx` input drives a gather in front of every cache read, and states start
//! from zeros shaped after the live batch of `input_ids`.

mod env;
pub mod graph;
pub mod stateful;

pub use graph::{EngineCapabilities, EngineInfo, EngineVersion, Graph, GraphBuilder, GraphError};
pub use stateful::{
    build_state_initializer, fuse_cache_reorder, has_cache_reorder, has_named_input,
    has_named_port, has_persistent_state, make_stateful, patch_stateful, patch_stateful_with,
    CacheLayout, Diagnostic, KvPortNames, ModelMetadata, NonKvInputs, StatefulConfig,
    StatefulError, StatefulReport,
};
