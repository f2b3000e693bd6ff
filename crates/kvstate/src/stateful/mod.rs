//! Stages of the stateful key/value cache rewrite.
//!
//! [`patch_stateful`] runs them in order: the engine version gate, cache reorder fusion, the
//! port-to-state conversion and finally the zero initializers. Each stage is public so callers
//! with unusual graphs can drive them by hand.

mod error;
mod initializer;
mod inputs;
mod patch;
mod query;
mod reorder;
mod transform;

pub use error::{Diagnostic, StatefulError};
pub use initializer::build_state_initializer;
pub use inputs::NonKvInputs;
pub use patch::{
    ensure_stateful_is_available, patch_stateful, patch_stateful_with, CacheLayout, KvPortNames,
    ModelMetadata, StatefulConfig, LAST_UNSUPPORTED_ENGINE_VERSION, MIN_ENGINE_VERSION,
};
pub use query::{
    has_cache_reorder, has_named_input, has_named_port, has_persistent_state, BEAM_IDX,
    INPUT_IDS,
};
pub use reorder::fuse_cache_reorder;
pub use transform::{make_stateful, StatefulReport};
