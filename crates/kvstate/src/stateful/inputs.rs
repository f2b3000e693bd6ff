use crate::graph::{Graph, ValueId};

/// Inputs that are not key/value cache ports.
///
/// Built by the orchestrator, extended by [`fuse_cache_reorder`](super::fuse_cache_reorder)
/// with the new `beam_idx` input and read by [`make_stateful`](super::make_stateful) when the
/// batch size is pinned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonKvInputs {
    ports: Vec<ValueId>,
}

impl NonKvInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every input of `graph` none of whose names appears in `key_value_input_names`.
    pub fn partition<S: AsRef<str>>(graph: &Graph, key_value_input_names: &[S]) -> Self {
        let ports = graph
            .parameters
            .iter()
            .filter(|param| {
                !param.names.iter().any(|name| {
                    key_value_input_names
                        .iter()
                        .any(|kv| kv.as_ref() == name.as_str())
                })
            })
            .map(|param| param.id)
            .collect();
        Self { ports }
    }

    pub fn push(&mut self, port: ValueId) {
        self.ports.push(port);
    }

    pub fn ports(&self) -> &[ValueId] {
        &self.ports
    }

    pub fn contains(&self, port: ValueId) -> bool {
        self.ports.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
