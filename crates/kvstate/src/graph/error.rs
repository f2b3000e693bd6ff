use thiserror::Error;

use crate::graph::spec::{ValueId, VariableId};

/// Failures reported by the graph engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("value {value:?} defined multiple times")]
    DuplicateValue { value: ValueId },
    #[error("value {value:?} used before definition")]
    MissingValueDefinition { value: ValueId },
    #[error("edge no longer reads value {value:?}")]
    StaleEdge { value: ValueId },
    #[error("graph has no port named `{name}`")]
    UnknownPort { name: String },
    #[error("graph has no variable `{id}`")]
    UnknownVariable { id: VariableId },
    #[error("variable `{id}` declared multiple times")]
    DuplicateVariable { id: VariableId },
    #[error("sink {value:?} is not an assign node")]
    InvalidSink { value: ValueId },
    #[error("type inference failed at {node:?} ({op}): {reason}")]
    Inference {
        node: ValueId,
        op: &'static str,
        reason: String,
    },
    #[error("invalid state mapping: {reason}")]
    InvalidStateMapping { reason: String },
}

impl GraphError {
    pub(crate) fn inference(node: ValueId, op: &'static str, reason: impl Into<String>) -> Self {
        GraphError::Inference {
            node,
            op,
            reason: reason.into(),
        }
    }

    pub(crate) fn state_mapping(reason: impl Into<String>) -> Self {
        GraphError::InvalidStateMapping {
            reason: reason.into(),
        }
    }
}
