use thiserror::Error;

use crate::graph::{EngineVersion, GraphError};

/// Failures of the stateful rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatefulError {
    #[error(
        "cannot create or use a stateful graph with engine version {detected}; \
         upgrade to version {minimum} or newer"
    )]
    UnsupportedEngineVersion {
        detected: String,
        minimum: EngineVersion,
    },
    #[error("{inputs} key/value input names but {outputs} key/value output names")]
    KvNamesMismatch { inputs: usize, outputs: usize },
    #[error("graph has no input named `{name}`")]
    MissingPort { name: String },
    #[error("axis {axis} is out of range for `{port}` of rank {rank}")]
    AxisOutOfRange {
        port: String,
        axis: usize,
        rank: usize,
    },
    #[error("cache batch {batch} x {num_attention_heads} heads overflows usize")]
    BatchOverflow {
        batch: usize,
        num_attention_heads: usize,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Non-fatal findings recorded while rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A non-cache input keeps its shape because its rank is not 1 or 2.
    BatchNotPinned { input: String, rank: usize },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::BatchNotPinned { input, rank } => write!(
                f,
                "rank of input `{input}` is {rank}, not 1 or 2; batch size is not set"
            ),
        }
    }
}
