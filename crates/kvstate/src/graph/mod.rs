//! Minimal SSA graph engine the stateful rewrite operates on.
//!
//! The engine covers what the rewrite needs from a host graph library: named ports,
//! node construction, consumer-edge enumeration and redirection, shape/type re-inference, and
//! the atomic conversion of input/output pairs into persistent state. It never evaluates
//! tensors.

pub mod builder;
pub mod engine;
pub mod error;
pub mod index;
pub mod infer;
pub mod rewriter;
pub mod spec;
pub mod state;
mod text;

pub use builder::GraphBuilder;
pub use engine::{EngineCapabilities, EngineInfo, EngineVersion, VersionParseError};
pub use error::GraphError;
pub use index::{Consumer, GraphIndex, PortRef};
pub use infer::validate_nodes_and_infer_types;
pub use rewriter::{GraphRewriter, InsertPoint};
pub use spec::{
    CastSpec, ConcatSpec, DType, DimSymbol, Dimension, ElementwiseBinaryOp, GatherSpec, Graph,
    Node, Operand, Operation, Parameter, Shape, ShapeOfSpec, TensorLiteral, TensorSpec, ValueId,
    Variable, VariableId,
};
pub use state::{apply_make_stateful, variable_id_for};
