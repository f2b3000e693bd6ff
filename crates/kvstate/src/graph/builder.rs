use std::collections::BTreeSet;

use crate::graph::error::GraphError;
use crate::graph::infer::{validate_nodes_and_infer_types, TypeEnv};
use crate::graph::spec::{
    Graph, Node, Operand, Operation, Parameter, TensorSpec, ValueId, Variable,
};

/// Lightweight builder for constructing graphs programmatically.
///
/// Node output types are inferred as nodes are emitted, so a malformed node is reported at the
/// call that adds it rather than when the graph is finished.
#[derive(Default)]
pub struct GraphBuilder {
    next_value_id: u32,
    parameters: Vec<Parameter>,
    nodes: Vec<Node>,
    variables: Vec<Variable>,
    sinks: Vec<ValueId>,
    env: TypeEnv,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        id
    }

    /// Adds an input carrying `name`.
    pub fn add_parameter(&mut self, name: impl Into<String>, spec: TensorSpec) -> ValueId {
        let id = self.allocate();
        let param = Parameter {
            id,
            names: BTreeSet::from([name.into()]),
            spec,
        };
        // Ids are freshly allocated, so the definition cannot collide.
        let _ = self.env.define_parameter(&param);
        self.parameters.push(param);
        id
    }

    /// Declares a persistent-state variable for later `read_value`/`assign` nodes.
    pub fn declare_variable(&mut self, variable: Variable) {
        self.variables.push(variable);
    }

    /// Appends a node, inferring its output type.
    pub fn emit(&mut self, op: Operation, operands: Vec<Operand>) -> Result<ValueId, GraphError> {
        let id = self.allocate();
        let inferred = self.env.infer(id, &op, &operands, &self.variables)?;
        let output = inferred.spec.clone();
        self.env.define(id, inferred)?;
        if matches!(op, Operation::Assign(_)) {
            self.sinks.push(id);
        }
        self.nodes.push(Node {
            id,
            op,
            operands,
            output,
            names: BTreeSet::new(),
        });
        Ok(id)
    }

    /// Attaches a tensor name to an emitted node or parameter.
    pub fn name_value(&mut self, id: ValueId, name: impl Into<String>) {
        let name = name.into();
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == id) {
            node.names.insert(name);
        } else if let Some(param) = self.parameters.iter_mut().find(|param| param.id == id) {
            param.names.insert(name);
        }
    }

    pub fn spec_of(&self, id: ValueId) -> Option<&TensorSpec> {
        self.env.spec_of(id)
    }

    /// Finishes the graph with `results` as its outputs and validates it.
    pub fn finish(self, name: impl Into<String>, results: Vec<ValueId>) -> Result<Graph, GraphError> {
        let mut graph = Graph {
            name: name.into(),
            parameters: self.parameters,
            body: self.nodes,
            results,
            sinks: self.sinks,
            variables: self.variables,
        };
        validate_nodes_and_infer_types(&mut graph)?;
        Ok(graph)
    }
}
