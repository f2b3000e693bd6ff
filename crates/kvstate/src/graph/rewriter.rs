use std::collections::BTreeSet;

use crate::graph::error::GraphError;
use crate::graph::index::{Consumer, GraphIndex, PortRef};
use crate::graph::spec::{
    Graph, Node, Operand, Operation, Parameter, TensorSpec, ValueId, Variable,
};

/// Where a new node is placed in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// Before every existing node; operands may only reference parameters or literals.
    Front,
    /// Immediately before the given node.
    Before(ValueId),
    /// Immediately after the given node.
    After(ValueId),
    /// After every existing node.
    End,
}

/// Mutable graph editor that keeps name and use-list indices current.
///
/// Node output types written through the rewriter are provisional; callers run
/// [`validate_nodes_and_infer_types`](crate::graph::validate_nodes_and_infer_types) once their
/// edits are complete.
pub struct GraphRewriter<'a> {
    pub graph: &'a mut Graph,
    index: GraphIndex,
}

impl<'a> GraphRewriter<'a> {
    /// Creates a rewriter for the graph, indexing its ports and uses.
    pub fn new(graph: &'a mut Graph) -> Result<Self, GraphError> {
        let index = GraphIndex::build(graph)?;
        Ok(Self { graph, index })
    }

    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    /// Parameter carrying `name`.
    pub fn input(&self, name: &str) -> Result<ValueId, GraphError> {
        self.index
            .input_named(name)
            .ok_or_else(|| GraphError::UnknownPort {
                name: name.to_string(),
            })
    }

    /// Result index of the output carrying `name`.
    pub fn output(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .output_named(name)
            .ok_or_else(|| GraphError::UnknownPort {
                name: name.to_string(),
            })
    }

    pub fn spec_of(&self, value: ValueId) -> Option<&TensorSpec> {
        self.graph.spec_of(value)
    }

    /// Snapshot of the consumer edges currently reading `value`.
    pub fn consumers_of(&self, value: ValueId) -> Vec<Consumer> {
        self.index.consumers_of(value).to_vec()
    }

    /// Appends a parameter and returns its value id.
    pub fn add_parameter(&mut self, names: BTreeSet<String>, spec: TensorSpec) -> ValueId {
        let id = self.index.allocate_value();
        for name in &names {
            self.index.add_port(name.clone(), PortRef::Input(id));
        }
        self.graph.parameters.push(Parameter { id, names, spec });
        id
    }

    /// Removes a parameter that no longer has consumers.
    pub fn remove_parameter(&mut self, id: ValueId) -> Result<Parameter, GraphError> {
        if !self.index.consumers_of(id).is_empty() {
            return Err(GraphError::state_mapping(format!(
                "parameter {id:?} still has consumers"
            )));
        }
        let pos = self
            .graph
            .parameters
            .iter()
            .position(|param| param.id == id)
            .ok_or(GraphError::MissingValueDefinition { value: id })?;
        self.index.remove_port(PortRef::Input(id));
        Ok(self.graph.parameters.remove(pos))
    }

    /// Inserts a node and records its operand uses.
    pub fn insert_node(
        &mut self,
        at: InsertPoint,
        op: Operation,
        operands: Vec<Operand>,
        output: TensorSpec,
    ) -> Result<ValueId, GraphError> {
        let pos = match at {
            InsertPoint::Front => 0,
            InsertPoint::End => self.graph.body.len(),
            InsertPoint::Before(node) => self
                .index
                .position(node)
                .ok_or(GraphError::MissingValueDefinition { value: node })?,
            InsertPoint::After(node) => {
                self.index
                    .position(node)
                    .ok_or(GraphError::MissingValueDefinition { value: node })?
                    + 1
            }
        };
        let id = self.index.allocate_value();
        for (slot, operand) in operands.iter().enumerate() {
            if let Some(value) = operand.value() {
                self.index.add_consumer(
                    value,
                    Consumer::Node {
                        node: id,
                        operand: slot,
                    },
                );
            }
        }
        self.graph.body.insert(
            pos,
            Node {
                id,
                op,
                operands,
                output,
                names: BTreeSet::new(),
            },
        );
        self.index.reindex_positions(self.graph);
        Ok(id)
    }

    /// Points one consumer edge of `from` at `to` instead.
    pub fn redirect(
        &mut self,
        consumer: Consumer,
        from: ValueId,
        to: ValueId,
    ) -> Result<(), GraphError> {
        match consumer {
            Consumer::Node { node, operand } => {
                let pos = self
                    .index
                    .position(node)
                    .ok_or(GraphError::MissingValueDefinition { value: node })?;
                let slot = self.graph.body[pos]
                    .operands
                    .get_mut(operand)
                    .ok_or(GraphError::StaleEdge { value: from })?;
                if *slot != Operand::Value(from) {
                    return Err(GraphError::StaleEdge { value: from });
                }
                *slot = Operand::Value(to);
            }
            Consumer::Result(index) => {
                let slot = self
                    .graph
                    .results
                    .get_mut(index)
                    .ok_or(GraphError::StaleEdge { value: from })?;
                if *slot != from {
                    return Err(GraphError::StaleEdge { value: from });
                }
                *slot = to;
                self.index.remove_port(PortRef::Output(index));
                if let Some(names) = self.graph.names_of(to) {
                    for name in names.clone() {
                        self.index.add_port(name, PortRef::Output(index));
                    }
                }
            }
        }
        self.index.remove_consumer(from, consumer);
        self.index.add_consumer(to, consumer);
        Ok(())
    }

    /// Replaces every use of `from`, including results, with `to`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> Result<(), GraphError> {
        if from == to {
            return Ok(());
        }
        for consumer in self.consumers_of(from) {
            self.redirect(consumer, from, to)?;
        }
        Ok(())
    }

    /// Replaces the operand list of `node`.
    pub fn set_operands(
        &mut self,
        node: ValueId,
        operands: Vec<Operand>,
    ) -> Result<(), GraphError> {
        let pos = self
            .index
            .position(node)
            .ok_or(GraphError::MissingValueDefinition { value: node })?;
        let previous = std::mem::take(&mut self.graph.body[pos].operands);
        for (slot, operand) in previous.iter().enumerate() {
            if let Some(value) = operand.value() {
                self.index
                    .remove_consumer(value, Consumer::Node { node, operand: slot });
            }
        }
        for (slot, operand) in operands.iter().enumerate() {
            if let Some(value) = operand.value() {
                self.index
                    .add_consumer(value, Consumer::Node { node, operand: slot });
            }
        }
        self.graph.body[pos].operands = operands;
        Ok(())
    }

    /// Attaches a tensor name to a node output.
    pub fn add_name(&mut self, node: ValueId, name: impl Into<String>) -> Result<(), GraphError> {
        let pos = self
            .index
            .position(node)
            .ok_or(GraphError::MissingValueDefinition { value: node })?;
        self.graph.body[pos].names.insert(name.into());
        Ok(())
    }

    /// Removes the output at `index` and returns the value it exposed.
    pub fn remove_result(&mut self, index: usize) -> Result<ValueId, GraphError> {
        if index >= self.graph.results.len() {
            return Err(GraphError::state_mapping(format!(
                "result index {index} out of range"
            )));
        }
        let value = self.graph.results.remove(index);
        self.index.remove_consumer(value, Consumer::Result(index));
        self.index.remove_port(PortRef::Output(index));
        self.index.result_removed(index);
        Ok(value)
    }

    pub fn add_sink(&mut self, node: ValueId) {
        self.graph.sinks.push(node);
    }

    pub fn add_variable(&mut self, variable: Variable) -> Result<(), GraphError> {
        if self.graph.variable(&variable.id).is_some() {
            return Err(GraphError::DuplicateVariable { id: variable.id });
        }
        self.graph.variables.push(variable);
        Ok(())
    }
}
