use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use crate::graph::error::GraphError;
use crate::graph::spec::{Graph, ValueId};

/// Where a named port lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRef {
    /// Graph parameter with the given value id.
    Input(ValueId),
    /// Entry of `Graph::results` at the given index.
    Output(usize),
}

/// One edge reading a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumer {
    /// Operand slot `operand` of node `node`.
    Node { node: ValueId, operand: usize },
    /// Entry of `Graph::results` at the given index.
    Result(usize),
}

/// Name and use-list indices for a graph, built once per rewrite stage.
#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    ports: HashMap<String, SmallVec<[PortRef; 2]>>,
    consumers: HashMap<ValueId, SmallVec<[Consumer; 4]>>,
    positions: HashMap<ValueId, usize>,
    next_value: u32,
}

impl GraphIndex {
    /// Indexes the graph and validates that every operand refers to an earlier definition.
    pub fn build(graph: &Graph) -> Result<Self, GraphError> {
        let mut defined: HashSet<ValueId> = HashSet::new();
        let mut ports: HashMap<String, SmallVec<[PortRef; 2]>> = HashMap::new();
        let mut consumers: HashMap<ValueId, SmallVec<[Consumer; 4]>> = HashMap::new();
        let mut positions = HashMap::with_capacity(graph.body.len());

        for param in &graph.parameters {
            if !defined.insert(param.id) {
                return Err(GraphError::DuplicateValue { value: param.id });
            }
            for name in &param.names {
                ports
                    .entry(name.clone())
                    .or_default()
                    .push(PortRef::Input(param.id));
            }
        }

        for (pos, node) in graph.body.iter().enumerate() {
            for (slot, operand) in node.operands.iter().enumerate() {
                let Some(value) = operand.value() else {
                    continue;
                };
                if !defined.contains(&value) {
                    return Err(GraphError::MissingValueDefinition { value });
                }
                consumers.entry(value).or_default().push(Consumer::Node {
                    node: node.id,
                    operand: slot,
                });
            }
            if !defined.insert(node.id) {
                return Err(GraphError::DuplicateValue { value: node.id });
            }
            positions.insert(node.id, pos);
        }

        for (index, value) in graph.results.iter().enumerate() {
            if !defined.contains(value) {
                return Err(GraphError::MissingValueDefinition { value: *value });
            }
            consumers
                .entry(*value)
                .or_default()
                .push(Consumer::Result(index));
            if let Some(names) = graph.names_of(*value) {
                for name in names {
                    ports
                        .entry(name.clone())
                        .or_default()
                        .push(PortRef::Output(index));
                }
            }
        }

        Ok(Self {
            ports,
            consumers,
            positions,
            next_value: graph.next_value_id().0,
        })
    }

    /// All ports (inputs and outputs) carrying `name`.
    pub fn ports_named(&self, name: &str) -> &[PortRef] {
        self.ports
            .get(name)
            .map(|ports| ports.as_slice())
            .unwrap_or(&[])
    }

    /// Parameter carrying `name`, if any.
    pub fn input_named(&self, name: &str) -> Option<ValueId> {
        self.ports_named(name).iter().find_map(|port| match port {
            PortRef::Input(id) => Some(*id),
            PortRef::Output(_) => None,
        })
    }

    /// Result index of the output carrying `name`, if any.
    pub fn output_named(&self, name: &str) -> Option<usize> {
        self.ports_named(name).iter().find_map(|port| match port {
            PortRef::Output(index) => Some(*index),
            PortRef::Input(_) => None,
        })
    }

    /// Recorded consumer edges for `value`.
    pub fn consumers_of(&self, value: ValueId) -> &[Consumer] {
        self.consumers
            .get(&value)
            .map(|consumers| consumers.as_slice())
            .unwrap_or(&[])
    }

    pub fn position(&self, node: ValueId) -> Option<usize> {
        self.positions.get(&node).copied()
    }

    pub(crate) fn allocate_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    pub(crate) fn add_consumer(&mut self, value: ValueId, consumer: Consumer) {
        self.consumers.entry(value).or_default().push(consumer);
    }

    pub(crate) fn remove_consumer(&mut self, value: ValueId, consumer: Consumer) {
        if let Some(consumers) = self.consumers.get_mut(&value) {
            consumers.retain(|existing| *existing != consumer);
        }
    }

    pub(crate) fn add_port(&mut self, name: String, port: PortRef) {
        self.ports.entry(name).or_default().push(port);
    }

    pub(crate) fn remove_port(&mut self, port: PortRef) {
        for ports in self.ports.values_mut() {
            ports.retain(|existing| *existing != port);
        }
        self.ports.retain(|_, ports| !ports.is_empty());
    }

    /// Shifts result indices after `results.remove(removed)`.
    pub(crate) fn result_removed(&mut self, removed: usize) {
        let shift_port = |port: &mut PortRef| {
            if let PortRef::Output(index) = port {
                if *index > removed {
                    *index -= 1;
                }
            }
        };
        for ports in self.ports.values_mut() {
            ports.iter_mut().for_each(shift_port);
        }
        for consumers in self.consumers.values_mut() {
            for consumer in consumers.iter_mut() {
                if let Consumer::Result(index) = consumer {
                    if *index > removed {
                        *index -= 1;
                    }
                }
            }
        }
    }

    pub(crate) fn reindex_positions(&mut self, graph: &Graph) {
        self.positions = graph
            .body
            .iter()
            .enumerate()
            .map(|(pos, node)| (node.id, pos))
            .collect();
    }
}
