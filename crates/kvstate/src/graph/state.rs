//! Conversion of matched input/output port pairs into persistent state.

use std::collections::{BTreeSet, HashSet};

use log::debug;

use crate::graph::error::GraphError;
use crate::graph::infer::validate_nodes_and_infer_types;
use crate::graph::rewriter::{GraphRewriter, InsertPoint};
use crate::graph::spec::{Graph, Operand, Operation, ValueId, Variable, VariableId};

/// Identifier given to the variable created for an `input -> output` pair.
pub fn variable_id_for(input: &str, output: &str) -> VariableId {
    VariableId::new(format!("{input}/{output}"))
}

/// Replaces each `(input, output)` pair with a `read_value`/`assign` pair over a new variable.
///
/// The read takes the place of the parameter for every consumer; the assign is fed by whatever
/// used to flow into the output and is registered as a sink. The mapping is checked as a whole
/// before the graph is touched, so a rejected mapping leaves the graph unchanged. Returns the
/// created variable ids in mapping order.
pub fn apply_make_stateful(
    graph: &mut Graph,
    pairs: &[(String, String)],
) -> Result<Vec<VariableId>, GraphError> {
    let mut rewriter = GraphRewriter::new(graph)?;
    check_mapping(&rewriter, pairs)?;

    let mut created = Vec::with_capacity(pairs.len());
    for (input, output) in pairs {
        let param = rewriter.input(input)?;
        let spec = rewriter
            .spec_of(param)
            .cloned()
            .ok_or(GraphError::MissingValueDefinition { value: param })?;
        let id = variable_id_for(input, output);
        rewriter.add_variable(Variable {
            id: id.clone(),
            spec: spec.clone(),
        })?;

        let read = rewriter.insert_node(
            InsertPoint::Front,
            Operation::ReadValue(id.clone()),
            Vec::new(),
            spec.clone(),
        )?;
        rewriter.replace_all_uses(param, read)?;
        let removed = rewriter.remove_parameter(param)?;
        for name in removed.names {
            rewriter.add_name(read, name)?;
        }

        let result = rewriter.output(output)?;
        let value = rewriter.remove_result(result)?;
        let assign = rewriter.insert_node(
            InsertPoint::End,
            Operation::Assign(id.clone()),
            vec![Operand::Value(value)],
            spec,
        )?;
        rewriter.add_sink(assign);

        debug!("made `{input}` -> `{output}` stateful as variable `{id}`");
        created.push(id);
    }
    validate_nodes_and_infer_types(&mut *rewriter.graph)?;
    Ok(created)
}

fn check_mapping(
    rewriter: &GraphRewriter<'_>,
    pairs: &[(String, String)],
) -> Result<(), GraphError> {
    let mut inputs: HashSet<ValueId> = HashSet::new();
    let mut outputs: HashSet<usize> = HashSet::new();
    let mut names: BTreeSet<&str> = BTreeSet::new();

    for (input, output) in pairs {
        if !names.insert(input.as_str()) || !names.insert(output.as_str()) {
            return Err(GraphError::state_mapping(format!(
                "`{input}` -> `{output}` reuses a name already mapped"
            )));
        }
        let param = rewriter.input(input)?;
        if !inputs.insert(param) {
            return Err(GraphError::state_mapping(format!(
                "input `{input}` names a parameter that is already mapped"
            )));
        }
        let result = rewriter.output(output)?;
        if !outputs.insert(result) {
            return Err(GraphError::state_mapping(format!(
                "output `{output}` names a result that is already mapped"
            )));
        }
        if rewriter.graph.results[result] == param {
            return Err(GraphError::state_mapping(format!(
                "`{input}` is returned directly as `{output}`"
            )));
        }
    }
    Ok(())
}
