use std::collections::BTreeSet;

use log::debug;

use crate::graph::{
    validate_nodes_and_infer_types, DType, GatherSpec, Graph, GraphRewriter, InsertPoint,
    Operand, Operation, Shape, TensorSpec, ValueId,
};
use crate::stateful::error::StatefulError;
use crate::stateful::inputs::NonKvInputs;
use crate::stateful::query::{has_named_port, BEAM_IDX, INPUT_IDS};

/// Adds a `beam_idx` input and a gather along `gather_dim` in front of every cache input.
///
/// Every consumer of a cache input reads the reordered tensor afterwards, so beam-search
/// reordering happens inside the graph at the start of each step. The new input is appended to
/// `not_kv_inputs`. Must run before [`make_stateful`](super::make_stateful), which removes the
/// inputs this reads.
///
/// # Panics
///
/// Panics when the graph already has a `beam_idx` port.
pub fn fuse_cache_reorder<S: AsRef<str>>(
    graph: &mut Graph,
    not_kv_inputs: &mut NonKvInputs,
    key_value_input_names: &[S],
    gather_dim: usize,
) -> Result<(), StatefulError> {
    assert!(
        !has_named_port(graph, BEAM_IDX),
        "graph already has a `{BEAM_IDX}` port"
    );

    let mut rewriter = GraphRewriter::new(graph)?;
    let input_ids = rewriter.input(INPUT_IDS).map_err(|_| StatefulError::MissingPort {
        name: INPUT_IDS.to_string(),
    })?;
    let input_shape = rewriter
        .spec_of(input_ids)
        .map(|spec| spec.shape.clone())
        .unwrap_or_else(Shape::scalar);
    let batch = input_shape
        .dim(0)
        .cloned()
        .ok_or_else(|| StatefulError::AxisOutOfRange {
            port: INPUT_IDS.to_string(),
            axis: 0,
            rank: input_shape.rank(),
        })?;

    let mut caches: Vec<(&str, ValueId, TensorSpec)> =
        Vec::with_capacity(key_value_input_names.len());
    for name in key_value_input_names {
        let name = name.as_ref();
        let param = rewriter
            .input(name)
            .map_err(|_| StatefulError::MissingPort {
                name: name.to_string(),
            })?;
        let Some(spec) = rewriter.spec_of(param).cloned() else {
            return Err(StatefulError::MissingPort {
                name: name.to_string(),
            });
        };
        if gather_dim >= spec.shape.rank() {
            return Err(StatefulError::AxisOutOfRange {
                port: name.to_string(),
                axis: gather_dim,
                rank: spec.shape.rank(),
            });
        }
        caches.push((name, param, spec));
    }

    let beam_idx = rewriter.add_parameter(
        BTreeSet::from([BEAM_IDX.to_string()]),
        TensorSpec::new(DType::Si32, Shape::new(vec![batch.clone()])),
    );
    not_kv_inputs.push(beam_idx);

    for (name, param, mut spec) in caches {
        let consumers = rewriter.consumers_of(param);
        spec.shape.set_dim(gather_dim, batch.clone());
        let gather = rewriter.insert_node(
            InsertPoint::Front,
            Operation::Gather(GatherSpec {
                axis: gather_dim as isize,
            }),
            vec![Operand::Value(param), Operand::Value(beam_idx)],
            spec,
        )?;
        for consumer in &consumers {
            rewriter.redirect(*consumer, param, gather)?;
        }
        debug!(
            "fused beam reorder for `{name}`: gather axis {gather_dim}, {} consumer(s) redirected",
            consumers.len()
        );
    }

    validate_nodes_and_infer_types(&mut *rewriter.graph)?;
    Ok(())
}
