use log::debug;

use crate::graph::{
    validate_nodes_and_infer_types, ConcatSpec, DType, Dimension, GatherSpec, Graph,
    GraphRewriter, InsertPoint, Operand, Operation, Shape, ShapeOfSpec, TensorLiteral,
    TensorSpec, ValueId,
};
use crate::stateful::error::StatefulError;
use crate::stateful::query::INPUT_IDS;

/// Gives every `read_value` a zero initializer shaped after the live batch of `input_ids`.
///
/// The initializer is `broadcast(0, concat(dims))` where axis `batch_dim` is
/// `shape_of(input_ids)[0]` and every other axis is its static extent, or the declared
/// minimum length for dynamic axes.
pub fn build_state_initializer(graph: &mut Graph, batch_dim: usize) -> Result<(), StatefulError> {
    let reads = graph
        .read_values()
        .map(|node| (node.id, node.output.clone()))
        .collect::<Vec<(ValueId, TensorSpec)>>();
    if reads.is_empty() {
        return Ok(());
    }
    for (id, spec) in &reads {
        if batch_dim >= spec.shape.rank() {
            let port = graph
                .node(*id)
                .and_then(|node| node.names.iter().next().cloned())
                .unwrap_or_else(|| format!("%{}", id.0));
            return Err(StatefulError::AxisOutOfRange {
                port,
                axis: batch_dim,
                rank: spec.shape.rank(),
            });
        }
    }

    let mut rewriter = GraphRewriter::new(graph)?;
    let input_ids = rewriter.input(INPUT_IDS).map_err(|_| StatefulError::MissingPort {
        name: INPUT_IDS.to_string(),
    })?;
    let input_rank = rewriter
        .spec_of(input_ids)
        .map_or(0, |spec| spec.shape.rank());

    let shape = rewriter.insert_node(
        InsertPoint::Front,
        Operation::ShapeOf(ShapeOfSpec { dtype: DType::Si64 }),
        vec![Operand::Value(input_ids)],
        TensorSpec::new(DType::Si64, Shape::new(vec![Dimension::Static(input_rank)])),
    )?;
    let batch = rewriter.insert_node(
        InsertPoint::After(shape),
        Operation::Gather(GatherSpec { axis: 0 }),
        vec![
            Operand::Value(shape),
            Operand::Literal(TensorLiteral::vector_i64(&[0])),
        ],
        TensorSpec::new(DType::Si64, Shape::new(vec![Dimension::Static(1)])),
    )?;

    for (read, spec) in reads {
        let dims = spec
            .shape
            .dims()
            .iter()
            .enumerate()
            .map(|(axis, dim)| {
                if axis == batch_dim {
                    Operand::Value(batch)
                } else {
                    Operand::Literal(TensorLiteral::vector_i64(&[dim.min_length() as i64]))
                }
            })
            .collect::<Vec<_>>();
        let rank = dims.len();
        let target = rewriter.insert_node(
            InsertPoint::Before(read),
            Operation::Concat(ConcatSpec { axis: 0 }),
            dims,
            TensorSpec::new(DType::Si64, Shape::new(vec![Dimension::Static(rank)])),
        )?;
        let zeros = rewriter.insert_node(
            InsertPoint::Before(read),
            Operation::Broadcast,
            vec![
                Operand::Literal(TensorLiteral::zero_scalar(spec.dtype)),
                Operand::Value(target),
            ],
            spec.clone(),
        )?;
        rewriter.set_operands(read, vec![Operand::Value(zeros)])?;
        debug!("state read %{} initialized with zeros of {}", read.0, spec);
    }

    validate_nodes_and_infer_types(&mut *rewriter.graph)?;
    Ok(())
}
