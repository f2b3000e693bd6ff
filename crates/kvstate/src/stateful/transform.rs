use log::{debug, warn};

use crate::graph::{
    apply_make_stateful, validate_nodes_and_infer_types, Dimension, Graph, GraphError,
    VariableId,
};
use crate::stateful::error::{Diagnostic, StatefulError};
use crate::stateful::initializer::build_state_initializer;
use crate::stateful::inputs::NonKvInputs;

/// Outcome of a stateful rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatefulReport {
    /// Whether a `beam_idx` input and cache gathers were added.
    pub beam_reorder_fused: bool,
    /// Variables created, one per key/value pair, in name-list order.
    pub variables: Vec<VariableId>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Pairs input and output names by position, rejecting lists of unequal length.
pub(crate) fn pair_names<S: AsRef<str>, T: AsRef<str>>(
    key_value_input_names: &[S],
    key_value_output_names: &[T],
) -> Result<Vec<(String, String)>, StatefulError> {
    if key_value_input_names.len() != key_value_output_names.len() {
        return Err(StatefulError::KvNamesMismatch {
            inputs: key_value_input_names.len(),
            outputs: key_value_output_names.len(),
        });
    }
    Ok(key_value_input_names
        .iter()
        .zip(key_value_output_names)
        .map(|(input, output)| (input.as_ref().to_string(), output.as_ref().to_string()))
        .collect())
}

/// Hides key/value inputs and outputs inside the graph as variables.
///
/// With `num_beams_and_batch` set, the batch axis is pinned first: axis 0 of every non-cache
/// input of rank 1 or 2 becomes `num_beams_and_batch`, and axis `batch_dim` of every cache
/// input becomes `num_beams_and_batch * num_attention_heads`. Inputs of any other rank keep
/// their shape and are reported as [`Diagnostic::BatchNotPinned`]. Without it the batch stays
/// dynamic and each state gets a zero initializer from [`build_state_initializer`].
///
/// With `num_attention_heads > 1` and a pinned batch, the cache inputs must not have been
/// through [`fuse_cache_reorder`](super::fuse_cache_reorder): the reordered cache has extent
/// `num_beams_and_batch` on `batch_dim` while its state holds
/// `num_beams_and_batch * num_attention_heads`, and the final re-inference rejects the
/// `assign` with [`GraphError::Inference`].
pub fn make_stateful<S: AsRef<str>, T: AsRef<str>>(
    graph: &mut Graph,
    not_kv_inputs: &NonKvInputs,
    key_value_input_names: &[S],
    key_value_output_names: &[T],
    batch_dim: usize,
    num_attention_heads: usize,
    num_beams_and_batch: Option<usize>,
) -> Result<StatefulReport, StatefulError> {
    let pairs = pair_names(key_value_input_names, key_value_output_names)?;
    let mut report = StatefulReport::default();

    if let Some(batch) = num_beams_and_batch {
        let cache_batch = batch
            .checked_mul(num_attention_heads)
            .ok_or(StatefulError::BatchOverflow {
                batch,
                num_attention_heads,
            })?;
        for (input, _) in &pairs {
            let param = graph.input(input).ok_or_else(|| StatefulError::MissingPort {
                name: input.clone(),
            })?;
            let rank = param.spec.shape.rank();
            if batch_dim >= rank {
                return Err(StatefulError::AxisOutOfRange {
                    port: input.clone(),
                    axis: batch_dim,
                    rank,
                });
            }
        }

        for port in not_kv_inputs.ports() {
            let param = graph
                .parameter_mut(*port)
                .ok_or(GraphError::MissingValueDefinition { value: *port })?;
            let rank = param.spec.shape.rank();
            if (1..=2).contains(&rank) {
                param.spec.shape.set_dim(0, Dimension::Static(batch));
            } else {
                let diagnostic = Diagnostic::BatchNotPinned {
                    input: param
                        .any_name()
                        .map_or_else(|| format!("%{}", port.0), str::to_string),
                    rank,
                };
                warn!("{diagnostic}");
                report.diagnostics.push(diagnostic);
            }
        }

        for (input, _) in &pairs {
            if let Some(param) = graph.input_mut(input) {
                param
                    .spec
                    .shape
                    .set_dim(batch_dim, Dimension::Static(cache_batch));
            }
        }
        debug!(
            "pinned batch to {batch} ({cache_batch} on axis {batch_dim} of {} cache input(s))",
            pairs.len()
        );
        validate_nodes_and_infer_types(graph)?;
    }

    report.variables = apply_make_stateful(graph, &pairs)?;

    if num_beams_and_batch.is_none() {
        build_state_initializer(graph, batch_dim)?;
    }
    Ok(report)
}
