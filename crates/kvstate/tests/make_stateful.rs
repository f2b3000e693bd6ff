mod graph_support;

use graph_support::{
    decoder_graph, decoder_graph_with_rank3_input, input_shape, kv_input_name, kv_names,
};
use kvstate::graph::{variable_id_for, Dimension, GraphError, Operation};
use kvstate::stateful::{BEAM_IDX, INPUT_IDS};
use kvstate::{fuse_cache_reorder, make_stateful, Diagnostic, NonKvInputs, StatefulError};

#[test]
fn dynamic_batch_removes_cache_ports_and_builds_initializers() {
    let mut graph = decoder_graph(2);
    let (kv_in, kv_out) = kv_names(2);
    let not_kv = NonKvInputs::partition(&graph, &kv_in);
    let inputs = graph.parameters.len();
    let outputs = graph.results.len();

    let report =
        make_stateful(&mut graph, &not_kv, &kv_in, &kv_out, 0, 1, None).expect("make stateful");

    assert_eq!(graph.parameters.len(), inputs - 2);
    assert_eq!(graph.results.len(), outputs - 2);
    assert_eq!(graph.variables.len(), 2);
    assert_eq!(graph.sinks.len(), 2);
    assert_eq!(
        report.variables,
        vec![
            variable_id_for(&kv_in[0], &kv_out[0]),
            variable_id_for(&kv_in[1], &kv_out[1]),
        ]
    );
    assert!(report.diagnostics.is_empty());
    assert!(!report.beam_reorder_fused);
    assert!(graph.read_values().all(|read| read.operands.len() == 1));
}

#[test]
fn pinned_batch_fixes_non_cache_and_cache_axes() {
    let mut graph = decoder_graph(1);
    let (kv_in, kv_out) = kv_names(1);
    let mut not_kv = NonKvInputs::partition(&graph, &kv_in);
    fuse_cache_reorder(&mut graph, &mut not_kv, &kv_in, 0).expect("fuse");

    let report = make_stateful(&mut graph, &not_kv, &kv_in, &kv_out, 0, 1, Some(4))
        .expect("make stateful");
    assert!(report.diagnostics.is_empty());

    for name in [INPUT_IDS, "attention_mask", BEAM_IDX] {
        assert_eq!(
            input_shape(&graph, name).dim(0),
            Some(&Dimension::Static(4)),
            "{name}"
        );
    }
    assert_eq!(
        input_shape(&graph, INPUT_IDS).dim(1),
        Some(&Dimension::dynamic("seq"))
    );

    let variable = &graph.variables[0];
    assert_eq!(variable.spec.shape.dim(0), Some(&Dimension::Static(4)));
    assert_eq!(variable.spec.shape.dim(2), Some(&Dimension::dynamic("past")));
    assert!(graph.read_values().all(|read| read.operands.is_empty()));
    assert!(!graph
        .body
        .iter()
        .any(|node| matches!(node.op, Operation::ShapeOf(_))));
}

#[test]
fn pinned_batch_multiplies_heads_into_cache_batch() {
    let mut graph = decoder_graph(2);
    let (kv_in, kv_out) = kv_names(2);
    let not_kv = NonKvInputs::partition(&graph, &kv_in);

    make_stateful(&mut graph, &not_kv, &kv_in, &kv_out, 0, 8, Some(2)).expect("make stateful");

    assert_eq!(
        input_shape(&graph, INPUT_IDS).dim(0),
        Some(&Dimension::Static(2))
    );
    for variable in &graph.variables {
        assert_eq!(variable.spec.shape.dim(0), Some(&Dimension::Static(16)));
    }
    assert!(graph.read_values().all(|read| read.operands.is_empty()));
}

#[test]
fn rank3_input_is_reported_and_left_unchanged() {
    let mut graph = decoder_graph_with_rank3_input(1);
    let (kv_in, kv_out) = kv_names(1);
    let not_kv = NonKvInputs::partition(&graph, &kv_in);
    let embeds = input_shape(&graph, "position_embeds");

    let report = make_stateful(&mut graph, &not_kv, &kv_in, &kv_out, 0, 1, Some(3))
        .expect("rank diagnostics are not fatal");

    assert_eq!(input_shape(&graph, "position_embeds"), embeds);
    assert_eq!(
        report.diagnostics,
        vec![Diagnostic::BatchNotPinned {
            input: "position_embeds".to_string(),
            rank: 3,
        }]
    );
    assert_eq!(
        input_shape(&graph, INPUT_IDS).dim(0),
        Some(&Dimension::Static(3))
    );
}

#[test]
fn unequal_name_lists_fail_before_mutation() {
    let mut graph = decoder_graph(2);
    let before = graph.clone();
    let (kv_in, kv_out) = kv_names(2);
    let not_kv = NonKvInputs::partition(&graph, &kv_in);

    let err = make_stateful(&mut graph, &not_kv, &kv_in, &kv_out[..1], 0, 1, None)
        .expect_err("length mismatch");
    assert_eq!(
        err,
        StatefulError::KvNamesMismatch {
            inputs: 2,
            outputs: 1
        }
    );
    assert_eq!(graph, before);
}

#[test]
fn pinned_batch_axis_is_checked_before_mutation() {
    let mut graph = decoder_graph(1);
    let before = graph.clone();
    let (kv_in, kv_out) = kv_names(1);
    let not_kv = NonKvInputs::partition(&graph, &kv_in);

    let err = make_stateful(&mut graph, &not_kv, &kv_in, &kv_out, 5, 1, Some(2))
        .expect_err("axis 5");
    assert_eq!(
        err,
        StatefulError::AxisOutOfRange {
            port: kv_input_name(0),
            axis: 5,
            rank: 4,
        }
    );
    assert_eq!(graph, before);
}

#[test]
fn cache_batch_overflow_fails_before_mutation() {
    let mut graph = decoder_graph(1);
    let before = graph.clone();
    let (kv_in, kv_out) = kv_names(1);
    let not_kv = NonKvInputs::partition(&graph, &kv_in);

    let err = make_stateful(&mut graph, &not_kv, &kv_in, &kv_out, 0, 2, Some(usize::MAX))
        .expect_err("overflow");
    assert_eq!(
        err,
        StatefulError::BatchOverflow {
            batch: usize::MAX,
            num_attention_heads: 2,
        }
    );
    assert_eq!(graph, before);
}

#[test]
fn folded_heads_with_pinned_batch_reject_fused_reorder() {
    let mut graph = decoder_graph(1);
    let (kv_in, kv_out) = kv_names(1);
    let mut not_kv = NonKvInputs::partition(&graph, &kv_in);
    fuse_cache_reorder(&mut graph, &mut not_kv, &kv_in, 0).expect("fuse");

    let err = make_stateful(&mut graph, &not_kv, &kv_in, &kv_out, 0, 8, Some(2))
        .expect_err("gathered cache is narrower than its state");
    assert!(
        matches!(
            err,
            StatefulError::Graph(GraphError::Inference { op: "assign", .. })
        ),
        "unexpected error: {err}"
    );
}
