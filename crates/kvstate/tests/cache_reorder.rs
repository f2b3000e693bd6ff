mod graph_support;

use graph_support::{
    decoder_graph, decoder_graph_with_layout, input_shape, kv_input_name, kv_names, producer,
    value_operands, Layout,
};
use kvstate::graph::{DType, Dimension, GatherSpec, GraphIndex, Operation};
use kvstate::stateful::{BEAM_IDX, INPUT_IDS};
use kvstate::{fuse_cache_reorder, NonKvInputs, StatefulError};

#[test]
fn adds_beam_idx_sized_by_batch() {
    let mut graph = decoder_graph(2);
    let (kv_in, _) = kv_names(2);
    let mut not_kv = NonKvInputs::partition(&graph, &kv_in);
    let before = not_kv.len();

    fuse_cache_reorder(&mut graph, &mut not_kv, &kv_in, 0).expect("fuse");

    let beam = graph.input(BEAM_IDX).expect("beam_idx");
    assert_eq!(beam.spec.dtype, DType::Si32);
    assert_eq!(beam.spec.shape.rank(), 1);
    assert_eq!(
        beam.spec.shape.dim(0),
        input_shape(&graph, INPUT_IDS).dim(0)
    );
    assert_eq!(not_kv.len(), before + 1);
    assert!(not_kv.contains(beam.id));
}

#[test]
fn every_cache_consumer_reads_a_gather() {
    let mut graph = decoder_graph(3);
    let (kv_in, _) = kv_names(3);
    let mut not_kv = NonKvInputs::partition(&graph, &kv_in);
    fuse_cache_reorder(&mut graph, &mut not_kv, &kv_in, 0).expect("fuse");

    let index = GraphIndex::build(&graph).expect("index");
    let beam = graph.input(BEAM_IDX).expect("beam_idx").id;
    for name in &kv_in {
        let past = graph.input(name).expect("cache input").id;
        let consumers = index.consumers_of(past);
        assert_eq!(consumers.len(), 1, "`{name}` should only feed its gather");

        let gather = graph
            .body
            .iter()
            .find(|node| node.operands.first().and_then(|op| op.value()) == Some(past))
            .expect("gather node");
        assert_eq!(gather.op, Operation::Gather(GatherSpec { axis: 0 }));
        assert_eq!(value_operands(&graph, gather.id), vec![past, beam]);
        assert_eq!(index.consumers_of(gather.id).len(), 2);
    }
}

#[test]
fn chatglm_layout_gathers_second_axis() {
    let mut graph = decoder_graph_with_layout(1, Layout::BatchSecond);
    let (kv_in, _) = kv_names(1);
    let mut not_kv = NonKvInputs::partition(&graph, &kv_in);
    fuse_cache_reorder(&mut graph, &mut not_kv, &kv_in, 1).expect("fuse");

    let past = graph.input(&kv_input_name(0)).expect("cache input").id;
    let gather = graph
        .body
        .iter()
        .find(|node| matches!(node.op, Operation::Gather(_)))
        .expect("gather node");
    assert_eq!(gather.op, Operation::Gather(GatherSpec { axis: 1 }));
    assert_eq!(value_operands(&graph, gather.id)[0], past);
    assert_eq!(gather.output.shape.dim(1), Some(&Dimension::dynamic("batch")));
    assert!(matches!(producer(&graph, gather.id), Some(Operation::Gather(_))));
}

#[test]
#[should_panic(expected = "beam_idx")]
fn second_fusion_panics() {
    let mut graph = decoder_graph(1);
    let (kv_in, _) = kv_names(1);
    let mut not_kv = NonKvInputs::partition(&graph, &kv_in);
    fuse_cache_reorder(&mut graph, &mut not_kv, &kv_in, 0).expect("first fuse");
    let _ = fuse_cache_reorder(&mut graph, &mut not_kv, &kv_in, 0);
}

#[test]
fn out_of_range_gather_axis_fails_before_mutation() {
    let mut graph = decoder_graph(1);
    let before = graph.clone();
    let (kv_in, _) = kv_names(1);
    let mut not_kv = NonKvInputs::partition(&graph, &kv_in);

    let err = fuse_cache_reorder(&mut graph, &mut not_kv, &kv_in, 4).expect_err("axis 4");
    assert_eq!(
        err,
        StatefulError::AxisOutOfRange {
            port: kv_input_name(0),
            axis: 4,
            rank: 4,
        }
    );
    assert_eq!(graph, before);

    let err = fuse_cache_reorder(&mut graph, &mut not_kv, &["past.missing"], 0)
        .expect_err("unknown cache input");
    assert!(matches!(err, StatefulError::MissingPort { .. }));
    assert_eq!(graph, before);
}
