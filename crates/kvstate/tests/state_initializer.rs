mod graph_support;

use graph_support::{decoder_graph, decoder_graph_with_layout, kv_names, producer, Layout};
use kvstate::graph::{
    apply_make_stateful, Dimension, GatherSpec, Graph, Operand, Operation, ShapeOfSpec,
    TensorLiteral, ValueId,
};
use kvstate::stateful::INPUT_IDS;
use kvstate::{build_state_initializer, StatefulError};

fn stateful_graph(pairs: usize, layout: Layout) -> Graph {
    let mut graph = decoder_graph_with_layout(pairs, layout);
    let (kv_in, kv_out) = kv_names(pairs);
    let mapping = kv_in.into_iter().zip(kv_out).collect::<Vec<_>>();
    apply_make_stateful(&mut graph, &mapping).expect("make stateful");
    graph
}

fn single_value(graph: &Graph, value: ValueId, index: usize) -> ValueId {
    graph.node(value).expect("node").operands[index]
        .value()
        .expect("value operand")
}

#[test]
fn initializer_is_zero_broadcast_over_live_batch() {
    let mut graph = stateful_graph(2, Layout::BatchFirst);
    build_state_initializer(&mut graph, 0).expect("initializer");

    let input_ids = graph.input(INPUT_IDS).expect("input_ids").id;
    for read in graph.read_values() {
        let zeros = read.operands[0].value().expect("initializer operand");
        let broadcast = graph.node(zeros).expect("broadcast");
        assert_eq!(broadcast.op, Operation::Broadcast);
        assert_eq!(
            broadcast.operands[0],
            Operand::Literal(TensorLiteral::zero_scalar(read.output.dtype))
        );

        let target = single_value(&graph, zeros, 1);
        let concat = graph.node(target).expect("concat");
        assert!(matches!(concat.op, Operation::Concat(_)));
        assert_eq!(concat.operands.len(), 4);
        assert_eq!(
            concat.operands[1],
            Operand::Literal(TensorLiteral::vector_i64(&[2]))
        );
        assert_eq!(
            concat.operands[2],
            Operand::Literal(TensorLiteral::vector_i64(&[0]))
        );

        let batch = concat.operands[0].value().expect("batch operand");
        assert_eq!(
            producer(&graph, batch),
            Some(&Operation::Gather(GatherSpec { axis: 0 }))
        );
        let shape = single_value(&graph, batch, 0);
        assert!(matches!(
            producer(&graph, shape),
            Some(Operation::ShapeOf(ShapeOfSpec { .. }))
        ));
        assert_eq!(single_value(&graph, shape, 0), input_ids);

        assert_eq!(
            broadcast.output.shape.dims(),
            &[
                Dimension::dynamic("batch"),
                Dimension::Static(2),
                Dimension::Static(0),
                Dimension::Static(4),
            ]
        );
    }
}

#[test]
fn batch_is_computed_once_for_all_states() {
    let mut graph = stateful_graph(4, Layout::BatchFirst);
    build_state_initializer(&mut graph, 0).expect("initializer");

    let shape_ofs = graph
        .body
        .iter()
        .filter(|node| matches!(node.op, Operation::ShapeOf(_)))
        .count();
    assert_eq!(shape_ofs, 1);
    assert_eq!(graph.read_values().count(), 4);
    assert!(graph.read_values().all(|read| read.operands.len() == 1));
}

#[test]
fn second_axis_layout_places_batch_on_axis_one() {
    let mut graph = stateful_graph(1, Layout::BatchSecond);
    build_state_initializer(&mut graph, 1).expect("initializer");

    let read = graph.read_values().next().expect("read");
    let zeros = read.operands[0].value().expect("initializer");
    let target = single_value(&graph, zeros, 1);
    let concat = graph.node(target).expect("concat");
    assert_eq!(
        concat.operands[0],
        Operand::Literal(TensorLiteral::vector_i64(&[0]))
    );
    assert!(concat.operands[1].value().is_some());
    assert_eq!(
        graph.node(zeros).expect("broadcast").output.shape.dim(1),
        Some(&Dimension::dynamic("batch"))
    );
}

#[test]
fn graph_without_state_is_left_alone() {
    let mut graph = decoder_graph(1);
    let before = graph.clone();
    build_state_initializer(&mut graph, 0).expect("no reads");
    assert_eq!(graph, before);
}

#[test]
fn batch_axis_must_exist() {
    let mut graph = stateful_graph(1, Layout::BatchFirst);
    let err = build_state_initializer(&mut graph, 7).expect_err("axis 7");
    assert!(matches!(
        err,
        StatefulError::AxisOutOfRange { axis: 7, rank: 4, .. }
    ));
}
