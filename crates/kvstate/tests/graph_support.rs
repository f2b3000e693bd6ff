#![allow(dead_code)]

use kvstate::graph::{
    CastSpec, DType, Dimension, ElementwiseBinaryOp, Graph, GraphBuilder, Operand, Operation,
    Shape, TensorLiteral, TensorSpec, ValueId,
};

/// Where the batch sits in the cache tensors of a generated decoder.
#[derive(Debug, Clone, Copy)]
pub enum Layout {
    /// `[batch, heads, past, head_dim]`
    BatchFirst,
    /// `[past, batch, heads, head_dim]`
    BatchSecond,
}

pub fn kv_input_name(pair: usize) -> String {
    format!("past_key_values.{}.{}", pair / 2, kind(pair))
}

pub fn kv_output_name(pair: usize) -> String {
    format!("present.{}.{}", pair / 2, kind(pair))
}

fn kind(pair: usize) -> &'static str {
    if pair % 2 == 0 {
        "key"
    } else {
        "value"
    }
}

pub fn kv_names(pairs: usize) -> (Vec<String>, Vec<String>) {
    (
        (0..pairs).map(kv_input_name).collect(),
        (0..pairs).map(kv_output_name).collect(),
    )
}

fn batch() -> Dimension {
    Dimension::dynamic("batch")
}

fn cache_spec(layout: Layout) -> TensorSpec {
    let dims = match layout {
        Layout::BatchFirst => vec![
            batch(),
            Dimension::Static(2),
            Dimension::dynamic("past"),
            Dimension::Static(4),
        ],
        Layout::BatchSecond => vec![
            Dimension::dynamic("past"),
            batch(),
            Dimension::Static(2),
            Dimension::Static(4),
        ],
    };
    TensorSpec::new(DType::F32, Shape::new(dims))
}

/// Decoder step with `input_ids`, `attention_mask` and `pairs` cache inputs.
///
/// Each cache input feeds two nodes (`present = past * 2 + past`), so redirecting its uses
/// touches more than one edge. Outputs are `logits` followed by the `present.*` tensors.
pub fn decoder_graph(pairs: usize) -> Graph {
    decoder_graph_with_layout(pairs, Layout::BatchFirst)
}

pub fn decoder_graph_with_layout(pairs: usize, layout: Layout) -> Graph {
    let mut builder = GraphBuilder::new();
    let input_ids = builder.add_parameter(
        "input_ids",
        TensorSpec::new(
            DType::Si64,
            Shape::new(vec![batch(), Dimension::dynamic("seq")]),
        ),
    );
    builder.add_parameter(
        "attention_mask",
        TensorSpec::new(
            DType::Si64,
            Shape::new(vec![batch(), Dimension::dynamic("total")]),
        ),
    );
    let caches = (0..pairs)
        .map(|pair| builder.add_parameter(kv_input_name(pair), cache_spec(layout)))
        .collect::<Vec<ValueId>>();

    let logits = builder
        .emit(
            Operation::Cast(CastSpec { dtype: DType::F32 }),
            vec![Operand::Value(input_ids)],
        )
        .expect("cast input_ids");
    builder.name_value(logits, "logits");

    let mut results = vec![logits];
    for (pair, past) in caches.into_iter().enumerate() {
        let scaled = builder
            .emit(
                Operation::ElementwiseBinary(ElementwiseBinaryOp::Mul),
                vec![
                    Operand::Value(past),
                    Operand::Literal(TensorLiteral::scalar_f32(2.0)),
                ],
            )
            .expect("scale cache");
        let present = builder
            .emit(
                Operation::ElementwiseBinary(ElementwiseBinaryOp::Add),
                vec![Operand::Value(scaled), Operand::Value(past)],
            )
            .expect("update cache");
        builder.name_value(present, kv_output_name(pair));
        results.push(present);
    }
    builder.finish("decoder", results).expect("decoder graph")
}

/// Adds an extra rank-3 input (`position_embeds`) that the batch pinning cannot handle.
pub fn decoder_graph_with_rank3_input(pairs: usize) -> Graph {
    let mut graph = decoder_graph(pairs);
    let id = graph.next_value_id();
    graph.parameters.push(kvstate::graph::Parameter {
        id,
        names: ["position_embeds".to_string()].into_iter().collect(),
        spec: TensorSpec::new(
            DType::F32,
            Shape::new(vec![batch(), Dimension::dynamic("seq"), Dimension::Static(8)]),
        ),
    });
    graph
}

pub fn input_shape(graph: &Graph, name: &str) -> Shape {
    graph
        .input(name)
        .unwrap_or_else(|| panic!("missing input `{name}`"))
        .spec
        .shape
        .clone()
}

/// Operation of the node producing `value`, if a node produces it.
pub fn producer(graph: &Graph, value: ValueId) -> Option<&Operation> {
    graph.node(value).map(|node| &node.op)
}

/// Value operands of the node producing `value`.
pub fn value_operands(graph: &Graph, value: ValueId) -> Vec<ValueId> {
    graph
        .node(value)
        .map(|node| node.operands.iter().filter_map(|op| op.value()).collect())
        .unwrap_or_default()
}
