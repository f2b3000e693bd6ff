//! Human-readable dump of a graph, one line per port or node.

use std::collections::BTreeSet;
use std::fmt;

use crate::graph::spec::{Graph, Node, Operand, Operation};

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, 0, &format!("graph @{} {{", self.name))?;
        for variable in &self.variables {
            write_line(
                f,
                1,
                &format!("variable \"{}\": {}", variable.id, variable.spec),
            )?;
        }
        for param in &self.parameters {
            write_line(
                f,
                1,
                &format!(
                    "input %{}{}: {}",
                    param.id.0,
                    format_names(&param.names),
                    param.spec
                ),
            )?;
        }
        for node in &self.body {
            fmt_node(node, f)?;
        }
        let results = self
            .results
            .iter()
            .map(|id| format!("%{}", id.0))
            .collect::<Vec<_>>();
        write_line(f, 1, &format!("return {}", results.join(", ")))?;
        if !self.sinks.is_empty() {
            let sinks = self
                .sinks
                .iter()
                .map(|id| format!("%{}", id.0))
                .collect::<Vec<_>>();
            write_line(f, 1, &format!("sinks {}", sinks.join(", ")))?;
        }
        write_line(f, 0, "}")
    }
}

fn fmt_node(node: &Node, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let operands = node
        .operands
        .iter()
        .map(format_operand)
        .collect::<Vec<_>>()
        .join(", ");
    let op = match &node.op {
        Operation::Constant(literal) => format!("constant<{}>", literal.spec),
        Operation::ElementwiseBinary(kind) => format!("{kind:?}").to_lowercase(),
        Operation::Cast(spec) => format!("cast<{:?}>", spec.dtype),
        Operation::Concat(spec) => format!("concat<axis={}>", spec.axis),
        Operation::Gather(spec) => format!("gather<axis={}>", spec.axis),
        Operation::ShapeOf(spec) => format!("shape_of<{:?}>", spec.dtype),
        Operation::Broadcast => "broadcast".to_string(),
        Operation::ReadValue(id) => format!("read_value<\"{id}\">"),
        Operation::Assign(id) => format!("assign<\"{id}\">"),
    };
    write_line(
        f,
        1,
        &format!(
            "%{}{} = {op}({operands}) -> {}",
            node.id.0,
            format_names(&node.names),
            node.output
        ),
    )
}

fn format_names(names: &BTreeSet<String>) -> String {
    if names.is_empty() {
        return String::new();
    }
    let names = names.iter().map(String::as_str).collect::<Vec<_>>();
    format!(" {{{}}}", names.join(", "))
}

fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::Value(id) => format!("%{}", id.0),
        Operand::Literal(literal) => match literal.to_i64_vec() {
            Some(values) if values.len() <= 8 => format!("{values:?}"),
            _ => format!("literal({})", literal.spec),
        },
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "{line}")
}
