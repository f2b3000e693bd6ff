use std::env;
use std::sync::OnceLock;

static KVSTATE_DUMP_GRAPH: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// `KVSTATE_DUMP_GRAPH`: log the text form of the graph before and after a rewrite.
pub(crate) fn dump_graph_enabled() -> bool {
    *KVSTATE_DUMP_GRAPH.get_or_init(|| match env::var("KVSTATE_DUMP_GRAPH") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value} should enable");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value} should not enable");
        }
    }
}
