use log::{debug, info};

use crate::env;
use crate::graph::{EngineCapabilities, EngineVersion, Graph};
use crate::stateful::error::StatefulError;
use crate::stateful::inputs::NonKvInputs;
use crate::stateful::reorder::fuse_cache_reorder;
use crate::stateful::transform::{make_stateful, pair_names, StatefulReport};

/// Release recommended to callers whose engine cannot run stateful graphs.
pub const MIN_ENGINE_VERSION: EngineVersion = EngineVersion::new(2023, 3, 0);

/// Newest release without stateful graph support. Anything above it passes the gate.
pub const LAST_UNSUPPORTED_ENGINE_VERSION: EngineVersion = EngineVersion::new(2023, 2, 0);

const FIRST_SUPPORTED_ENGINE_VERSION: EngineVersion = EngineVersion::new(2023, 2, 1);

/// Fails when `engine` is at or below [`LAST_UNSUPPORTED_ENGINE_VERSION`].
pub fn ensure_stateful_is_available<E>(engine: &E) -> Result<(), StatefulError>
where
    E: EngineCapabilities + ?Sized,
{
    if engine.is_engine_at_least(&FIRST_SUPPORTED_ENGINE_VERSION) {
        Ok(())
    } else {
        Err(StatefulError::UnsupportedEngineVersion {
            detected: engine.version().to_string(),
            minimum: MIN_ENGINE_VERSION,
        })
    }
}

/// Where a model family keeps the batch in its cache tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayout {
    Standard,
    /// `chatglm`: caches are `[seq, batch, ...]`.
    BatchOnSecondAxis,
    /// `bloom`: caches fold the heads into the batch axis.
    HeadsFoldedIntoBatch { num_attention_heads: usize },
}

impl CacheLayout {
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        match metadata.model_type.as_str() {
            "chatglm" => CacheLayout::BatchOnSecondAxis,
            "bloom" => CacheLayout::HeadsFoldedIntoBatch {
                num_attention_heads: metadata.num_attention_heads.unwrap_or(1),
            },
            _ => CacheLayout::Standard,
        }
    }

    pub fn batch_dim(&self) -> usize {
        match self {
            CacheLayout::BatchOnSecondAxis => 1,
            CacheLayout::Standard | CacheLayout::HeadsFoldedIntoBatch { .. } => 0,
        }
    }

    /// Factor between the model batch and the batch axis of a cache tensor.
    pub fn num_attention_heads(&self) -> usize {
        match self {
            CacheLayout::HeadsFoldedIntoBatch {
                num_attention_heads,
            } => *num_attention_heads,
            CacheLayout::Standard | CacheLayout::BatchOnSecondAxis => 1,
        }
    }
}

/// Names of the cache ports of a graph, paired by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvPortNames {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl KvPortNames {
    /// Collects inputs named like `*key_values*` and outputs named like `*present*`, in graph
    /// order.
    pub fn discover(graph: &Graph) -> Self {
        let inputs = graph
            .parameters
            .iter()
            .filter_map(|param| {
                param
                    .names
                    .iter()
                    .find(|name| name.contains("key_values"))
                    .cloned()
            })
            .collect();
        let outputs = graph
            .results
            .iter()
            .filter_map(|value| {
                graph
                    .names_of(*value)
                    .and_then(|names| names.iter().find(|name| name.contains("present")))
                    .cloned()
            })
            .collect();
        Self { inputs, outputs }
    }
}

/// What the rewrite needs to know about the exported model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelMetadata {
    pub model_type: String,
    pub key_value_input_names: Vec<String>,
    pub key_value_output_names: Vec<String>,
    pub num_attention_heads: Option<usize>,
}

impl ModelMetadata {
    pub fn new<I, O>(model_type: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            model_type: model_type.into(),
            key_value_input_names: inputs.into_iter().map(Into::into).collect(),
            key_value_output_names: outputs.into_iter().map(Into::into).collect(),
            num_attention_heads: None,
        }
    }

    /// Metadata whose cache names come from [`KvPortNames::discover`].
    pub fn from_graph(model_type: impl Into<String>, graph: &Graph) -> Self {
        let names = KvPortNames::discover(graph);
        Self::new(model_type, names.inputs, names.outputs)
    }

    pub fn with_num_attention_heads(mut self, num_attention_heads: usize) -> Self {
        self.num_attention_heads = Some(num_attention_heads);
        self
    }
}

/// Knobs for [`patch_stateful_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatefulConfig {
    /// Add `beam_idx` and gather every cache input by it.
    pub fuse_beam_reorder: bool,
    /// Pin the batch to a static size instead of building zero initializers.
    pub num_beams_and_batch: Option<usize>,
    /// Log the text form of the graph before and after the rewrite.
    pub dump_graph: bool,
}

impl Default for StatefulConfig {
    fn default() -> Self {
        Self {
            fuse_beam_reorder: true,
            num_beams_and_batch: None,
            dump_graph: env::dump_graph_enabled(),
        }
    }
}

/// Makes the cache of `graph` stateful with the default [`StatefulConfig`].
pub fn patch_stateful<E>(
    graph: &mut Graph,
    engine: &E,
    metadata: &ModelMetadata,
) -> Result<StatefulReport, StatefulError>
where
    E: EngineCapabilities + ?Sized,
{
    patch_stateful_with(graph, engine, metadata, &StatefulConfig::default())
}

/// Makes the cache of `graph` stateful.
///
/// The engine version and the cache name lists are checked before the graph is touched. A
/// model without cache names is returned as is with an empty report.
pub fn patch_stateful_with<E>(
    graph: &mut Graph,
    engine: &E,
    metadata: &ModelMetadata,
    config: &StatefulConfig,
) -> Result<StatefulReport, StatefulError>
where
    E: EngineCapabilities + ?Sized,
{
    ensure_stateful_is_available(engine)?;

    let kv_in = &metadata.key_value_input_names;
    let kv_out = &metadata.key_value_output_names;
    pair_names(kv_in, kv_out)?;
    if kv_in.is_empty() {
        info!(
            "graph `{}` has no key/value cache ports; nothing to make stateful",
            graph.name
        );
        return Ok(StatefulReport::default());
    }

    let layout = CacheLayout::from_metadata(metadata);
    info!(
        "making {} cache pair(s) of `{}` stateful ({:?}, engine {})",
        kv_in.len(),
        graph.name,
        layout,
        engine.version()
    );
    if config.dump_graph {
        debug!("graph before stateful rewrite:\n{graph}");
    }

    let mut not_kv_inputs = NonKvInputs::partition(graph, kv_in);
    if config.fuse_beam_reorder {
        fuse_cache_reorder(graph, &mut not_kv_inputs, kv_in, layout.batch_dim())?;
    }
    let mut report = make_stateful(
        graph,
        &not_kv_inputs,
        kv_in,
        kv_out,
        layout.batch_dim(),
        layout.num_attention_heads(),
        config.num_beams_and_batch,
    )?;
    report.beam_reorder_fused = config.fuse_beam_reorder;

    if config.dump_graph {
        debug!("graph after stateful rewrite:\n{graph}");
    }
    info!(
        "`{}` is stateful: {} variable(s), {} diagnostic(s)",
        graph.name,
        report.variables.len(),
        report.diagnostics.len()
    );
    Ok(report)
}
