//! A stack of identical topological layers followed by one linear read-out
//! per output rank.
//!
//! ```text
//! signals ──► layer_0 ──► layer_1 ──► … ──► layer_{n-1} ──► readout_r ──► aggregation
//! ```
//!
//! Ranks a layer does not write pass through to the next layer unchanged, so
//! a heterogeneous layer (nodes + edges in, nodes + edges + faces out) can be
//! stacked on itself.

use crate::asg::DType;
use crate::error::{ConfigurationError, Result};
use crate::nn::cxn::ConvCxnLayer;
use crate::nn::hsn::HsnLayer;
use crate::nn::layer::{NeighborhoodTensors, Signals, TopologicalLayer};
use crate::nn::linear::Linear;
use crate::nn::module::Module;
use crate::nn::template::TemplateLayer;
use crate::tensor::{SharedContext, Tensor};
use crate::topology::{NeighborhoodRequest, Rank};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Compute device. Only the CPU backend exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
}

/// How per-rank read-out logits become the model prediction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutAggregation {
    /// One `(n_cells, classes)` logit matrix per read-out rank.
    #[default]
    PerRank,
    /// `Σ_r mean_cells(logits_r)`, one `(classes,)` vector.
    SumOfMeans,
    /// `Σ_r w_r · mean_cells(logits_r)`.
    WeightedSumOfMeans(BTreeMap<Rank, f32>),
}

impl ReadoutAggregation {
    pub fn is_per_rank(&self) -> bool {
        matches!(self, ReadoutAggregation::PerRank)
    }
}

/// Model-wide settings, fixed once the model is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub device: Device,
    #[serde(default = "default_dtype")]
    pub dtype: DType,
    #[serde(default)]
    pub aggregation: ReadoutAggregation,
}

fn default_dtype() -> DType {
    DType::F32
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { device: Device::Cpu, dtype: DType::F32, aggregation: ReadoutAggregation::PerRank }
    }
}

impl ModelConfig {
    pub fn with_aggregation(mut self, aggregation: ReadoutAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }
}

/// The layer repeated by [`StackedClassifier::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LayerKind {
    Hsn { channels: usize },
    ConvCxn { c0: usize, c1: usize, c2: usize },
    Template { in_channels: usize, intermediate_channels: usize, out_channels: usize },
}

impl LayerKind {
    pub fn input_channels(&self) -> BTreeMap<Rank, usize> {
        match *self {
            LayerKind::Hsn { channels } => BTreeMap::from([(0, channels)]),
            LayerKind::ConvCxn { c0, c1, .. } => BTreeMap::from([(0, c0), (1, c1)]),
            LayerKind::Template { in_channels, .. } => BTreeMap::from([(1, in_channels)]),
        }
    }

    pub fn output_channels(&self) -> BTreeMap<Rank, usize> {
        match *self {
            LayerKind::Hsn { channels } => BTreeMap::from([(0, channels)]),
            LayerKind::ConvCxn { c0, c1, c2 } => BTreeMap::from([(0, c0), (1, c1), (2, c2)]),
            LayerKind::Template { out_channels, .. } => BTreeMap::from([(1, out_channels)]),
        }
    }

    fn build(&self, context: &SharedContext, name: &str) -> Box<dyn TopologicalLayer> {
        match *self {
            LayerKind::Hsn { channels } => Box::new(HsnLayer::new(context, name, channels)),
            LayerKind::ConvCxn { c0, c1, c2 } => Box::new(ConvCxnLayer::new(context, name, c0, c1, c2)),
            LayerKind::Template { in_channels, intermediate_channels, out_channels } => {
                Box::new(TemplateLayer::new(context, name, in_channels, intermediate_channels, out_channels))
            }
        }
    }
}

/// Widths of everything that enters and leaves the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Input channel width per rank.
    pub inputs: BTreeMap<Rank, usize>,
    pub layer: LayerKind,
    /// Number of classes per read-out rank.
    pub readouts: BTreeMap<Rank, usize>,
}

/// Symbolic result of [`StackedClassifier::forward`].
#[derive(Debug, Clone)]
pub enum ModelOutput {
    PerRank(BTreeMap<Rank, Tensor>),
    Pooled(Tensor),
}

impl ModelOutput {
    /// Output tensors, in rank order for per-rank outputs.
    pub fn tensors(&self) -> Vec<Tensor> {
        match self {
            ModelOutput::PerRank(logits) => logits.values().cloned().collect(),
            ModelOutput::Pooled(t) => vec![t.clone()],
        }
    }
}

/// Checks that every layer finds the ranks and widths it expects.
///
/// `layers` holds the input and output widths of each layer in order. On
/// success returns the widths available after the last layer.
pub fn validate_stack(
    inputs: &BTreeMap<Rank, usize>,
    layers: &[(BTreeMap<Rank, usize>, BTreeMap<Rank, usize>)],
    readouts: &BTreeMap<Rank, usize>,
    config: &ModelConfig,
) -> std::result::Result<BTreeMap<Rank, usize>, ConfigurationError> {
    if layers.is_empty() {
        return Err(ConfigurationError::NoLayers);
    }
    if config.dtype != DType::F32 {
        return Err(ConfigurationError::UnsupportedDType(config.dtype));
    }
    if readouts.is_empty() {
        return Err(ConfigurationError::NoReadouts);
    }
    let widths = inputs
        .iter()
        .map(|(&r, &w)| (format!("inputs[{}]", r), w))
        .chain(layers.iter().enumerate().flat_map(|(i, (ins, outs))| {
            ins.iter().chain(outs).map(move |(&r, &w)| (format!("layer_{}[{}]", i, r), w))
        }));
    for (name, width) in widths {
        if width == 0 {
            return Err(ConfigurationError::InvalidHyperparameter {
                name,
                reason: "channel widths must be positive".to_string(),
            });
        }
    }

    let mut available = inputs.clone();
    for (layer, (layer_inputs, layer_outputs)) in layers.iter().enumerate() {
        for (&rank, &expected) in layer_inputs {
            match available.get(&rank) {
                None => return Err(ConfigurationError::MissingInputRank { layer, rank }),
                Some(&found) if found != expected => {
                    return Err(ConfigurationError::ChannelMismatch { layer, rank, expected, found })
                }
                Some(_) => {}
            }
        }
        available.extend(layer_outputs.iter().map(|(&r, &w)| (r, w)));
    }

    for (&rank, &classes) in readouts {
        if !available.contains_key(&rank) {
            return Err(ConfigurationError::MissingReadoutRank(rank));
        }
        if classes == 0 {
            return Err(ConfigurationError::InvalidHyperparameter {
                name: format!("readouts[{}]", rank),
                reason: "a read-out needs at least one class".to_string(),
            });
        }
    }

    if !config.aggregation.is_per_rank() {
        let classes: BTreeSet<usize> = readouts.values().copied().collect();
        if classes.len() > 1 {
            return Err(ConfigurationError::InvalidHyperparameter {
                name: "aggregation".to_string(),
                reason: format!("pooled read-outs must share one class count, got {:?}", readouts),
            });
        }
    }
    if let ReadoutAggregation::WeightedSumOfMeans(weights) = &config.aggregation {
        if let Some(rank) = readouts.keys().find(|r| !weights.contains_key(r)) {
            return Err(ConfigurationError::InvalidHyperparameter {
                name: "aggregation".to_string(),
                reason: format!("no weight given for read-out rank {}", rank),
            });
        }
    }

    Ok(available)
}

/// Homogeneous layer stack plus per-rank read-outs.
pub struct StackedClassifier {
    context: SharedContext,
    inputs: BTreeMap<Rank, usize>,
    layers: Vec<Box<dyn TopologicalLayer>>,
    readouts: BTreeMap<Rank, Linear>,
    config: ModelConfig,
}

impl StackedClassifier {
    /// Builds `n_layers` copies of `spec.layer`, each with its own parameters.
    ///
    /// All widths are validated before the first parameter is allocated.
    pub fn new(context: &SharedContext, spec: &ChannelSpec, n_layers: usize, config: ModelConfig) -> Result<Self> {
        let channels = vec![(spec.layer.input_channels(), spec.layer.output_channels()); n_layers];
        let available = validate_stack(&spec.inputs, &channels, &spec.readouts, &config)?;

        let layers = (0..n_layers)
            .map(|i| spec.layer.build(context, &format!("layer_{}", i)))
            .collect();
        let readouts = Self::build_readouts(context, &spec.readouts, &available);

        tracing::debug!(n_layers, readouts = ?spec.readouts, "built stacked classifier");
        Ok(Self { context: Rc::clone(context), inputs: spec.inputs.clone(), layers, readouts, config })
    }

    /// Wraps already built layers, e.g. a first layer that changes the width.
    pub fn from_layers(
        context: &SharedContext,
        inputs: BTreeMap<Rank, usize>,
        layers: Vec<Box<dyn TopologicalLayer>>,
        readouts: &BTreeMap<Rank, usize>,
        config: ModelConfig,
    ) -> Result<Self> {
        let channels: Vec<_> = layers.iter().map(|l| (l.input_channels(), l.output_channels())).collect();
        let available = validate_stack(&inputs, &channels, readouts, &config)?;
        let readouts = Self::build_readouts(context, readouts, &available);
        Ok(Self { context: Rc::clone(context), inputs, layers, readouts, config })
    }

    fn build_readouts(
        context: &SharedContext,
        readouts: &BTreeMap<Rank, usize>,
        available: &BTreeMap<Rank, usize>,
    ) -> BTreeMap<Rank, Linear> {
        readouts
            .iter()
            .filter_map(|(&rank, &classes)| {
                let width = *available.get(&rank)?;
                Some((rank, Linear::new(context, &format!("readout_{}", rank), width, classes)))
            })
            .collect()
    }

    /// Applies every layer in order, then the read-outs and the aggregation.
    pub fn forward(&self, signals: &Signals, neighborhoods: &NeighborhoodTensors) -> Result<ModelOutput> {
        for &rank in self.inputs.keys() {
            if !signals.contains_key(&rank) {
                return Err(ConfigurationError::MissingSignal(rank).into());
            }
        }

        let mut current = signals.clone();
        for layer in &self.layers {
            let written = layer.forward(&current, neighborhoods)?;
            current.extend(written);
        }

        let mut logits = BTreeMap::new();
        for (&rank, readout) in &self.readouts {
            let x = current.get(&rank).ok_or(ConfigurationError::MissingSignal(rank))?;
            logits.insert(rank, readout.forward(x));
        }

        let pooled = |weight: &dyn Fn(Rank) -> Option<f32>| -> Option<Tensor> {
            logits
                .iter()
                .map(|(&rank, l)| {
                    let classes = self.readouts.get(&rank).map_or(1, |r| r.out_features);
                    let mean = l.mean_axis(0).reshape(&[classes]);
                    match weight(rank) {
                        Some(w) => &Tensor::scalar(&self.context, w) * &mean,
                        None => mean,
                    }
                })
                .reduce(|acc, m| &acc + &m)
        };

        Ok(match &self.config.aggregation {
            ReadoutAggregation::PerRank => ModelOutput::PerRank(logits),
            ReadoutAggregation::SumOfMeans => ModelOutput::Pooled(pooled(&|_| None).ok_or(ConfigurationError::NoReadouts)?),
            ReadoutAggregation::WeightedSumOfMeans(weights) => ModelOutput::Pooled(
                pooled(&|rank| Some(weights.get(&rank).copied().unwrap_or(0.0))).ok_or(ConfigurationError::NoReadouts)?,
            ),
        })
    }

    /// Union of the neighborhoods every layer reads.
    pub fn neighborhood_requests(&self) -> Vec<NeighborhoodRequest> {
        let requests: BTreeSet<NeighborhoodRequest> = self.layers.iter().flat_map(|l| l.neighborhoods()).collect();
        requests.into_iter().collect()
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params: Vec<Tensor> = self.layers.iter().flat_map(|l| l.parameters()).collect();
        params.extend(self.readouts.values().flat_map(|r| r.parameters()));
        params
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn input_channels(&self) -> &BTreeMap<Rank, usize> {
        &self.inputs
    }

    /// Class count per read-out rank.
    pub fn readout_classes(&self) -> BTreeMap<Rank, usize> {
        self.readouts.iter().map(|(&r, l)| (r, l.out_features)).collect()
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::new_context;

    fn hsn_spec(channels: usize) -> ChannelSpec {
        ChannelSpec {
            inputs: BTreeMap::from([(0, channels)]),
            layer: LayerKind::Hsn { channels },
            readouts: BTreeMap::from([(0, 1)]),
        }
    }

    #[test]
    fn test_builds_independent_layers() {
        let ctx = new_context();
        let model = StackedClassifier::new(&ctx, &hsn_spec(2), 2, ModelConfig::default()).unwrap();
        assert_eq!(model.num_layers(), 2);
        // 4 convolutions per layer, weight + bias for the read-out
        assert_eq!(model.parameters().len(), 2 * 4 + 2);
        assert!(ctx.borrow().parameter("layer_1.conv_level1_0_to_0.weight").is_some());
        assert_eq!(ctx.borrow().parameter("readout_0.weight").unwrap().shape, vec![2, 1]);
    }

    #[test]
    fn test_mismatch_rejected_before_allocation() {
        let ctx = new_context();
        let spec = ChannelSpec {
            inputs: BTreeMap::from([(1, 4)]),
            layer: LayerKind::Template { in_channels: 4, intermediate_channels: 3, out_channels: 2 },
            readouts: BTreeMap::from([(1, 2)]),
        };
        let err = StackedClassifier::new(&ctx, &spec, 2, ModelConfig::default()).err().unwrap();
        assert!(matches!(
            err,
            crate::error::TopoError::Configuration(ConfigurationError::ChannelMismatch { layer: 1, rank: 1, expected: 4, found: 2 })
        ));
        assert!(ctx.borrow().parameters().is_empty());
    }

    #[test]
    fn test_validation_errors() {
        let cfg = ModelConfig::default();
        let inputs = BTreeMap::from([(0, 2)]);
        let hsn = (BTreeMap::from([(0, 2)]), BTreeMap::from([(0, 2)]));
        let readouts = BTreeMap::from([(0, 1)]);

        assert_eq!(validate_stack(&inputs, &[], &readouts, &cfg), Err(ConfigurationError::NoLayers));
        assert_eq!(
            validate_stack(&inputs, &[hsn.clone()], &BTreeMap::new(), &cfg),
            Err(ConfigurationError::NoReadouts)
        );
        assert_eq!(
            validate_stack(&inputs, &[hsn.clone()], &BTreeMap::from([(2, 1)]), &cfg),
            Err(ConfigurationError::MissingReadoutRank(2))
        );
        assert_eq!(
            validate_stack(&BTreeMap::from([(1, 2)]), &[hsn.clone()], &readouts, &cfg),
            Err(ConfigurationError::MissingInputRank { layer: 0, rank: 0 })
        );
        let f64_cfg = ModelConfig { dtype: DType::F64, ..ModelConfig::default() };
        assert_eq!(
            validate_stack(&inputs, &[hsn], &readouts, &f64_cfg),
            Err(ConfigurationError::UnsupportedDType(DType::F64))
        );
    }

    #[test]
    fn test_convcxn_stacks_on_itself() {
        let ctx = new_context();
        let spec = ChannelSpec {
            inputs: BTreeMap::from([(0, 6), (1, 6)]),
            layer: LayerKind::ConvCxn { c0: 6, c1: 6, c2: 6 },
            readouts: BTreeMap::from([(0, 2), (1, 2), (2, 2)]),
        };
        let model = StackedClassifier::new(&ctx, &spec, 2, ModelConfig::default().with_aggregation(ReadoutAggregation::SumOfMeans))
            .unwrap();
        let requests = model.neighborhood_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.contains(&NeighborhoodRequest::adjacency(0)));
        assert!(requests.contains(&NeighborhoodRequest::incidence(1, 2)));
    }

    #[test]
    fn test_pooled_readouts_need_equal_classes() {
        let cfg = ModelConfig::default().with_aggregation(ReadoutAggregation::SumOfMeans);
        let inputs = BTreeMap::from([(0, 2), (1, 2)]);
        let layer = (BTreeMap::from([(0, 2), (1, 2)]), BTreeMap::from([(0, 2), (1, 2), (2, 2)]));
        let err = validate_stack(&inputs, &[layer], &BTreeMap::from([(0, 2), (2, 3)]), &cfg).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidHyperparameter { .. }));
    }

    #[test]
    fn test_weighted_readouts_need_every_weight() {
        let cfg = ModelConfig::default()
            .with_aggregation(ReadoutAggregation::WeightedSumOfMeans(BTreeMap::from([(0, 1.0), (1, 0.5)])));
        let inputs = BTreeMap::from([(0, 2), (1, 2)]);
        let layer = (BTreeMap::from([(0, 2), (1, 2)]), BTreeMap::from([(0, 2), (1, 2), (2, 2)]));
        let readouts = BTreeMap::from([(0, 2), (1, 2), (2, 2)]);
        match validate_stack(&inputs, &[layer.clone()], &readouts, &cfg) {
            Err(ConfigurationError::InvalidHyperparameter { name, reason }) => {
                assert_eq!(name, "aggregation");
                assert!(reason.contains("rank 2"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
        let readouts = BTreeMap::from([(0, 2), (1, 2)]);
        assert!(validate_stack(&inputs, &[layer], &readouts, &cfg).is_ok());
    }

    #[test]
    fn test_zero_width_rejected() {
        let ctx = new_context();
        let err = StackedClassifier::new(&ctx, &hsn_spec(0), 1, ModelConfig::default()).err().unwrap();
        assert!(matches!(
            err,
            crate::error::TopoError::Configuration(ConfigurationError::InvalidHyperparameter { .. })
        ));
        assert!(ctx.borrow().parameters().is_empty());
    }

    #[test]
    fn test_missing_signal() {
        let ctx = new_context();
        let model = StackedClassifier::new(&ctx, &hsn_spec(2), 1, ModelConfig::default()).unwrap();
        let err = model.forward(&Signals::new(), &NeighborhoodTensors::new()).err().unwrap();
        assert!(matches!(err, crate::error::TopoError::Configuration(ConfigurationError::MissingSignal(0))));
    }
}
