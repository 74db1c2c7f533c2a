//! High Skip Network layer on the nodes of a simplicial complex.
//!
//! ```text
//! level 1:  x_00 = σ(A₀ · x₀W₁)           nodes -> nodes
//!           x_01 = σ(B₁ᵀ · x₀W₂)          nodes -> edges
//! level 2:  y_00 = A₀ · x_00 W₃           nodes -> nodes
//!           y_10 = B₁ · x_01 W₄           edges -> nodes
//! out:      x₀' = σ(y_00 + y_10)
//! ```

use crate::error::Result;
use crate::nn::activations::UpdateFunction;
use crate::nn::aggregation::{Aggregation, AggregationFunction};
use crate::nn::conv::{Conv, ConvConfig};
use crate::nn::init::Initialization;
use crate::nn::layer::{neighborhood, signal, NeighborhoodTensors, Signals, TopologicalLayer};
use crate::tensor::{SharedContext, Tensor};
use crate::topology::{NeighborhoodRequest, Rank};
use std::collections::BTreeMap;

pub struct HsnLayer {
    name: String,
    channels: usize,
    conv_level1_0_to_0: Conv,
    conv_level1_0_to_1: Conv,
    conv_level2_0_to_0: Conv,
    conv_level2_1_to_0: Conv,
    aggr_on_nodes: Aggregation,
}

impl HsnLayer {
    pub fn new(context: &SharedContext, name: &str, channels: usize) -> Self {
        Self::with_initialization(context, name, channels, Initialization::XavierUniform { gain: 1.414 })
    }

    pub fn with_initialization(
        context: &SharedContext,
        name: &str,
        channels: usize,
        initialization: Initialization,
    ) -> Self {
        let conv = |sub: &str, update: UpdateFunction| {
            Conv::new(
                context,
                &format!("{}.{}", name, sub),
                ConvConfig::new(channels, channels)
                    .with_update_func(update)
                    .with_initialization(initialization),
            )
        };
        Self {
            name: name.to_string(),
            channels,
            conv_level1_0_to_0: conv("conv_level1_0_to_0", UpdateFunction::Sigmoid),
            conv_level1_0_to_1: conv("conv_level1_0_to_1", UpdateFunction::Sigmoid),
            conv_level2_0_to_0: conv("conv_level2_0_to_0", UpdateFunction::None),
            conv_level2_1_to_0: conv("conv_level2_1_to_0", UpdateFunction::None),
            aggr_on_nodes: Aggregation::new(AggregationFunction::Sum, UpdateFunction::Sigmoid),
        }
    }
}

impl TopologicalLayer for HsnLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_channels(&self) -> BTreeMap<Rank, usize> {
        BTreeMap::from([(0, self.channels)])
    }

    fn output_channels(&self) -> BTreeMap<Rank, usize> {
        BTreeMap::from([(0, self.channels)])
    }

    fn neighborhoods(&self) -> Vec<NeighborhoodRequest> {
        vec![
            NeighborhoodRequest::adjacency(0),
            NeighborhoodRequest::incidence(0, 1),
            NeighborhoodRequest::incidence(1, 0),
        ]
    }

    fn forward(&self, signals: &Signals, neighborhoods: &NeighborhoodTensors) -> Result<Signals> {
        let x_0 = signal(signals, 0)?;
        let adjacency_0 = neighborhood(neighborhoods, NeighborhoodRequest::adjacency(0))?;
        let nodes_to_edges = neighborhood(neighborhoods, NeighborhoodRequest::incidence(0, 1))?;
        let edges_to_nodes = neighborhood(neighborhoods, NeighborhoodRequest::incidence(1, 0))?;

        let x_0_level1 = self.conv_level1_0_to_0.forward(x_0, adjacency_0);
        let x_1_level1 = self.conv_level1_0_to_1.forward(x_0, nodes_to_edges);

        let x_0_level2 = self.conv_level2_0_to_0.forward(&x_0_level1, adjacency_0);
        let x_1_to_0 = self.conv_level2_1_to_0.forward(&x_1_level1, edges_to_nodes);

        let mut out = Signals::new();
        if let Some(x) = self.aggr_on_nodes.forward(&[x_0_level2, x_1_to_0]) {
            out.insert(0, x);
        }
        Ok(out)
    }

    fn parameters(&self) -> Vec<Tensor> {
        [
            &self.conv_level1_0_to_0,
            &self.conv_level1_0_to_1,
            &self.conv_level2_0_to_0,
            &self.conv_level2_1_to_0,
        ]
        .iter()
        .flat_map(|conv| conv.parameters())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::new_context;

    #[test]
    fn test_channels_and_parameters() {
        let ctx = new_context();
        let layer = HsnLayer::new(&ctx, "hsn_0", 4);
        assert_eq!(layer.input_channels(), BTreeMap::from([(0, 4)]));
        assert_eq!(layer.output_channels(), BTreeMap::from([(0, 4)]));
        assert_eq!(layer.parameters().len(), 4);
        assert!(ctx.borrow().parameter("hsn_0.conv_level2_1_to_0.weight").is_some());
    }

    #[test]
    fn test_missing_neighborhood_is_reported() {
        let ctx = new_context();
        let layer = HsnLayer::new(&ctx, "hsn_0", 2);
        let signals = Signals::from([(0, Tensor::new_input(&ctx, "x_0"))]);
        let err = layer.forward(&signals, &NeighborhoodTensors::new()).unwrap_err();
        assert!(err.to_string().contains("adjacency_0"));
    }
}
