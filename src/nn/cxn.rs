//! Convolutional cell complex layer: nodes and edges in, nodes, edges and
//! faces out.
//!
//! ```text
//! x₀' = relu(A₀ · x₀W₀)
//! x₁' = relu(x₁)
//! x₂' = relu(B₂ᵀ · x₁'W₁)
//! ```

use crate::error::Result;
use crate::nn::activations::UpdateFunction;
use crate::nn::conv::{Conv, ConvConfig};
use crate::nn::layer::{neighborhood, signal, NeighborhoodTensors, Signals, TopologicalLayer};
use crate::tensor::{SharedContext, Tensor};
use crate::topology::{NeighborhoodRequest, Rank};
use std::collections::BTreeMap;

pub struct ConvCxnLayer {
    name: String,
    channels: [usize; 3],
    conv_0_to_0: Conv,
    conv_1_to_2: Conv,
}

impl ConvCxnLayer {
    pub fn new(context: &SharedContext, name: &str, in_channels_0: usize, in_channels_1: usize, in_channels_2: usize) -> Self {
        let conv_0_to_0 = Conv::new(
            context,
            &format!("{}.conv_0_to_0", name),
            ConvConfig::new(in_channels_0, in_channels_0).with_update_func(UpdateFunction::Relu),
        );
        let conv_1_to_2 = Conv::new(
            context,
            &format!("{}.conv_1_to_2", name),
            ConvConfig::new(in_channels_1, in_channels_2).with_update_func(UpdateFunction::Relu),
        );
        Self {
            name: name.to_string(),
            channels: [in_channels_0, in_channels_1, in_channels_2],
            conv_0_to_0,
            conv_1_to_2,
        }
    }
}

impl TopologicalLayer for ConvCxnLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_channels(&self) -> BTreeMap<Rank, usize> {
        BTreeMap::from([(0, self.channels[0]), (1, self.channels[1])])
    }

    fn output_channels(&self) -> BTreeMap<Rank, usize> {
        BTreeMap::from([(0, self.channels[0]), (1, self.channels[1]), (2, self.channels[2])])
    }

    fn neighborhoods(&self) -> Vec<NeighborhoodRequest> {
        vec![NeighborhoodRequest::adjacency(0), NeighborhoodRequest::incidence(1, 2)]
    }

    fn forward(&self, signals: &Signals, neighborhoods: &NeighborhoodTensors) -> Result<Signals> {
        let x_0 = signal(signals, 0)?;
        let x_1 = signal(signals, 1)?;
        let adjacency_0 = neighborhood(neighborhoods, NeighborhoodRequest::adjacency(0))?;
        let edges_to_faces = neighborhood(neighborhoods, NeighborhoodRequest::incidence(1, 2))?;

        let x_0 = self.conv_0_to_0.forward(x_0, adjacency_0);
        let x_1 = x_1.relu();
        let x_2 = self.conv_1_to_2.forward(&x_1, edges_to_faces);

        Ok(Signals::from([(0, x_0), (1, x_1), (2, x_2)]))
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.conv_0_to_0.weight.clone(), self.conv_1_to_2.weight.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::new_context;

    #[test]
    fn test_emits_faces() {
        let ctx = new_context();
        let layer = ConvCxnLayer::new(&ctx, "cxn_0", 3, 4, 5);
        assert_eq!(layer.input_channels().len(), 2);
        assert_eq!(layer.output_channels().get(&2), Some(&5));
        assert_eq!(ctx.borrow().parameter("cxn_0.conv_1_to_2.weight").unwrap().shape, vec![4, 5]);
    }
}
