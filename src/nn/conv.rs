//! Message-passing convolution over one neighborhood.

use crate::nn::activations::UpdateFunction;
use crate::nn::init::{Initialization, DEFAULT_CONV_GAIN};
use crate::nn::message_passing::{MessagePassing, NeighborhoodAggregation};
use crate::tensor::{SharedContext, Tensor};

/// Configuration for [`Conv`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Divide each target's aggregate by its neighborhood row sum.
    pub aggr_norm: bool,
    pub update_func: UpdateFunction,
    pub initialization: Initialization,
}

impl ConvConfig {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            aggr_norm: false,
            update_func: UpdateFunction::None,
            initialization: Initialization::XavierUniform { gain: DEFAULT_CONV_GAIN },
        }
    }

    pub fn with_aggr_norm(mut self, aggr_norm: bool) -> Self {
        self.aggr_norm = aggr_norm;
        self
    }

    pub fn with_update_func(mut self, update_func: UpdateFunction) -> Self {
        self.update_func = update_func;
        self
    }

    pub fn with_initialization(mut self, initialization: Initialization) -> Self {
        self.initialization = initialization;
        self
    }
}

/// `update(N · (x W))`, with `W` of shape `(in_channels, out_channels)`.
///
/// ```rust,ignore
/// let conv = Conv::new(&ctx, "hsn.0.conv_level1_0_to_0", ConvConfig::new(2, 2)
///     .with_update_func(UpdateFunction::Sigmoid));
/// let y = conv.forward(&x_0, &adjacency_0);
/// ```
pub struct Conv {
    pub weight: Tensor,
    pub config: ConvConfig,
}

impl Conv {
    /// Registers `<name>.weight`.
    pub fn new(context: &SharedContext, name: &str, config: ConvConfig) -> Self {
        let weight = Tensor::new_parameter(
            context,
            &format!("{}.weight", name),
            &[config.in_channels, config.out_channels],
            config.initialization,
        );
        Self { weight, config }
    }

    pub fn forward(&self, x_source: &Tensor, neighborhood: &Tensor) -> Tensor {
        let aggregated = self.propagate(x_source, neighborhood);
        self.config.update_func.apply(&aggregated)
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone()]
    }
}

impl MessagePassing for Conv {
    fn message(&self, x: &Tensor) -> Tensor {
        x.dot(&self.weight)
    }

    fn aggregation(&self) -> NeighborhoodAggregation {
        if self.config.aggr_norm {
            NeighborhoodAggregation::Mean
        } else {
            NeighborhoodAggregation::Sum
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::NodeType;
    use crate::tensor::new_context;

    #[test]
    fn test_weight_shape_and_default_gain() {
        let ctx = new_context();
        let conv = Conv::new(&ctx, "conv", ConvConfig::new(3, 5));
        let spec = ctx.borrow().parameter("conv.weight").cloned().unwrap();
        assert_eq!(spec.shape, vec![3, 5]);
        assert_eq!(spec.init, Initialization::XavierUniform { gain: 1.414 });
        assert_eq!(conv.parameters().len(), 1);
    }

    #[test]
    fn test_aggr_norm_row_normalizes() {
        let ctx = new_context();
        let conv = Conv::new(
            &ctx,
            "conv",
            ConvConfig::new(2, 2).with_aggr_norm(true).with_update_func(UpdateFunction::Sigmoid),
        );
        let x = Tensor::new_input(&ctx, "x");
        let n = Tensor::new_input(&ctx, "n");
        let y = conv.forward(&x, &n);

        let graph = ctx.borrow().main_graph().clone();
        let sigmoid_input = match graph.get_node(y.node_id).unwrap().node_type {
            NodeType::Sigmoid(id) => id,
            ref other => panic!("expected sigmoid, got {:?}", other),
        };
        match graph.get_node(sigmoid_input).unwrap().node_type {
            NodeType::SparseMatMul { matrix, .. } => assert!(matches!(
                graph.get_node(matrix).unwrap().node_type,
                NodeType::RowNormalize(_)
            )),
            ref other => panic!("expected sparse product, got {:?}", other),
        }
    }
}
