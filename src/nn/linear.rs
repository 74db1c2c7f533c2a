//! Fully connected layer, used as the read-out head of classifiers.

use crate::nn::init::Initialization;
use crate::nn::module::Module;
use crate::tensor::{SharedContext, Tensor};

/// Fully connected (linear) layer: `y = xW + b`.
///
/// The layer holds no data, only symbolic handles to its `Parameter` nodes.
/// `W` is `(in_features, out_features)`, `b` is `(out_features,)` and
/// broadcasts over the rows of `x`.
pub struct Linear {
    pub weights: Tensor,
    pub bias: Tensor,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Registers `<name>.weight` and `<name>.bias` in the graph.
    pub fn new(context: &SharedContext, name: &str, in_features: usize, out_features: usize) -> Self {
        let weights = Tensor::new_parameter(
            context,
            &format!("{}.weight", name),
            &[in_features, out_features],
            Initialization::XavierUniform { gain: 1.0 },
        );
        let bias = Tensor::new_parameter(context, &format!("{}.bias", name), &[out_features], Initialization::Zeros);

        Self { weights, bias, in_features, out_features }
    }
}

impl Module for Linear {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        &inputs.dot(&self.weights) + &self.bias
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone(), self.bias.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::new_context;

    #[test]
    fn test_parameters_have_shapes() {
        let ctx = new_context();
        let linear = Linear::new(&ctx, "readout_0", 4, 2);
        assert_eq!(linear.parameters().len(), 2);
        let ctx_ref = ctx.borrow();
        assert_eq!(ctx_ref.parameter("readout_0.weight").unwrap().shape, vec![4, 2]);
        assert_eq!(ctx_ref.parameter("readout_0.bias").unwrap().shape, vec![2]);
    }
}
