//! Update functions applied after message aggregation.

use crate::error::ConfigurationError;
use crate::nn::module::Module;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Element-wise update applied to aggregated messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFunction {
    #[default]
    None,
    Sigmoid,
    Relu,
}

impl UpdateFunction {
    pub fn apply(&self, x: &Tensor) -> Tensor {
        match self {
            UpdateFunction::None => x.clone(),
            UpdateFunction::Sigmoid => x.sigmoid(),
            UpdateFunction::Relu => x.relu(),
        }
    }
}

impl Module for UpdateFunction {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        self.apply(inputs)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

impl FromStr for UpdateFunction {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(UpdateFunction::None),
            "sigmoid" => Ok(UpdateFunction::Sigmoid),
            "relu" => Ok(UpdateFunction::Relu),
            other => Err(ConfigurationError::InvalidHyperparameter {
                name: "update_func".to_string(),
                reason: format!("unknown update function '{}'", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::NodeType;
    use crate::tensor::new_context;

    #[test]
    fn test_none_adds_no_node() {
        let ctx = new_context();
        let x = Tensor::new_input(&ctx, "x");
        let y = UpdateFunction::None.apply(&x);
        assert_eq!(x.node_id, y.node_id);

        let s = UpdateFunction::Sigmoid.apply(&x);
        assert!(matches!(
            ctx.borrow().main_graph().get_node(s.node_id).unwrap().node_type,
            NodeType::Sigmoid(_)
        ));
    }

    #[test]
    fn test_parse() {
        assert_eq!("relu".parse::<UpdateFunction>(), Ok(UpdateFunction::Relu));
        assert!("tanh".parse::<UpdateFunction>().is_err());
    }
}
