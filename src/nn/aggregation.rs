//! Inter-neighborhood aggregation: combines signals that several
//! convolutions produced for the same rank.

use crate::nn::activations::UpdateFunction;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
    #[default]
    Sum,
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aggregation {
    pub aggr_func: AggregationFunction,
    pub update_func: UpdateFunction,
}

impl Aggregation {
    pub fn new(aggr_func: AggregationFunction, update_func: UpdateFunction) -> Self {
        Self { aggr_func, update_func }
    }

    /// Combines same-shaped signals. Returns `None` for an empty list.
    pub fn forward(&self, signals: &[Tensor]) -> Option<Tensor> {
        let (first, rest) = signals.split_first()?;
        let total = rest.iter().fold(first.clone(), |acc, x| &acc + x);
        let combined = match self.aggr_func {
            AggregationFunction::Sum => total,
            AggregationFunction::Mean => {
                let n = Tensor::scalar(&first.context, signals.len() as f32);
                &total / &n
            }
        };
        Some(self.update_func.apply(&combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::NodeType;
    use crate::tensor::new_context;

    #[test]
    fn test_empty_is_none() {
        assert!(Aggregation::default().forward(&[]).is_none());
    }

    #[test]
    fn test_mean_divides() {
        let ctx = new_context();
        let a = Tensor::new_input(&ctx, "a");
        let b = Tensor::new_input(&ctx, "b");
        let y = Aggregation::new(AggregationFunction::Mean, UpdateFunction::None)
            .forward(&[a, b])
            .unwrap();
        assert!(matches!(
            ctx.borrow().main_graph().get_node(y.node_id).unwrap().node_type,
            NodeType::Divide(_, _)
        ));
    }
}
