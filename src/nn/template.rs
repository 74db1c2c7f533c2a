//! Two-step template layer on the edges of a simplicial complex.
//!
//! Edges send to nodes, nodes send back to edges, both steps averaging over
//! the incidence neighborhood:
//!
//! ```text
//! x₀ = σ(D₀⁻¹B₁ · x₁W₁)
//! x₁' = σ(D₁⁻¹B₁ᵀ · x₀W₂)
//! ```

use crate::error::Result;
use crate::nn::activations::UpdateFunction;
use crate::nn::conv::{Conv, ConvConfig};
use crate::nn::layer::{neighborhood, signal, NeighborhoodTensors, Signals, TopologicalLayer};
use crate::tensor::{SharedContext, Tensor};
use crate::topology::{NeighborhoodRequest, Rank};
use std::collections::BTreeMap;

pub struct TemplateLayer {
    name: String,
    in_channels: usize,
    out_channels: usize,
    conv_level1_1_to_0: Conv,
    conv_level2_0_to_1: Conv,
}

impl TemplateLayer {
    pub fn new(
        context: &SharedContext,
        name: &str,
        in_channels: usize,
        intermediate_channels: usize,
        out_channels: usize,
    ) -> Self {
        let conv_level1_1_to_0 = Conv::new(
            context,
            &format!("{}.conv_level1_1_to_0", name),
            ConvConfig::new(in_channels, intermediate_channels)
                .with_aggr_norm(true)
                .with_update_func(UpdateFunction::Sigmoid),
        );
        let conv_level2_0_to_1 = Conv::new(
            context,
            &format!("{}.conv_level2_0_to_1", name),
            ConvConfig::new(intermediate_channels, out_channels)
                .with_aggr_norm(true)
                .with_update_func(UpdateFunction::Sigmoid),
        );
        Self {
            name: name.to_string(),
            in_channels,
            out_channels,
            conv_level1_1_to_0,
            conv_level2_0_to_1,
        }
    }
}

impl TopologicalLayer for TemplateLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_channels(&self) -> BTreeMap<Rank, usize> {
        BTreeMap::from([(1, self.in_channels)])
    }

    fn output_channels(&self) -> BTreeMap<Rank, usize> {
        BTreeMap::from([(1, self.out_channels)])
    }

    fn neighborhoods(&self) -> Vec<NeighborhoodRequest> {
        vec![NeighborhoodRequest::incidence(1, 0), NeighborhoodRequest::incidence(0, 1)]
    }

    fn forward(&self, signals: &Signals, neighborhoods: &NeighborhoodTensors) -> Result<Signals> {
        let x_1 = signal(signals, 1)?;
        let edges_to_nodes = neighborhood(neighborhoods, NeighborhoodRequest::incidence(1, 0))?;
        let nodes_to_edges = neighborhood(neighborhoods, NeighborhoodRequest::incidence(0, 1))?;

        let x_0 = self.conv_level1_1_to_0.forward(x_1, edges_to_nodes);
        let x_1 = self.conv_level2_0_to_1.forward(&x_0, nodes_to_edges);
        Ok(Signals::from([(1, x_1)]))
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.conv_level1_1_to_0.weight.clone(), self.conv_level2_0_to_1.weight.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::Value;
    use crate::runtime::backend::{Backend, Memo};
    use crate::runtime::cpu_backend::CpuBackend;
    use crate::tensor::new_context;
    use crate::topology::{Neighborhoods, SimplicialComplex};
    use ndarray::ArrayD;

    #[test]
    fn test_edges_to_edges() {
        let ctx = new_context();
        let layer = TemplateLayer::new(&ctx, "template_0", 3, 4, 2);
        assert_eq!(layer.input_channels(), BTreeMap::from([(1, 3)]));
        assert_eq!(layer.output_channels(), BTreeMap::from([(1, 2)]));
        assert_eq!(ctx.borrow().parameter("template_0.conv_level1_1_to_0.weight").unwrap().shape, vec![3, 4]);

        let domain = SimplicialComplex::new([[0usize, 1, 2]]).unwrap();
        let hoods = Neighborhoods::from_domain(&domain, &layer.neighborhoods()).unwrap();
        let x_1 = Tensor::new_input(&ctx, "x_1");
        let tensors: NeighborhoodTensors =
            layer.neighborhoods().into_iter().map(|r| (r, Tensor::new_input(&ctx, &r.key()))).collect();
        let out = layer.forward(&Signals::from([(1, x_1.clone())]), &tensors).unwrap();

        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(out[&1].node_id);
        let mut memo: Memo<Value> = Memo::new();
        memo.insert((graph.id, x_1.node_id), Value::Tensor(ArrayD::from_elem(vec![3, 3], 0.5)));
        for spec in ctx.borrow().parameters() {
            memo.insert((graph.id, spec.node_id), Value::Tensor(ArrayD::from_elem(spec.shape.clone(), 0.1)));
        }
        for (request, tensor) in &tensors {
            memo.insert((graph.id, tensor.node_id), Value::Sparse(hoods.get(request).unwrap().clone()));
        }
        let (values, _) = CpuBackend::new().run(&graph, memo).unwrap();
        let y = values[0].as_tensor().unwrap();
        assert_eq!(y.shape(), &[3, 2]);
        assert!(y.iter().all(|&v| v > 0.0 && v < 1.0));
    }
}
