//! Autograd: builds the graph of gradients d(loss)/d(parameter).
//!
//! Algorithm:
//!  - mark every forward node that depends on a requested parameter;
//!  - walk the forward graph in reverse topological order;
//!  - for each marked node with an incoming gradient, emit the vector-Jacobian
//!    product for its marked operands and accumulate (sum) contributions;
//!  - the result is a separate ASG whose outputs are the gradients of the
//!    requested parameters, in request order.
//!
//! Forward values the gradient formulas need (operands, activations, sparse
//! neighborhoods) are referenced through `External` nodes and read from the
//! forward pass memo at execution time, so the gradient graph is run with the
//! memo the forward run returned.
//!
//! The forward graph must have been through shape inference.

use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};
use crate::asg::{Asg, AsgError, DType, NodeId, NodeType, Shape, Value};
use ndarray::ArrayD;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutogradError {
    #[error("ASG: {0}")]
    Asg(#[from] AsgError),
    #[error("Shape: {0}")]
    Shape(#[from] ShapeInferenceError),
    #[error("Node {0} has no inferred shape, run shape inference on the forward graph first")]
    MissingShape(NodeId),
}

pub type AutogradResult<T> = Result<T, AutogradError>;

/// Gradient graph builder.
pub struct Gradients {
    src: Asg,
    grad: Asg,
    /// forward node -> accumulated gradient node in `grad`
    gmap: HashMap<NodeId, NodeId>,
    /// forward node -> its `External` image in `grad`
    externals: HashMap<NodeId, NodeId>,
}

impl Gradients {
    pub fn new(forward: Asg) -> Self {
        let grad_id = forward.id + 1;
        Self {
            src: forward,
            grad: Asg::new(grad_id, Some("grad".to_string())),
            gmap: HashMap::new(),
            externals: HashMap::new(),
        }
    }

    /// Builds the gradient graph of `loss_id` with respect to `param_ids`.
    ///
    /// Parameters the loss does not depend on get an all-zero gradient.
    pub fn build(mut self, loss_id: NodeId, param_ids: &[NodeId]) -> AutogradResult<Asg> {
        let order = ShapeInference::topological_sort(&self.src)?;
        let requires = self.requires_grad(&order, param_ids)?;

        let seed = if self.shape_of(loss_id)?.is_empty() {
            self.lit_scalar(1.0)
        } else {
            let one = self.lit_scalar(1.0);
            let loss_im = self.ext(loss_id)?;
            self.add_node(NodeType::Broadcast(one, loss_im))
        };
        self.gmap.insert(loss_id, seed);

        for &id in order.iter().rev() {
            if !requires.contains(&id) {
                continue;
            }
            let g = match self.gmap.get(&id).copied() {
                Some(g) => g,
                None => continue,
            };
            let node_type = self.src.get_node(id)?.node_type.clone();
            self.backward_node(id, &node_type, g, &requires)?;
        }

        let mut outputs = Vec::with_capacity(param_ids.len());
        for &param in param_ids {
            let out = match self.gmap.get(&param).copied() {
                Some(g) => g,
                None => {
                    let shape = self.shape_of(param)?;
                    self.grad
                        .add_node(None, NodeType::Literal(Value::Tensor(ArrayD::zeros(shape))))
                }
            };
            if let Some(name) = self.src.get_node(param)?.name.clone() {
                self.grad.get_node_mut(out)?.name.get_or_insert(name);
            }
            outputs.push(out);
        }
        self.grad.set_outputs(outputs);

        ShapeInference::run(&mut self.grad, &HashMap::new())?;
        Ok(self.grad)
    }

    /// Nodes on some path from a parameter to the loss.
    fn requires_grad(&self, order: &[NodeId], param_ids: &[NodeId]) -> AutogradResult<HashSet<NodeId>> {
        let mut requires: HashSet<NodeId> = param_ids.iter().copied().collect();
        for &id in order {
            let node = self.src.get_node(id)?;
            if node.node_type.operands().iter().any(|op| requires.contains(op)) {
                requires.insert(id);
            }
        }
        Ok(requires)
    }

    fn backward_node(
        &mut self,
        id: NodeId,
        node_type: &NodeType,
        g: NodeId,
        requires: &HashSet<NodeId>,
    ) -> AutogradResult<()> {
        let wants = |x: &NodeId| requires.contains(x);

        match node_type {
            NodeType::Input { .. }
            | NodeType::Parameter { .. }
            | NodeType::Literal(_)
            | NodeType::External { .. } => {}

            // -------- Binary --------
            NodeType::Add(a, b) => {
                if wants(a) {
                    let ga = self.reduce_to(g, id, *a)?;
                    self.acc(*a, ga);
                }
                if wants(b) {
                    let gb = self.reduce_to(g, id, *b)?;
                    self.acc(*b, gb);
                }
            }
            NodeType::Subtract(a, b) => {
                if wants(a) {
                    let ga = self.reduce_to(g, id, *a)?;
                    self.acc(*a, ga);
                }
                if wants(b) {
                    let neg = self.add_node(NodeType::Negate(g));
                    let gb = self.reduce_to(neg, id, *b)?;
                    self.acc(*b, gb);
                }
            }
            NodeType::Multiply(a, b) => {
                if wants(a) {
                    let b_im = self.ext(*b)?;
                    let ga = self.add_node(NodeType::Multiply(g, b_im));
                    let ga = self.reduce_to(ga, id, *a)?;
                    self.acc(*a, ga);
                }
                if wants(b) {
                    let a_im = self.ext(*a)?;
                    let gb = self.add_node(NodeType::Multiply(g, a_im));
                    let gb = self.reduce_to(gb, id, *b)?;
                    self.acc(*b, gb);
                }
            }
            NodeType::Divide(a, b) => {
                let b_im = self.ext(*b)?;
                if wants(a) {
                    let ga = self.add_node(NodeType::Divide(g, b_im));
                    let ga = self.reduce_to(ga, id, *a)?;
                    self.acc(*a, ga);
                }
                if wants(b) {
                    // -g * a / b^2
                    let a_im = self.ext(*a)?;
                    let num = self.add_node(NodeType::Multiply(g, a_im));
                    let b2 = self.add_node(NodeType::Multiply(b_im, b_im));
                    let frac = self.add_node(NodeType::Divide(num, b2));
                    let gb = self.add_node(NodeType::Negate(frac));
                    let gb = self.reduce_to(gb, id, *b)?;
                    self.acc(*b, gb);
                }
            }
            NodeType::MatrixMultiply(a, b) => {
                if wants(a) {
                    // g @ b^T
                    let b_im = self.ext(*b)?;
                    let bt = self.add_node(NodeType::Transpose(b_im, 0, 1));
                    let ga = self.add_node(NodeType::MatrixMultiply(g, bt));
                    self.acc(*a, ga);
                }
                if wants(b) {
                    // a^T @ g
                    let a_im = self.ext(*a)?;
                    let at = self.add_node(NodeType::Transpose(a_im, 0, 1));
                    let gb = self.add_node(NodeType::MatrixMultiply(at, g));
                    self.acc(*b, gb);
                }
            }
            NodeType::SparseMatMul { matrix, input } => {
                // Neighborhoods are constants: only the signal receives a gradient.
                if wants(input) {
                    let m_im = self.ext(*matrix)?;
                    let mt = self.add_node(NodeType::SparseTranspose(m_im));
                    let gx = self.add_node(NodeType::SparseMatMul { matrix: mt, input: g });
                    self.acc(*input, gx);
                }
            }
            NodeType::GreaterThan(_, _) | NodeType::SparseTranspose(_) | NodeType::RowNormalize(_) => {}

            // -------- Unary --------
            NodeType::Negate(x) => {
                let gx = self.add_node(NodeType::Negate(g));
                self.acc(*x, gx);
            }
            NodeType::Exp(x) => {
                let y = self.ext(id)?;
                let gx = self.add_node(NodeType::Multiply(g, y));
                self.acc(*x, gx);
            }
            NodeType::Log(x) => {
                let x_im = self.ext(*x)?;
                let gx = self.add_node(NodeType::Divide(g, x_im));
                self.acc(*x, gx);
            }
            NodeType::ReLU(x) => {
                let zero = self.lit_scalar(0.0);
                let x_im = self.ext(*x)?;
                let mask = self.add_node(NodeType::GreaterThan(x_im, zero));
                let gx = self.add_node(NodeType::Multiply(g, mask));
                self.acc(*x, gx);
            }
            NodeType::Sigmoid(x) => {
                let s = self.ext(id)?;
                let one = self.lit_scalar(1.0);
                let one_minus = self.add_node(NodeType::Subtract(one, s));
                let local = self.add_node(NodeType::Multiply(s, one_minus));
                let gx = self.add_node(NodeType::Multiply(g, local));
                self.acc(*x, gx);
            }
            NodeType::Softplus(x, beta) => {
                let x_im = self.ext(*x)?;
                let b = self.lit_scalar(*beta);
                let scaled = self.add_node(NodeType::Multiply(x_im, b));
                let s = self.add_node(NodeType::Sigmoid(scaled));
                let gx = self.add_node(NodeType::Multiply(g, s));
                self.acc(*x, gx);
            }
            NodeType::Softmax(x) => {
                // s * (g - sum(g * s))
                let s = self.ext(id)?;
                let gs = self.add_node(NodeType::Multiply(g, s));
                let dot = self.add_node(NodeType::SumAxis(gs, -1));
                let centered = self.add_node(NodeType::Subtract(g, dot));
                let gx = self.add_node(NodeType::Multiply(s, centered));
                self.acc(*x, gx);
            }
            NodeType::LogSoftmax(x) => {
                // g - softmax(x) * sum(g)
                let x_im = self.ext(*x)?;
                let s = self.add_node(NodeType::Softmax(x_im));
                let total = self.add_node(NodeType::SumAxis(g, -1));
                let spread = self.add_node(NodeType::Multiply(s, total));
                let gx = self.add_node(NodeType::Subtract(g, spread));
                self.acc(*x, gx);
            }

            // -------- Reductions --------
            NodeType::Sum(x) | NodeType::SumAxis(x, _) => {
                let x_im = self.ext(*x)?;
                let gx = self.add_node(NodeType::Broadcast(g, x_im));
                self.acc(*x, gx);
            }
            NodeType::Mean(x) => {
                let n: usize = self.shape_of(*x)?.iter().product();
                self.mean_backward(*x, g, n)?;
            }
            NodeType::MeanAxis(x, axis) => {
                let shape = self.shape_of(*x)?;
                let n = crate::analysis::shape_inference::normalize_axis(*axis, shape.len())
                    .map(|ax| shape[ax])
                    .unwrap_or(1);
                self.mean_backward(*x, g, n)?;
            }

            // -------- Transformations --------
            NodeType::Reshape(x, _) => {
                let shape = self.shape_of(*x)?;
                let target = self.lit_shape(&shape);
                let gx = self.add_node(NodeType::Reshape(g, target));
                self.acc(*x, gx);
            }
            NodeType::Transpose(x, a1, a2) => {
                let gx = self.add_node(NodeType::Transpose(g, *a1, *a2));
                self.acc(*x, gx);
            }
            NodeType::Broadcast(x, _) => {
                let x_im = self.ext(*x)?;
                let gx = self.add_node(NodeType::ReduceSumTo(g, x_im));
                self.acc(*x, gx);
            }
            NodeType::ReduceSumTo(x, _) => {
                let x_im = self.ext(*x)?;
                let gx = self.add_node(NodeType::Broadcast(g, x_im));
                self.acc(*x, gx);
            }
        }
        Ok(())
    }

    fn mean_backward(&mut self, x: NodeId, g: NodeId, n: usize) -> AutogradResult<()> {
        let inv_n = self.lit_scalar(1.0 / n.max(1) as f32);
        let scaled = self.add_node(NodeType::Multiply(g, inv_n));
        let x_im = self.ext(x)?;
        let gx = self.add_node(NodeType::Broadcast(scaled, x_im));
        self.acc(x, gx);
        Ok(())
    }

    fn add_node(&mut self, node_type: NodeType) -> NodeId {
        self.grad.add_node(None, node_type)
    }

    fn lit_scalar(&mut self, v: f32) -> NodeId {
        self.grad.add_node(None, NodeType::Literal(Value::scalar(v)))
    }

    fn lit_shape(&mut self, shape: &[usize]) -> NodeId {
        let data = ndarray::Array1::from_iter(shape.iter().map(|&d| d as f32)).into_dyn();
        self.grad.add_node(None, NodeType::Literal(Value::Tensor(data)))
    }

    /// `External` image of a forward node, created once per node.
    fn ext(&mut self, src_id: NodeId) -> AutogradResult<NodeId> {
        if let Some(&existing) = self.externals.get(&src_id) {
            return Ok(existing);
        }
        let shape = self.shape_of(src_id)?;
        let dtype = self.src.get_node(src_id)?.dtype.unwrap_or(DType::F32);
        let name = format!("external_{}_{}", self.src.id, src_id);
        let id = self.grad.add_node(
            Some(name.clone()),
            NodeType::External { name, source_asg_id: self.src.id, source_node_id: src_id },
        );
        let node = self.grad.get_node_mut(id)?;
        node.shape = Some(shape);
        node.dtype = Some(dtype);
        self.externals.insert(src_id, id);
        Ok(id)
    }

    /// dL/d(target) += contribution
    fn acc(&mut self, target: NodeId, contribution: NodeId) {
        let total = match self.gmap.get(&target).copied() {
            Some(prev) => self.add_node(NodeType::Add(prev, contribution)),
            None => contribution,
        };
        self.gmap.insert(target, total);
    }

    /// Sums a broadcast gradient back down to the operand's shape.
    fn reduce_to(&mut self, g: NodeId, node: NodeId, operand: NodeId) -> AutogradResult<NodeId> {
        if self.shape_of(node)? == self.shape_of(operand)? {
            return Ok(g);
        }
        let target = self.ext(operand)?;
        Ok(self.add_node(NodeType::ReduceSumTo(g, target)))
    }

    fn shape_of(&self, src_id: NodeId) -> AutogradResult<Shape> {
        self.src
            .get_node(src_id)?
            .shape
            .clone()
            .ok_or(AutogradError::MissingShape(src_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{new_context, Tensor};

    #[test]
    fn test_unrelated_parameter_gets_zero_gradient() {
        let ctx = new_context();
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_parameter(&ctx, "w", &[2, 2], crate::nn::init::Initialization::Zeros);
        let unused = Tensor::new_parameter(&ctx, "unused", &[3], crate::nn::init::Initialization::Zeros);
        let loss = x.dot(&w).sum();

        let mut forward = ctx.borrow().main_graph().clone();
        let shapes = HashMap::from([("x".to_string(), (vec![1, 2], DType::F32))]);
        ShapeInference::run(&mut forward, &shapes).unwrap();

        let grad = Gradients::new(forward).build(loss.node_id, &[w.node_id, unused.node_id]).unwrap();
        assert_eq!(grad.outputs.len(), 2);
        let zero = grad.get_node(grad.outputs[1]).unwrap();
        assert!(matches!(zero.node_type, NodeType::Literal(_)));
        assert_eq!(zero.shape, Some(vec![3]));
        assert_eq!(grad.get_node(grad.outputs[0]).unwrap().shape, Some(vec![2, 2]));
    }

    #[test]
    fn test_requires_inferred_forward_graph() {
        let ctx = new_context();
        let w = Tensor::new_parameter(&ctx, "w", &[2], crate::nn::init::Initialization::Zeros);
        let x = Tensor::new_input(&ctx, "x");
        let loss = (&w * &x).sum();
        let forward = ctx.borrow().main_graph().clone();
        let err = Gradients::new(forward).build(loss.node_id, &[w.node_id]).unwrap_err();
        assert!(matches!(err, AutogradError::MissingShape(_)));
    }
}
