//! `Tensor` handles and the `GraphContext` that owns the graph under construction.
//!
//! A `Tensor` holds no data. It is a symbolic handle to a node of the
//! abstract semantic graph (ASG); every operation on it appends a node to the
//! graph instead of computing anything. Real values only appear when a
//! backend executes the graph.
//!
//! `GraphContext` also keeps a registry of every trainable parameter created
//! through it, together with the parameter's shape and initialization scheme,
//! so that models can be initialized without guessing shapes from names.

use crate::asg::{Asg, DType, NodeId, NodeType, Shape, Value};
use crate::nn::init::Initialization;
use ndarray::ArrayD;
use std::cell::RefCell;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

/// Declared shape and initialization of one trainable parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub node_id: NodeId,
    pub shape: Shape,
    pub init: Initialization,
}

/// Owns the main graph and the parameter registry.
///
/// Shared between tensor handles as `Rc<RefCell<GraphContext>>`.
#[derive(Debug, Clone)]
pub struct GraphContext {
    main_graph: Asg,
    parameters: Vec<ParameterSpec>,
}

impl GraphContext {
    pub fn new() -> Self {
        Self {
            main_graph: Asg::new(0, Some("main".to_string())),
            parameters: Vec::new(),
        }
    }

    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.main_graph
    }

    pub fn main_graph(&self) -> &Asg {
        &self.main_graph
    }

    /// All parameters registered so far, in creation order.
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for the shared context every layer constructor takes.
pub type SharedContext = Rc<RefCell<GraphContext>>;

/// Creates a fresh shared context.
pub fn new_context() -> SharedContext {
    Rc::new(RefCell::new(GraphContext::new()))
}

/// Symbolic handle to a node of the graph.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub node_id: NodeId,
    pub context: SharedContext,
}

impl Tensor {
    /// Creates an `Input` node: a slot that receives data at execution time.
    pub fn new_input(context: &SharedContext, name: &str) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();
        let node_id = graph.add_node(Some(name.to_string()), NodeType::Input { name: name.to_string() });
        graph.inputs.push(node_id);
        Self { node_id, context: Rc::clone(context) }
    }

    /// Creates a trainable `Parameter` node with a known shape.
    pub fn new_parameter(context: &SharedContext, name: &str, shape: &[usize], init: Initialization) -> Self {
        let mut ctx = context.borrow_mut();
        let node_id = ctx
            .main_graph_mut()
            .add_node(Some(name.to_string()), NodeType::Parameter { name: name.to_string() });
        if let Ok(node) = ctx.main_graph_mut().get_node_mut(node_id) {
            node.shape = Some(shape.to_vec());
            node.dtype = Some(DType::F32);
        }
        ctx.parameters.push(ParameterSpec {
            name: name.to_string(),
            node_id,
            shape: shape.to_vec(),
            init,
        });
        Self { node_id, context: Rc::clone(context) }
    }

    /// Embeds constant data into the graph.
    pub fn new_literal(context: &SharedContext, data: ArrayD<f32>, name: &str) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(Some(name.to_string()), NodeType::Literal(Value::Tensor(data)));
        Self { node_id, context: Rc::clone(context) }
    }

    /// 0-d literal.
    pub fn scalar(context: &SharedContext, value: f32) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(None, NodeType::Literal(Value::scalar(value)));
        Self { node_id, context: Rc::clone(context) }
    }

    /// Name of the underlying node, if any.
    pub fn name(&self) -> Option<String> {
        self.context
            .borrow()
            .main_graph()
            .get_node(self.node_id)
            .ok()
            .and_then(|n| n.name.clone())
    }

    fn push(&self, node_type: NodeType) -> Self {
        let node_id = self.context.borrow_mut().main_graph_mut().add_node(None, node_type);
        Self { node_id, context: Rc::clone(&self.context) }
    }

    // --- Linear algebra ---

    pub fn dot(&self, other: &Tensor) -> Self {
        self.push(NodeType::MatrixMultiply(self.node_id, other.node_id))
    }

    /// `self · input` where `self` is a sparse neighborhood.
    pub fn sparse_matmul(&self, input: &Tensor) -> Self {
        self.push(NodeType::SparseMatMul { matrix: self.node_id, input: input.node_id })
    }

    pub fn sparse_transpose(&self) -> Self {
        self.push(NodeType::SparseTranspose(self.node_id))
    }

    pub fn row_normalize(&self) -> Self {
        self.push(NodeType::RowNormalize(self.node_id))
    }

    // --- Elementwise ---

    pub fn neg(&self) -> Self {
        self.push(NodeType::Negate(self.node_id))
    }

    pub fn exp(&self) -> Self {
        self.push(NodeType::Exp(self.node_id))
    }

    pub fn log(&self) -> Self {
        self.push(NodeType::Log(self.node_id))
    }

    pub fn relu(&self) -> Self {
        self.push(NodeType::ReLU(self.node_id))
    }

    pub fn sigmoid(&self) -> Self {
        self.push(NodeType::Sigmoid(self.node_id))
    }

    /// `log(1 + exp(beta * x)) / beta`
    pub fn softplus(&self, beta: f32) -> Self {
        self.push(NodeType::Softplus(self.node_id, beta))
    }

    pub fn softmax(&self) -> Self {
        self.push(NodeType::Softmax(self.node_id))
    }

    pub fn log_softmax(&self) -> Self {
        self.push(NodeType::LogSoftmax(self.node_id))
    }

    // --- Reductions ---

    pub fn sum(&self) -> Self {
        self.push(NodeType::Sum(self.node_id))
    }

    pub fn mean(&self) -> Self {
        self.push(NodeType::Mean(self.node_id))
    }

    pub fn sum_axis(&self, axis: isize) -> Self {
        self.push(NodeType::SumAxis(self.node_id, axis))
    }

    pub fn mean_axis(&self, axis: isize) -> Self {
        self.push(NodeType::MeanAxis(self.node_id, axis))
    }

    // --- Transformations ---

    pub fn reshape(&self, shape: &[usize]) -> Self {
        let shape_data = ndarray::Array1::from_iter(shape.iter().map(|&d| d as f32)).into_dyn();
        let shape_node = self
            .context
            .borrow_mut()
            .main_graph_mut()
            .add_node(None, NodeType::Literal(Value::Tensor(shape_data)));
        self.push(NodeType::Reshape(self.node_id, shape_node))
    }

    pub fn transpose(&self, axis1: usize, axis2: usize) -> Self {
        self.push(NodeType::Transpose(self.node_id, axis1, axis2))
    }
}

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Add(self.node_id, rhs.node_id))
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Subtract(self.node_id, rhs.node_id))
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Multiply(self.node_id, rhs.node_id))
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Divide(self.node_id, rhs.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_append_nodes() {
        let ctx = new_context();
        let x = Tensor::new_input(&ctx, "x");
        let y = Tensor::new_input(&ctx, "y");
        let z = &(&x + &y) * &x;
        let graph = ctx.borrow().main_graph().clone();
        assert_eq!(graph.inputs, vec![x.node_id, y.node_id]);
        assert!(matches!(
            graph.get_node(z.node_id).unwrap().node_type,
            NodeType::Multiply(_, _)
        ));
    }

    #[test]
    fn test_parameters_are_registered_with_shape() {
        let ctx = new_context();
        let w = Tensor::new_parameter(&ctx, "layer.weight", &[3, 4], Initialization::XavierUniform { gain: 1.0 });
        let ctx_ref = ctx.borrow();
        let spec = ctx_ref.parameter("layer.weight").unwrap();
        assert_eq!(spec.shape, vec![3, 4]);
        assert_eq!(spec.node_id, w.node_id);
        assert_eq!(ctx_ref.main_graph().get_node(w.node_id).unwrap().shape, Some(vec![3, 4]));
    }

    #[test]
    fn test_reshape_creates_shape_literal() {
        let ctx = new_context();
        let x = Tensor::new_input(&ctx, "x");
        let r = x.reshape(&[2]);
        let graph = ctx.borrow().main_graph().clone();
        match &graph.get_node(r.node_id).unwrap().node_type {
            NodeType::Reshape(_, shape_id) => {
                assert_eq!(graph.get_node(*shape_id).unwrap().shape, Some(vec![1]));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }
}
