//! ASG: the abstract semantic graph every model is recorded into.
//!
//! Nodes are operations over dense `f32` tensors and sparse neighborhood
//! matrices. Graphs are plain data: they can be cloned, analysed, differentiated
//! and executed by any [`Backend`](crate::runtime::backend::Backend).

use crate::sparse::SparseMatrix;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Node identifier inside one graph.
pub type NodeId = usize;
/// Graph identifier.
pub type AsgId = usize;
/// Tensor shape.
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("Node with ID {0} not found")]
    NodeNotFound(NodeId),
    #[error("Node {0} has no shape information")]
    InvalidShape(NodeId),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// Element type of a node's value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I64,
    Bool,
}

impl DType {
    /// Floating point element types. Signals and neighborhoods must be one of these.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
    pub dtype: Option<DType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    // Leaves
    Input { name: String },
    Parameter { name: String },
    Literal(Value),
    /// Value of a node from another graph, looked up in the execution memo.
    External { name: String, source_asg_id: AsgId, source_node_id: NodeId },

    // Binary, numpy broadcasting
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    Divide(NodeId, NodeId),
    GreaterThan(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),

    // Sparse neighborhoods
    /// `matrix · input`, the matrix operand holds a `Value::Sparse`.
    SparseMatMul { matrix: NodeId, input: NodeId },
    SparseTranspose(NodeId),
    /// Divides each row of a sparse matrix by its sum.
    RowNormalize(NodeId),

    // Unary
    Negate(NodeId),
    Exp(NodeId),
    Log(NodeId),
    ReLU(NodeId),
    Sigmoid(NodeId),
    Softplus(NodeId, f32),
    Softmax(NodeId),    // last axis
    LogSoftmax(NodeId), // last axis

    // Reductions
    Sum(NodeId),               // all elements, scalar
    Mean(NodeId),              // all elements, scalar
    SumAxis(NodeId, isize),    // keepdim
    MeanAxis(NodeId, isize),   // keepdim

    // Transformations
    Reshape(NodeId, NodeId), // second operand is a literal holding the shape
    Transpose(NodeId, usize, usize),
    Broadcast(NodeId, NodeId),
    ReduceSumTo(NodeId, NodeId),
}

impl NodeType {
    /// Operand ids in evaluation order.
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeType::Input { .. }
            | NodeType::Parameter { .. }
            | NodeType::Literal(_)
            | NodeType::External { .. } => vec![],

            NodeType::Add(a, b)
            | NodeType::Subtract(a, b)
            | NodeType::Multiply(a, b)
            | NodeType::Divide(a, b)
            | NodeType::GreaterThan(a, b)
            | NodeType::MatrixMultiply(a, b)
            | NodeType::Reshape(a, b)
            | NodeType::Broadcast(a, b)
            | NodeType::ReduceSumTo(a, b) => vec![*a, *b],

            NodeType::SparseMatMul { matrix, input } => vec![*matrix, *input],

            NodeType::SparseTranspose(a)
            | NodeType::RowNormalize(a)
            | NodeType::Negate(a)
            | NodeType::Exp(a)
            | NodeType::Log(a)
            | NodeType::ReLU(a)
            | NodeType::Sigmoid(a)
            | NodeType::Softplus(a, _)
            | NodeType::Softmax(a)
            | NodeType::LogSoftmax(a)
            | NodeType::Sum(a)
            | NodeType::Mean(a)
            | NodeType::SumAxis(a, _)
            | NodeType::MeanAxis(a, _)
            | NodeType::Transpose(a, _, _) => vec![*a],
        }
    }
}

/// Runtime value of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    Sparse(SparseMatrix),
}

impl Value {
    pub fn scalar(v: f32) -> Self {
        Value::Tensor(ndarray::arr0(v).into_dyn())
    }

    pub fn shape(&self) -> Shape {
        match self {
            Value::Tensor(arr) => arr.shape().to_vec(),
            Value::Sparse(m) => m.shape().to_vec(),
        }
    }

    pub fn as_tensor(&self) -> Option<&ArrayD<f32>> {
        match self {
            Value::Tensor(arr) => Some(arr),
            Value::Sparse(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "Tensor",
            Value::Sparse(_) => "Sparse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub id: AsgId,
    pub name: Option<String>,
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new(id: AsgId, name: Option<String>) -> Self {
        Self { id, name, nodes: HashMap::new(), inputs: vec![], outputs: vec![] }
    }

    pub fn add_node(&mut self, name: Option<String>, node_type: NodeType) -> NodeId {
        let new_id = self.nodes.len();
        let mut node = Node { id: new_id, name, node_type, shape: None, dtype: None };

        // Literals know their shape up front so inference never misses them.
        if let NodeType::Literal(value) = &node.node_type {
            node.shape = Some(value.shape());
            node.dtype = Some(DType::F32);
        }

        self.nodes.insert(new_id, node);
        new_id
    }

    pub fn set_inputs(&mut self, inputs: Vec<NodeId>) {
        self.inputs = inputs;
    }
    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) {
        self.outputs = outputs;
    }
    pub fn set_output(&mut self, output: NodeId) {
        self.set_outputs(vec![output]);
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }
    pub fn get_node_mut(&mut self, id: NodeId) -> AsgResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AsgError::NodeNotFound(id))
    }

    /// Finds an `Input` or `Parameter` node by its name.
    pub fn find_named_leaf(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| match &node.node_type {
                NodeType::Input { name: n } | NodeType::Parameter { name: n } => n == name,
                _ => false,
            })
            .map(|node| node.id)
    }

    /// Names of all `Input` and `Parameter` leaves mapped to their ids.
    pub fn named_leaves(&self) -> HashMap<String, NodeId> {
        self.nodes
            .values()
            .filter_map(|node| match &node.node_type {
                NodeType::Input { name } | NodeType::Parameter { name } => Some((name.clone(), node.id)),
                _ => None,
            })
            .collect()
    }
}
