//! Module for shape and data type inference (Shape Inference).
//!
//! Traverses the computation graph and determines the shape
//! and data type of the output tensor for each node based on its input shapes and operation type.

use crate::asg::{Asg, AsgError, DType, Node, NodeId, NodeType, Shape, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("Graph error: {0}")]
    AsgError(#[from] AsgError),

    #[error("Incompatible shapes for operation '{op}': left operand {shape1:?}, right operand {shape2:?}. \
             Ensure dimensions are compatible for broadcasting or matrix multiplication.")]
    IncompatibleShapes {
        op: String,
        shape1: Shape,
        shape2: Shape,
    },

    #[error("Shape information missing for node {0}. \
             This may mean the node has not been processed by shape inference yet or the graph contains a cyclic dependency.")]
    MissingShapeInfo(NodeId),

    #[error("Initial shape not specified for '{0}'. \
             Add the shape to the initial_shapes HashMap when calling ShapeInference::run().")]
    MissingInitialShape(String),

    #[error("Invalid tensor rank for node {node_id}: expected {expected}D, got {actual}D. \
             Check input data dimensions.")]
    InvalidRank {
        node_id: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("Node {0} must be a Literal for shape computation (e.g., for Reshape operation). \
             Dynamic shapes are not supported.")]
    NotALiteral(NodeId),

    #[error("Reshape of node {node_id} from {from:?} to {to:?} changes the number of elements.")]
    InvalidReshape { node_id: NodeId, from: Shape, to: Shape },

    #[error("Axis {axis} is out of range for a {ndim}D tensor at node {node_id}.")]
    AxisOutOfRange { node_id: NodeId, axis: isize, ndim: usize },

    #[error("Broadcast error: cannot broadcast shapes {0:?} and {1:?} to a common shape.")]
    BroadcastError(Shape, Shape),

    #[error("Graph contains a cycle through node {0}.")]
    Cycle(NodeId),
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

/// Numpy broadcasting of two shapes, aligned on the trailing axes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
    let ndim = a.len().max(b.len());
    let mut out = vec![0; ndim];
    for i in 0..ndim {
        let da = if i + a.len() >= ndim { a[i + a.len() - ndim] } else { 1 };
        let db = if i + b.len() >= ndim { b[i + b.len() - ndim] } else { 1 };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// Resolves a possibly negative axis against `ndim`.
pub fn normalize_axis(axis: isize, ndim: usize) -> Option<usize> {
    let resolved = if axis < 0 { ndim as isize + axis } else { axis };
    if resolved < 0 || resolved as usize >= ndim {
        None
    } else {
        Some(resolved as usize)
    }
}

/// Structure that performs shape inference for ASG.
pub struct ShapeInference;

impl ShapeInference {
    /// Runs the shape inference process for the graph.
    ///
    /// Modifies the graph in-place, filling in the `shape` and `dtype` fields for each node.
    ///
    /// # Arguments
    /// * `asg` - Mutable reference to the graph to analyze.
    /// * `initial_shapes` - Shapes and types for `Input` nodes, keyed by name.
    ///   `Parameter` and `External` nodes that already carry a shape use it.
    pub fn run(asg: &mut Asg, initial_shapes: &HashMap<String, (Shape, DType)>) -> Result<()> {
        let sorted_nodes = Self::topological_sort(asg)?;

        for node_id in sorted_nodes {
            let mut node = asg.get_node(node_id)?.clone();
            let (shape, dtype) = Self::infer_node_shape(asg, &node, initial_shapes)?;
            node.shape = Some(shape);
            node.dtype = Some(dtype);
            asg.nodes.insert(node_id, node);
        }

        Ok(())
    }

    /// Orders nodes so that every operand comes before its users.
    pub fn topological_sort(asg: &Asg) -> Result<Vec<NodeId>> {
        let mut ids: Vec<NodeId> = asg.nodes.keys().copied().collect();
        ids.sort_unstable();

        let mut order = Vec::with_capacity(ids.len());
        let mut done: HashSet<NodeId> = HashSet::new();
        let mut in_progress: HashSet<NodeId> = HashSet::new();

        for root in ids {
            if done.contains(&root) {
                continue;
            }
            // Iterative DFS, (node, operands already pushed)
            let mut stack = vec![(root, false)];
            while let Some((id, expanded)) = stack.pop() {
                if done.contains(&id) {
                    continue;
                }
                if expanded {
                    in_progress.remove(&id);
                    done.insert(id);
                    order.push(id);
                    continue;
                }
                if !in_progress.insert(id) {
                    return Err(ShapeInferenceError::Cycle(id));
                }
                stack.push((id, true));
                for operand in asg.get_node(id)?.node_type.operands() {
                    if in_progress.contains(&operand) {
                        return Err(ShapeInferenceError::Cycle(operand));
                    }
                    if !done.contains(&operand) {
                        stack.push((operand, false));
                    }
                }
            }
        }

        Ok(order)
    }

    fn infer_node_shape(
        asg: &Asg,
        node: &Node,
        initial_shapes: &HashMap<String, (Shape, DType)>,
    ) -> Result<(Shape, DType)> {
        match &node.node_type {
            NodeType::Input { name } => initial_shapes
                .get(name)
                .cloned()
                .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),

            NodeType::Parameter { name } | NodeType::External { name, .. } => match &node.shape {
                Some(shape) => Ok((shape.clone(), node.dtype.unwrap_or(DType::F32))),
                None => initial_shapes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),
            },

            NodeType::Literal(value) => Ok((value.shape(), DType::F32)),

            NodeType::Add(l, r)
            | NodeType::Subtract(l, r)
            | NodeType::Multiply(l, r)
            | NodeType::Divide(l, r)
            | NodeType::GreaterThan(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;
                let out = broadcast_shapes(&ls, &rs).ok_or(ShapeInferenceError::BroadcastError(ls, rs))?;
                Ok((out, ld))
            }

            NodeType::MatrixMultiply(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;
                Self::matmul_shape(node.id, "MatrixMultiply", ls, rs).map(|s| (s, ld))
            }

            NodeType::SparseMatMul { matrix, input } => {
                let (ms, _) = Self::get_shape_dtype(asg, *matrix)?;
                let (xs, xd) = Self::get_shape_dtype(asg, *input)?;
                Self::matmul_shape(node.id, "SparseMatMul", ms, xs).map(|s| (s, xd))
            }

            NodeType::SparseTranspose(id) => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if shape.len() != 2 {
                    return Err(ShapeInferenceError::InvalidRank { node_id: node.id, expected: 2, actual: shape.len() });
                }
                shape.swap(0, 1);
                Ok((shape, dtype))
            }

            // Element-wise operations - shape unchanged
            NodeType::RowNormalize(id)
            | NodeType::Negate(id)
            | NodeType::Exp(id)
            | NodeType::Log(id)
            | NodeType::ReLU(id)
            | NodeType::Sigmoid(id)
            | NodeType::Softplus(id, _)
            | NodeType::Softmax(id)
            | NodeType::LogSoftmax(id) => Self::get_shape_dtype(asg, *id),

            NodeType::Sum(id) | NodeType::Mean(id) => {
                let (_, dtype) = Self::get_shape_dtype(asg, *id)?;
                Ok((vec![], dtype))
            }

            NodeType::SumAxis(id, axis) | NodeType::MeanAxis(id, axis) => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                let ax = normalize_axis(*axis, shape.len()).ok_or(ShapeInferenceError::AxisOutOfRange {
                    node_id: node.id,
                    axis: *axis,
                    ndim: shape.len(),
                })?;
                // keepdim, so the result broadcasts back against the operand
                shape[ax] = 1;
                Ok((shape, dtype))
            }

            NodeType::Transpose(id, axis1, axis2) => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if *axis1 >= shape.len() || *axis2 >= shape.len() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: axis1.max(axis2) + 1,
                        actual: shape.len(),
                    });
                }
                shape.swap(*axis1, *axis2);
                Ok((shape, dtype))
            }

            NodeType::Reshape(data_id, shape_id) => {
                let (from, dtype) = Self::get_shape_dtype(asg, *data_id)?;
                let shape_node = asg.get_node(*shape_id)?;
                if let NodeType::Literal(Value::Tensor(shape_tensor)) = &shape_node.node_type {
                    let to: Shape = shape_tensor.iter().map(|&x| x as usize).collect();
                    if from.iter().product::<usize>() != to.iter().product::<usize>() {
                        return Err(ShapeInferenceError::InvalidReshape { node_id: node.id, from, to });
                    }
                    Ok((to, dtype))
                } else {
                    Err(ShapeInferenceError::NotALiteral(*shape_id))
                }
            }

            NodeType::Broadcast(source_id, target_id) => {
                let (source, dtype) = Self::get_shape_dtype(asg, *source_id)?;
                let (target, _) = Self::get_shape_dtype(asg, *target_id)?;
                match broadcast_shapes(&source, &target) {
                    Some(out) if out == target => Ok((target, dtype)),
                    _ => Err(ShapeInferenceError::BroadcastError(source, target)),
                }
            }

            NodeType::ReduceSumTo(source_id, target_id) => {
                let (source, dtype) = Self::get_shape_dtype(asg, *source_id)?;
                let (target, _) = Self::get_shape_dtype(asg, *target_id)?;
                match broadcast_shapes(&target, &source) {
                    Some(out) if out == source => Ok((target, dtype)),
                    _ => Err(ShapeInferenceError::BroadcastError(source, target)),
                }
            }
        }
    }

    fn matmul_shape(node_id: NodeId, op: &str, ls: Shape, rs: Shape) -> Result<Shape> {
        if ls.len() != 2 || rs.len() != 2 {
            return Err(ShapeInferenceError::InvalidRank {
                node_id,
                expected: 2,
                actual: if ls.len() != 2 { ls.len() } else { rs.len() },
            });
        }
        if ls[1] != rs[0] {
            return Err(ShapeInferenceError::IncompatibleShapes {
                op: op.to_string(),
                shape1: ls,
                shape2: rs,
            });
        }
        Ok(vec![ls[0], rs[1]])
    }

    fn get_shape_dtype(asg: &Asg, node_id: NodeId) -> Result<(Shape, DType)> {
        let node = asg.get_node(node_id)?;
        match (&node.shape, node.dtype) {
            (Some(shape), Some(dtype)) => Ok((shape.clone(), dtype)),
            _ => Err(ShapeInferenceError::MissingShapeInfo(node_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{new_context, Tensor};

    fn shapes(entries: &[(&str, Shape)]) -> HashMap<String, (Shape, DType)> {
        entries
            .iter()
            .map(|(name, shape)| (name.to_string(), (shape.clone(), DType::F32)))
            .collect()
    }

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[3, 1], &[1, 4]), Some(vec![3, 4]));
        assert_eq!(broadcast_shapes(&[], &[2, 2]), Some(vec![2, 2]));
        assert_eq!(broadcast_shapes(&[4], &[3, 4]), Some(vec![3, 4]));
        assert_eq!(broadcast_shapes(&[3], &[4]), None);
    }

    #[test]
    fn test_matmul_and_reduction_shapes() {
        let ctx = new_context();
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_input(&ctx, "w");
        let y = x.dot(&w);
        let m = y.mean_axis(0);
        let s = y.sum();

        let mut graph = ctx.borrow().main_graph().clone();
        ShapeInference::run(&mut graph, &shapes(&[("x", vec![5, 3]), ("w", vec![3, 2])])).unwrap();

        assert_eq!(graph.get_node(y.node_id).unwrap().shape, Some(vec![5, 2]));
        assert_eq!(graph.get_node(m.node_id).unwrap().shape, Some(vec![1, 2]));
        assert_eq!(graph.get_node(s.node_id).unwrap().shape, Some(vec![]));
    }

    #[test]
    fn test_sparse_matmul_mismatch_is_reported() {
        let ctx = new_context();
        let a = Tensor::new_input(&ctx, "a");
        let x = Tensor::new_input(&ctx, "x");
        let _ = a.sparse_matmul(&x);

        let mut graph = ctx.borrow().main_graph().clone();
        let err = ShapeInference::run(&mut graph, &shapes(&[("a", vec![3, 2]), ("x", vec![3, 4])])).unwrap_err();
        assert!(matches!(err, ShapeInferenceError::IncompatibleShapes { .. }));
    }

    #[test]
    fn test_missing_input_shape() {
        let ctx = new_context();
        let x = Tensor::new_input(&ctx, "x");
        let _ = x.relu();
        let mut graph = ctx.borrow().main_graph().clone();
        let err = ShapeInference::run(&mut graph, &HashMap::new()).unwrap_err();
        assert_eq!(err, ShapeInferenceError::MissingInitialShape("x".to_string()));
    }

    #[test]
    fn test_topological_sort_puts_operands_first() {
        let ctx = new_context();
        let x = Tensor::new_input(&ctx, "x");
        let y = x.relu();
        let z = &y + &x;
        let graph = ctx.borrow().main_graph().clone();
        let order = ShapeInference::topological_sort(&graph).unwrap();
        let pos = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(x.node_id) < pos(y.node_id));
        assert!(pos(y.node_id) < pos(z.node_id));
    }
}
