//! CPU backend for executing an ASG.
//!
//! Walks the graph backwards from its outputs and evaluates each node with
//! `ndarray`. Dense values are `ArrayD<f32>`, neighborhoods stay sparse.

use super::backend::{Backend, Memo, RuntimeError};
use crate::analysis::shape_inference::{broadcast_shapes, normalize_axis};
use crate::asg::{Asg, AsgId, NodeId, NodeType, Value};
use crate::sparse::SparseMatrix;
use ndarray::{ArrayD, Axis, Ix2, IxDyn, Zip};
use std::collections::HashMap;

/// Execution context for one graph plus the memo of linked graphs.
struct ExecutionContext<'a> {
    graphs: HashMap<AsgId, &'a Asg>,
    /// Values computed so far. Key is (AsgId, NodeId).
    memo: Memo<Value>,
}

impl<'a> ExecutionContext<'a> {
    fn new(main_asg: &'a Asg, initial_memo: Memo<Value>) -> Self {
        let mut graphs = HashMap::new();
        graphs.insert(main_asg.id, main_asg);
        Self { graphs, memo: initial_memo }
    }

    /// Recursively computes the value of a node.
    fn evaluate_node(&mut self, asg_id: AsgId, node_id: NodeId) -> Result<Value, RuntimeError> {
        if let Some(value) = self.memo.get(&(asg_id, node_id)) {
            return Ok(value.clone());
        }

        let asg = *self.graphs.get(&asg_id).ok_or(RuntimeError::GraphNotFound(asg_id))?;
        let node = asg
            .nodes
            .get(&node_id)
            .ok_or(RuntimeError::NodeNotFound(node_id, asg_id))?;

        let result = match &node.node_type {
            NodeType::Input { name } => {
                return Err(RuntimeError::MissingInput(name.clone(), node.id));
            }
            NodeType::Parameter { name } => {
                return Err(RuntimeError::MissingParameter(name.clone(), node.id));
            }
            NodeType::Literal(value) => Ok(value.clone()),
            NodeType::External { source_asg_id, source_node_id, .. } => self
                .memo
                .get(&(*source_asg_id, *source_node_id))
                .cloned()
                .ok_or(RuntimeError::MissingExternal(*source_asg_id, *source_node_id)),

            NodeType::Add(l, r)
            | NodeType::Subtract(l, r)
            | NodeType::Multiply(l, r)
            | NodeType::Divide(l, r)
            | NodeType::GreaterThan(l, r)
            | NodeType::MatrixMultiply(l, r)
            | NodeType::Reshape(l, r)
            | NodeType::Broadcast(l, r)
            | NodeType::ReduceSumTo(l, r) => {
                let lhs = self.evaluate_node(asg_id, *l)?;
                let rhs = self.evaluate_node(asg_id, *r)?;
                match &node.node_type {
                    NodeType::Add(_, _) => op_elementwise(lhs, rhs, "Add", |a, b| a + b),
                    NodeType::Subtract(_, _) => op_elementwise(lhs, rhs, "Subtract", |a, b| a - b),
                    NodeType::Multiply(_, _) => op_elementwise(lhs, rhs, "Multiply", |a, b| a * b),
                    NodeType::Divide(_, _) => op_elementwise(lhs, rhs, "Divide", |a, b| a / b),
                    NodeType::GreaterThan(_, _) => {
                        op_elementwise(lhs, rhs, "GreaterThan", |a, b| if a > b { 1.0 } else { 0.0 })
                    }
                    NodeType::MatrixMultiply(_, _) => op_matmul(lhs, rhs),
                    NodeType::Reshape(_, _) => op_reshape(lhs, rhs),
                    NodeType::Broadcast(_, _) => op_broadcast(lhs, rhs),
                    _ => op_reduce_sum_to(lhs, rhs),
                }
            }

            NodeType::SparseMatMul { matrix, input } => {
                let m = self.evaluate_node(asg_id, *matrix)?;
                let x = self.evaluate_node(asg_id, *input)?;
                op_sparse_matmul(m, x)
            }
            NodeType::SparseTranspose(op) => {
                let m = self.evaluate_node(asg_id, *op)?;
                Ok(Value::Sparse(sparse(m)?.transpose()))
            }
            NodeType::RowNormalize(op) => {
                let m = self.evaluate_node(asg_id, *op)?;
                Ok(Value::Sparse(sparse(m)?.row_normalized()))
            }

            NodeType::Negate(op) => self.unary(asg_id, *op, |x| -x),
            NodeType::Exp(op) => self.unary(asg_id, *op, f32::exp),
            NodeType::Log(op) => self.unary(asg_id, *op, f32::ln),
            NodeType::ReLU(op) => self.unary(asg_id, *op, |x| x.max(0.0)),
            NodeType::Sigmoid(op) => self.unary(asg_id, *op, |x| 1.0 / (1.0 + (-x).exp())),
            NodeType::Softplus(op, beta) => {
                let beta = *beta;
                // linear regime above 20 to avoid overflow
                self.unary(asg_id, *op, move |x| {
                    let bx = beta * x;
                    if bx > 20.0 { x } else { bx.exp().ln_1p() / beta }
                })
            }
            NodeType::Softmax(op) => {
                let a = tensor(self.evaluate_node(asg_id, *op)?)?;
                Ok(Value::Tensor(softmax_last_axis(a, false)))
            }
            NodeType::LogSoftmax(op) => {
                let a = tensor(self.evaluate_node(asg_id, *op)?)?;
                Ok(Value::Tensor(softmax_last_axis(a, true)))
            }

            NodeType::Sum(op) => {
                let a = tensor(self.evaluate_node(asg_id, *op)?)?;
                Ok(Value::scalar(a.sum()))
            }
            NodeType::Mean(op) => {
                let a = tensor(self.evaluate_node(asg_id, *op)?)?;
                Ok(Value::scalar(a.sum() / a.len().max(1) as f32))
            }
            NodeType::SumAxis(op, axis) | NodeType::MeanAxis(op, axis) => {
                let a = tensor(self.evaluate_node(asg_id, *op)?)?;
                let ax = normalize_axis(*axis, a.ndim()).ok_or_else(|| {
                    RuntimeError::ShapeError(format!("axis {} out of range for shape {:?}", axis, a.shape()))
                })?;
                let mut reduced = a.sum_axis(Axis(ax));
                if matches!(node.node_type, NodeType::MeanAxis(_, _)) {
                    let n = a.shape()[ax].max(1) as f32;
                    reduced.mapv_inplace(|x| x / n);
                }
                Ok(Value::Tensor(reduced.insert_axis(Axis(ax))))
            }

            NodeType::Transpose(op, ax1, ax2) => {
                let a = tensor(self.evaluate_node(asg_id, *op)?)?;
                if *ax1 >= a.ndim() || *ax2 >= a.ndim() {
                    return Err(RuntimeError::ShapeError(format!(
                        "cannot swap axes {} and {} of shape {:?}",
                        ax1,
                        ax2,
                        a.shape()
                    )));
                }
                let mut axes: Vec<usize> = (0..a.ndim()).collect();
                axes.swap(*ax1, *ax2);
                Ok(Value::Tensor(a.permuted_axes(axes).as_standard_layout().into_owned()))
            }
        }?;

        self.memo.insert((asg_id, node_id), result.clone());
        Ok(result)
    }

    fn unary(&mut self, asg_id: AsgId, op: NodeId, f: impl Fn(f32) -> f32) -> Result<Value, RuntimeError> {
        let a = tensor(self.evaluate_node(asg_id, op)?)?;
        Ok(Value::Tensor(a.mapv(f)))
    }
}

pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type DeviceData = Value;

    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError> {
        let mut context = ExecutionContext::new(main_asg, initial_memo);

        let mut results = Vec::with_capacity(main_asg.outputs.len());
        for &output_node_id in &main_asg.outputs {
            results.push(context.evaluate_node(main_asg.id, output_node_id)?);
        }
        Ok((results, context.memo))
    }

    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError> {
        Ok(device_data.to_vec())
    }
}

fn tensor(value: Value) -> Result<ArrayD<f32>, RuntimeError> {
    match value {
        Value::Tensor(a) => Ok(a),
        other => Err(RuntimeError::TypeError { expected: "Tensor".to_string(), actual: other.kind().to_string() }),
    }
}

fn sparse(value: Value) -> Result<SparseMatrix, RuntimeError> {
    match value {
        Value::Sparse(m) => Ok(m),
        other => Err(RuntimeError::TypeError { expected: "Sparse".to_string(), actual: other.kind().to_string() }),
    }
}

/// Element-wise binary op with numpy broadcasting.
fn op_elementwise(lhs: Value, rhs: Value, op: &str, f: impl Fn(f32, f32) -> f32) -> Result<Value, RuntimeError> {
    let a = tensor(lhs)?;
    let b = tensor(rhs)?;
    let shape = broadcast_shapes(a.shape(), b.shape()).ok_or_else(|| {
        RuntimeError::ShapeError(format!("{}: cannot broadcast {:?} with {:?}", op, a.shape(), b.shape()))
    })?;
    let (av, bv) = match (a.broadcast(IxDyn(&shape)), b.broadcast(IxDyn(&shape))) {
        (Some(av), Some(bv)) => (av, bv),
        _ => {
            return Err(RuntimeError::ShapeError(format!(
                "{}: cannot broadcast {:?} with {:?}",
                op,
                a.shape(),
                b.shape()
            )))
        }
    };
    Ok(Value::Tensor(Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y))))
}

fn op_matmul(lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    let a = tensor(lhs)?;
    let b = tensor(rhs)?;
    let shape_err = |a: &ArrayD<f32>, b: &ArrayD<f32>| {
        RuntimeError::ShapeError(format!("Incompatible matmul shapes: {:?} and {:?}", a.shape(), b.shape()))
    };
    let a2 = a.view().into_dimensionality::<Ix2>().map_err(|_| shape_err(&a, &b))?;
    let b2 = b.view().into_dimensionality::<Ix2>().map_err(|_| shape_err(&a, &b))?;
    if a2.ncols() != b2.nrows() {
        return Err(shape_err(&a, &b));
    }
    Ok(Value::Tensor(a2.dot(&b2).into_dyn()))
}

fn op_sparse_matmul(matrix: Value, input: Value) -> Result<Value, RuntimeError> {
    let m = sparse(matrix)?;
    let x = tensor(input)?;
    let x2 = x.view().into_dimensionality::<Ix2>().map_err(|_| {
        RuntimeError::ShapeError(format!("SparseMatMul expects a 2D signal, got shape {:?}", x.shape()))
    })?;
    Ok(Value::Tensor(m.matmul(&x2)?.into_dyn()))
}

fn op_reshape(source: Value, shape_provider: Value) -> Result<Value, RuntimeError> {
    let s = tensor(source)?;
    let p = tensor(shape_provider)?;
    let shape: Vec<usize> = p.iter().map(|&x| x as usize).collect();
    let reshaped = s
        .to_shape(shape.as_slice())
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
    Ok(Value::Tensor(reshaped.to_owned()))
}

fn op_broadcast(source: Value, target: Value) -> Result<Value, RuntimeError> {
    let s = tensor(source)?;
    let target_shape = target.shape();
    let broadcasted = s.broadcast(IxDyn(&target_shape)).ok_or_else(|| {
        RuntimeError::ShapeError(format!("Cannot broadcast {:?} to {:?}", s.shape(), target_shape))
    })?;
    Ok(Value::Tensor(broadcasted.to_owned()))
}

/// Sums `source` down to the shape of `target`, undoing a broadcast.
fn op_reduce_sum_to(source: Value, target: Value) -> Result<Value, RuntimeError> {
    let mut source_tensor = tensor(source)?;
    let target_shape = target.shape();

    while source_tensor.ndim() > target_shape.len() {
        source_tensor = source_tensor.sum_axis(Axis(0));
    }
    if source_tensor.ndim() != target_shape.len() {
        return Err(RuntimeError::ShapeError(format!(
            "Cannot reduce {:?} to {:?}",
            source_tensor.shape(),
            target_shape
        )));
    }

    for axis in (0..target_shape.len()).rev() {
        if target_shape[axis] == 1 && source_tensor.shape()[axis] != 1 {
            source_tensor = source_tensor.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }

    if source_tensor.shape() != target_shape.as_slice() {
        return Err(RuntimeError::ShapeError(format!(
            "Cannot reduce {:?} to {:?}",
            source_tensor.shape(),
            target_shape
        )));
    }
    Ok(Value::Tensor(source_tensor))
}

/// Softmax (or log-softmax) over the last axis, max-shifted.
fn softmax_last_axis(mut a: ArrayD<f32>, log: bool) -> ArrayD<f32> {
    if a.ndim() == 0 {
        return a.mapv(|_| if log { 0.0 } else { 1.0 });
    }
    let last = Axis(a.ndim() - 1);
    for mut lane in a.lanes_mut(last) {
        let max_val = lane.iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|x| x - max_val);
        let log_sum = lane.iter().map(|x| x.exp()).sum::<f32>().ln();
        if log {
            lane.mapv_inplace(|x| x - log_sum);
        } else {
            lane.mapv_inplace(|x| (x - log_sum).exp());
        }
    }
    a
}
