//! One-time compilation of a classifier into executable graphs.
//!
//! ```text
//! signal_r, <neighborhood keys> ──► classifier ──► outputs ──► inference graph
//!                                                    │
//!                     target / target_r ──► loss ◄───┘     ──► training graph
//!                                            │
//!                                            └──► autograd ──► gradient graph
//! ```
//!
//! Every graph is pruned to the nodes its outputs reach (the training graph
//! also keeps every classifier parameter) and has been through shape
//! inference, so shape errors surface here rather than mid-epoch.

use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};
use crate::asg::{Asg, DType, NodeId, Shape, Value};
use crate::autograd::Gradients;
use crate::data::Target;
use crate::error::{ConfigurationError, Result};
use crate::losses::{bce_with_logits, cross_entropy_with_logits};
use crate::models::{ModelOutput, StackedClassifier};
use crate::nn::init::ParameterStore;
use crate::nn::layer::{NeighborhoodTensors, Signals};
use crate::runtime::backend::Memo;
use crate::tensor::{ParameterSpec, Tensor};
use crate::topology::{NeighborhoodRequest, Neighborhoods, Rank};
use crate::training::config::Task;
use ndarray::ArrayD;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Concrete output values of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    PerRank(BTreeMap<Rank, ArrayD<f32>>),
    Pooled(ArrayD<f32>),
}

impl Prediction {
    /// Output arrays in the order the graphs emit them.
    pub fn arrays(&self) -> Vec<&ArrayD<f32>> {
        match self {
            Prediction::PerRank(logits) => logits.values().collect(),
            Prediction::Pooled(a) => vec![a],
        }
    }
}

/// One graph output: the read-out rank (`None` when pooled) and its shape.
#[derive(Debug, Clone, PartialEq)]
struct OutputSlot {
    rank: Option<Rank>,
    shape: Shape,
    target_node: NodeId,
}

/// Graphs and input bindings of a compiled classifier.
pub struct CompiledModel {
    /// Outputs: `[loss, output_0, output_1, …]`.
    pub training: Asg,
    /// Outputs: `[output_0, output_1, …]`.
    pub inference: Asg,
    /// Outputs: one gradient per entry of `parameters`.
    pub gradients: Asg,
    pub parameters: Vec<ParameterSpec>,
    task: Task,
    signal_inputs: BTreeMap<Rank, (NodeId, Shape)>,
    neighborhood_inputs: BTreeMap<NeighborhoodRequest, NodeId>,
    outputs: Vec<OutputSlot>,
}

impl CompiledModel {
    pub fn compile(
        classifier: &StackedClassifier,
        task: Task,
        neighborhoods: &Neighborhoods,
        signal_shapes: &BTreeMap<Rank, Shape>,
    ) -> Result<Self> {
        let context = classifier.context();
        let mut initial_shapes: HashMap<String, (Shape, DType)> = HashMap::new();

        let mut signals = Signals::new();
        let mut signal_inputs = BTreeMap::new();
        for (&rank, &width) in classifier.input_channels() {
            let shape = signal_shapes.get(&rank).ok_or(ConfigurationError::MissingSignal(rank))?;
            if shape.len() != 2 || shape[1] != width {
                return Err(ConfigurationError::SignalShape {
                    rank,
                    expected: vec![shape.first().copied().unwrap_or(0), width],
                    found: shape.clone(),
                }
                .into());
            }
            let name = format!("signal_{}", rank);
            let input = Tensor::new_input(context, &name);
            initial_shapes.insert(name, (shape.clone(), DType::F32));
            signal_inputs.insert(rank, (input.node_id, shape.clone()));
            signals.insert(rank, input);
        }

        let mut hood_tensors = NeighborhoodTensors::new();
        let mut neighborhood_inputs = BTreeMap::new();
        for request in classifier.neighborhood_requests() {
            let [rows, cols] = neighborhoods
                .shape(&request)
                .ok_or_else(|| ConfigurationError::MissingNeighborhood(request.key()))?;
            let input = Tensor::new_input(context, &request.key());
            initial_shapes.insert(request.key(), (vec![rows, cols], DType::F32));
            neighborhood_inputs.insert(request, input.node_id);
            hood_tensors.insert(request, input);
        }

        let output = classifier.forward(&signals, &hood_tensors)?;
        let output_tensors = output.tensors();
        let output_ids: Vec<NodeId> = output_tensors.iter().map(|t| t.node_id).collect();

        let mut inference = prune(context.borrow().main_graph(), &output_ids, &[]);
        ShapeInference::run(&mut inference, &initial_shapes)?;

        let ranks: Vec<Option<Rank>> = match &output {
            ModelOutput::PerRank(logits) => logits.keys().map(|&r| Some(r)).collect(),
            ModelOutput::Pooled(_) => vec![None],
        };

        let mut outputs = Vec::with_capacity(output_tensors.len());
        let mut losses = Vec::with_capacity(output_tensors.len());
        for ((logits, rank), &id) in output_tensors.iter().zip(ranks).zip(&output_ids) {
            let shape = inference
                .get_node(id)?
                .shape
                .clone()
                .ok_or(ShapeInferenceError::MissingShapeInfo(id))?;
            let name = match rank {
                Some(r) => format!("target_{}", r),
                None => "target".to_string(),
            };
            let target = Tensor::new_input(context, &name);
            initial_shapes.insert(name, (shape.clone(), DType::F32));
            losses.push(match task {
                Task::Binary => bce_with_logits(logits, &target),
                Task::MultiClass => cross_entropy_with_logits(logits, &target),
            });
            outputs.push(OutputSlot { rank, shape, target_node: target.node_id });
        }
        let loss = losses
            .into_iter()
            .reduce(|acc, l| &acc + &l)
            .ok_or(ConfigurationError::NoReadouts)?;

        let param_ids: HashSet<NodeId> = classifier.parameters().iter().map(|p| p.node_id).collect();
        let parameters: Vec<ParameterSpec> = context
            .borrow()
            .parameters()
            .iter()
            .filter(|spec| param_ids.contains(&spec.node_id))
            .cloned()
            .collect();
        let ordered_ids: Vec<NodeId> = parameters.iter().map(|p| p.node_id).collect();

        let mut training_outputs = vec![loss.node_id];
        training_outputs.extend(&output_ids);
        // A later layer can overwrite a rank, leaving earlier parameters off
        // every path to the loss. They stay in the graph and get zero gradients.
        let mut training = prune(context.borrow().main_graph(), &training_outputs, &ordered_ids);
        ShapeInference::run(&mut training, &initial_shapes)?;
        let gradients = Gradients::new(training.clone()).build(loss.node_id, &ordered_ids)?;

        tracing::debug!(
            training_nodes = training.nodes.len(),
            inference_nodes = inference.nodes.len(),
            gradient_nodes = gradients.nodes.len(),
            parameters = parameters.len(),
            "compiled classifier"
        );

        Ok(Self { training, inference, gradients, parameters, task, signal_inputs, neighborhood_inputs, outputs })
    }

    /// Memo holding the parameter values and the neighborhood matrices.
    pub fn base_memo(&self, parameters: &ParameterStore, neighborhoods: &Neighborhoods) -> Result<Memo<Value>> {
        let graph = self.training.id;
        let mut memo = Memo::new();
        for spec in &self.parameters {
            let value = parameters
                .get(&spec.name)
                .ok_or_else(|| crate::runtime::backend::RuntimeError::MissingParameter(spec.name.clone(), spec.node_id))?;
            memo.insert((graph, spec.node_id), value.clone());
        }
        for (request, &node) in &self.neighborhood_inputs {
            let matrix = neighborhoods
                .get(request)
                .ok_or_else(|| ConfigurationError::MissingNeighborhood(request.key()))?;
            memo.insert((graph, node), Value::Sparse(matrix.clone()));
        }
        Ok(memo)
    }

    /// Adds the signals of one sample to `memo`.
    pub fn feed_signals(
        &self,
        memo: &mut Memo<Value>,
        signals: &BTreeMap<Rank, ArrayD<f32>>,
    ) -> std::result::Result<(), ConfigurationError> {
        for (&rank, (node, shape)) in &self.signal_inputs {
            let signal = signals.get(&rank).ok_or(ConfigurationError::MissingSignal(rank))?;
            if signal.shape() != shape.as_slice() {
                return Err(ConfigurationError::SignalShape {
                    rank,
                    expected: shape.clone(),
                    found: signal.shape().to_vec(),
                });
            }
            memo.insert((self.training.id, *node), Value::Tensor(signal.clone()));
        }
        Ok(())
    }

    /// Dense target arrays, one per output, shaped like that output.
    ///
    /// A class index becomes a one-hot vector, or the bare `0`/`1` value when
    /// a binary model has a single output unit.
    pub fn target_arrays(&self, target: &Target) -> std::result::Result<Vec<ArrayD<f32>>, ConfigurationError> {
        match target {
            Target::PerRank(per_rank) => self
                .outputs
                .iter()
                .map(|slot| {
                    let rank = slot.rank.ok_or_else(|| {
                        ConfigurationError::TargetMismatch("per-rank targets given for a pooled output".to_string())
                    })?;
                    let array = per_rank.get(&rank).ok_or_else(|| {
                        ConfigurationError::TargetMismatch(format!("no target for read-out rank {}", rank))
                    })?;
                    if array.shape() != slot.shape.as_slice() {
                        return Err(ConfigurationError::TargetMismatch(format!(
                            "target of rank {} has shape {:?}, output has {:?}",
                            rank,
                            array.shape(),
                            slot.shape
                        )));
                    }
                    Ok(array.clone())
                })
                .collect(),
            Target::Class(class) => {
                let slot = match self.outputs.as_slice() {
                    [slot] if slot.rank.is_none() => slot,
                    _ => {
                        return Err(ConfigurationError::TargetMismatch(
                            "a class index needs a pooled read-out aggregation".to_string(),
                        ))
                    }
                };
                let classes = slot.shape.iter().product::<usize>();
                if classes == 1 && self.task == Task::Binary {
                    if *class > 1 {
                        return Err(ConfigurationError::TargetMismatch(format!("class {} of a binary task", class)));
                    }
                    return Ok(vec![ArrayD::from_elem(slot.shape.clone(), *class as f32)]);
                }
                if *class >= classes {
                    return Err(ConfigurationError::TargetMismatch(format!(
                        "class {} out of range for {} classes",
                        class, classes
                    )));
                }
                let mut one_hot: ArrayD<f32> = ArrayD::zeros(slot.shape.clone());
                if let Some(v) = one_hot.as_slice_mut().and_then(|s: &mut [f32]| s.get_mut(*class)) {
                    *v = 1.0;
                }
                Ok(vec![one_hot])
            }
        }
    }

    /// Adds target arrays from [`Self::target_arrays`] to `memo`.
    pub fn feed_targets(&self, memo: &mut Memo<Value>, targets: &[ArrayD<f32>]) {
        for (slot, target) in self.outputs.iter().zip(targets) {
            memo.insert((self.training.id, slot.target_node), Value::Tensor(target.clone()));
        }
    }

    /// Wraps raw output values according to the output layout.
    pub fn prediction(&self, values: Vec<Value>) -> Result<Prediction> {
        let mut arrays = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::Tensor(a) => arrays.push(a),
                other => {
                    return Err(crate::runtime::backend::RuntimeError::TypeError {
                        expected: "Tensor".to_string(),
                        actual: other.kind().to_string(),
                    }
                    .into())
                }
            }
        }
        match self.outputs.as_slice() {
            [slot] if slot.rank.is_none() => Ok(Prediction::Pooled(arrays.pop().ok_or(ConfigurationError::NoReadouts)?)),
            slots => Ok(Prediction::PerRank(
                slots.iter().filter_map(|s| s.rank).zip(arrays).collect(),
            )),
        }
    }

    /// Output shapes in graph order.
    pub fn output_shapes(&self) -> Vec<Shape> {
        self.outputs.iter().map(|s| s.shape.clone()).collect()
    }
}

/// Copy of `graph` restricted to the nodes `outputs` depend on.
/// Keeps the nodes `outputs` depend on, plus the `leaves` themselves.
fn prune(graph: &Asg, outputs: &[NodeId], leaves: &[NodeId]) -> Asg {
    let mut keep: HashSet<NodeId> = leaves.iter().copied().filter(|id| graph.nodes.contains_key(id)).collect();
    let mut stack: Vec<NodeId> = outputs.to_vec();
    while let Some(id) = stack.pop() {
        if !keep.insert(id) {
            continue;
        }
        if let Some(node) = graph.nodes.get(&id) {
            stack.extend(node.node_type.operands());
        }
    }

    let mut pruned = Asg::new(graph.id, graph.name.clone());
    pruned.nodes = graph
        .nodes
        .iter()
        .filter(|(id, _)| keep.contains(id))
        .map(|(&id, node)| (id, node.clone()))
        .collect();
    pruned.set_inputs(graph.inputs.iter().copied().filter(|id| keep.contains(id)).collect());
    pruned.set_outputs(outputs.to_vec());
    pruned
}
