//! Node classification with a High Skip Network on two edges sharing node 1.
//!
//! Three nodes carry two features each; the task predicts one binary label
//! per node. Training and evaluation use the same nodes.

use super::Tutorial;
use crate::data::{Sample, Target, TopoDataset};
use crate::error::Result;
use crate::models::{ChannelSpec, LayerKind, ModelConfig, StackedClassifier};
use crate::tensor::new_context;
use crate::topology::{Neighborhoods, SimplicialComplex};
use crate::training::{Task, TrainConfig, TrainingHistory, Trainer};
use ndarray::array;
use std::collections::BTreeMap;

pub const CHANNELS: usize = 2;
pub const N_LAYERS: usize = 2;

pub fn setup(config: TrainConfig) -> Result<Tutorial> {
    let domain = SimplicialComplex::new([[1usize, 2], [1, 3]])?;

    let x_0 = array![[1.0f32, 0.0], [0.0, 1.0], [1.0, 1.0]].into_dyn();
    let y = array![[1.0f32], [0.0], [1.0]].into_dyn();
    let sample = Sample::new(BTreeMap::from([(0, x_0)]), Target::PerRank(BTreeMap::from([(0, y)])));
    let shapes = sample.signal_shapes();
    let dataset = TopoDataset::new(vec![sample]);

    let context = new_context();
    let spec = ChannelSpec {
        inputs: BTreeMap::from([(0, CHANNELS)]),
        layer: LayerKind::Hsn { channels: CHANNELS },
        readouts: BTreeMap::from([(0, 1)]),
    };
    let model = StackedClassifier::new(&context, &spec, N_LAYERS, ModelConfig::default())?;
    let neighborhoods = Neighborhoods::from_domain(&domain, &model.neighborhood_requests())?;

    let trainer = Trainer::new(model, Task::Binary, neighborhoods, &shapes, config)?;
    Ok(Tutorial { trainer, train: dataset.clone(), test: dataset })
}

pub fn run(config: TrainConfig) -> Result<TrainingHistory> {
    setup(config)?.fit()
}
