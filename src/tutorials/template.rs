//! Edge classification with the two-step template layer.
//!
//! Two triangles glued along an edge; each edge is labeled 1 when its
//! features sum to a positive value. Messages go edges → nodes → edges.

use super::Tutorial;
use crate::data::synthetic;
use crate::error::Result;
use crate::models::{ChannelSpec, LayerKind, ModelConfig, StackedClassifier};
use crate::tensor::new_context;
use crate::topology::{Domain, Neighborhoods, SimplicialComplex};
use crate::training::{Task, TrainConfig, TrainingHistory, Trainer};
use std::collections::BTreeMap;

pub const CHANNELS: usize = 4;
pub const N_LAYERS: usize = 2;
pub const NUM_SAMPLES: usize = 20;

pub fn setup(config: TrainConfig) -> Result<Tutorial> {
    let domain = SimplicialComplex::new([[0usize, 1, 2], [1, 2, 3]])?;
    let n_edges = domain.num_cells(1)?;

    let dataset = synthetic::cell_labeling_samples(NUM_SAMPLES, 1, n_edges, CHANNELS, config.seed);
    let (train, test) = dataset.split(0.75)?;
    let shapes = BTreeMap::from([(1, vec![n_edges, CHANNELS])]);

    let context = new_context();
    let spec = ChannelSpec {
        inputs: BTreeMap::from([(1, CHANNELS)]),
        layer: LayerKind::Template {
            in_channels: CHANNELS,
            intermediate_channels: CHANNELS,
            out_channels: CHANNELS,
        },
        readouts: BTreeMap::from([(1, 1)]),
    };
    let model = StackedClassifier::new(&context, &spec, N_LAYERS, ModelConfig::default())?;
    let neighborhoods = Neighborhoods::from_domain(&domain, &model.neighborhood_requests())?;

    let trainer = Trainer::new(model, Task::Binary, neighborhoods, &shapes, config)?;
    Ok(Tutorial { trainer, train, test })
}

pub fn run(config: TrainConfig) -> Result<TrainingHistory> {
    setup(config)?.fit()
}
