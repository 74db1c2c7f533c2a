//! Complex classification with ConvCXN layers on a hexagonal cell complex.
//!
//! Every sample carries node and edge signals on the same six-node ring
//! closed by one face. Per-rank read-outs are pooled by summing their means
//! into one two-class prediction.

use super::Tutorial;
use crate::data::synthetic;
use crate::error::Result;
use crate::models::{ChannelSpec, LayerKind, ModelConfig, ReadoutAggregation, StackedClassifier};
use crate::tensor::new_context;
use crate::topology::{CellComplex, Domain, Neighborhoods};
use crate::training::{Task, TrainConfig, TrainingHistory, Trainer};
use std::collections::BTreeMap;

pub const CHANNELS: usize = 6;
pub const NUM_CLASSES: usize = 2;
pub const N_LAYERS: usize = 2;
pub const NUM_SAMPLES: usize = 100;
pub const TRAIN_FRACTION: f64 = 0.8;

pub fn hexagon() -> Result<CellComplex> {
    let mut complex = CellComplex::new();
    complex.add_cell(&[0, 1, 2, 3, 4, 5], 2)?;
    Ok(complex)
}

pub fn setup(config: TrainConfig) -> Result<Tutorial> {
    let domain = hexagon()?;
    let cells = BTreeMap::from([
        (0, (domain.num_cells(0)?, CHANNELS)),
        (1, (domain.num_cells(1)?, CHANNELS)),
    ]);
    let dataset = synthetic::classification_samples(NUM_SAMPLES, &cells, NUM_CLASSES, config.seed);
    let (train, test) = dataset.split(TRAIN_FRACTION)?;
    let shapes = cells.iter().map(|(&r, &(n, c))| (r, vec![n, c])).collect();

    let context = new_context();
    let spec = ChannelSpec {
        inputs: BTreeMap::from([(0, CHANNELS), (1, CHANNELS)]),
        layer: LayerKind::ConvCxn { c0: CHANNELS, c1: CHANNELS, c2: CHANNELS },
        readouts: BTreeMap::from([(0, NUM_CLASSES), (1, NUM_CLASSES), (2, NUM_CLASSES)]),
    };
    let config_model = ModelConfig::default().with_aggregation(ReadoutAggregation::SumOfMeans);
    let model = StackedClassifier::new(&context, &spec, N_LAYERS, config_model)?;
    let neighborhoods = Neighborhoods::from_domain(&domain, &model.neighborhood_requests())?;

    let trainer = Trainer::new(model, Task::MultiClass, neighborhoods, &shapes, config)?;
    Ok(Tutorial { trainer, train, test })
}

pub fn run(config: TrainConfig) -> Result<TrainingHistory> {
    setup(config)?.fit()
}
