//! Compiling a classifier into graphs and training it sample by sample.

pub mod compiled;
pub mod config;
pub mod trainer;

pub use compiled::{CompiledModel, Prediction};
pub use config::{Task, TrainConfig};
pub use trainer::{EpochReport, Trainer, TrainerState, TrainingHistory};
