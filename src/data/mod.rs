//! # Data Module
//!
//! Samples of per-rank signals with their targets, and the order they are
//! visited in.
//!
//! - [`Dataset`]: trait for indexed data sources
//! - [`TopoDataset`]: in-memory list of [`Sample`]s
//! - [`Sampler`]: iteration order ([`SequentialSampler`], [`RandomSampler`])
//! - [`synthetic`]: seeded generated datasets
//!
//! ```ignore
//! use topoasg::data::{synthetic, Dataset};
//!
//! let dataset = synthetic::classification_samples(100, &cells, 2, 0);
//! let (train, test) = dataset.split(0.8)?;
//! ```

pub mod dataset;
pub mod sampler;
pub mod synthetic;

pub use dataset::{Dataset, Sample, Target, TopoDataset};
pub use sampler::{RandomSampler, Sampler, SequentialSampler};
