//! Crate-level error types.

use crate::analysis::shape_inference::ShapeInferenceError;
use crate::asg::{AsgError, DType};
use crate::autograd::AutogradError;
use crate::runtime::backend::RuntimeError;
use crate::sparse::SparseError;
use crate::topology::{DomainQueryError, Rank};
use thiserror::Error;

/// Caller configuration defects. Always fatal, raised before any tensor math
/// where the information is available up front.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("layer {layer} expects {expected} channels on rank {rank}, but {found} are available there")]
    ChannelMismatch { layer: usize, rank: Rank, expected: usize, found: usize },

    #[error("layer {layer} consumes rank {rank}, which no input or earlier layer provides")]
    MissingInputRank { layer: usize, rank: Rank },

    #[error("a classifier needs at least one layer")]
    NoLayers,

    #[error("dtype {0:?} is not supported, signals and parameters must be F32")]
    UnsupportedDType(DType),

    #[error("read-out requested for rank {0}, which no input or layer provides")]
    MissingReadoutRank(Rank),

    #[error("a classifier needs at least one read-out head")]
    NoReadouts,

    #[error("no signal was supplied for rank {0}")]
    MissingSignal(Rank),

    #[error("signal of rank {rank} has shape {found:?}, the model was compiled for {expected:?}")]
    SignalShape { rank: Rank, expected: Vec<usize>, found: Vec<usize> },

    #[error("neighborhood '{0}' was not supplied")]
    MissingNeighborhood(String),

    #[error("unknown initialization '{0}', expected 'xavier_uniform' or 'xavier_normal'")]
    UnknownInitialization(String),

    #[error("invalid hyperparameter {name}: {reason}")]
    InvalidHyperparameter { name: String, reason: String },

    #[error("{samples} samples were given but {labels} labels")]
    SampleLabelMismatch { samples: usize, labels: usize },

    #[error("target does not match the model output: {0}")]
    TargetMismatch(String),

    #[error("dataset is empty")]
    EmptyDataset,
}

/// Every error the crate can return.
#[derive(Error, Debug)]
pub enum TopoError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("domain query failed: {0}")]
    Domain(#[from] DomainQueryError),

    #[error("graph error: {0}")]
    Asg(#[from] AsgError),

    #[error("shape inference failed: {0}")]
    Shape(#[from] ShapeInferenceError),

    #[error("autograd failed: {0}")]
    Autograd(#[from] AutogradError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("sparse error: {0}")]
    Sparse(#[from] SparseError),

    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TopoError>;
