//! Complete models assembled from the layers in [`crate::nn`].

pub mod classifier;

pub use classifier::{
    validate_stack, ChannelSpec, Device, LayerKind, ModelConfig, ModelOutput, ReadoutAggregation, StackedClassifier,
};
