//! The `Module` trait for single-signal building blocks.

use crate::tensor::Tensor;

/// Common interface of layers that map one signal to one signal.
///
/// In the graph-based architecture a `Module` adds a pattern of operations
/// and parameters to the graph; it never computes anything itself.
pub trait Module {
    /// Symbolic forward pass, building the corresponding part of the graph.
    fn forward(&self, inputs: &Tensor) -> Tensor;

    /// Trainable parameters (as symbolic tensors) owned by this module.
    fn parameters(&self) -> Vec<Tensor>;
}
