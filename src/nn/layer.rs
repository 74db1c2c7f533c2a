//! The interface every topological layer implements.

use crate::error::{ConfigurationError, Result};
use crate::tensor::Tensor;
use crate::topology::{NeighborhoodRequest, Rank};
use std::collections::BTreeMap;

/// Current symbolic signal per rank.
pub type Signals = BTreeMap<Rank, Tensor>;

/// Symbolic neighborhood matrices, one per request.
pub type NeighborhoodTensors = BTreeMap<NeighborhoodRequest, Tensor>;

/// A message-passing layer over one or more ranks.
///
/// Homogeneous layers read and write the same rank; heterogeneous layers
/// change the set of ranks (nodes + edges in, nodes + edges + faces out).
pub trait TopologicalLayer {
    fn name(&self) -> &str;

    /// Channel width expected on every rank the layer reads.
    fn input_channels(&self) -> BTreeMap<Rank, usize>;

    /// Channel width produced on every rank the layer writes.
    fn output_channels(&self) -> BTreeMap<Rank, usize>;

    /// Neighborhoods `forward` looks up.
    fn neighborhoods(&self) -> Vec<NeighborhoodRequest>;

    /// Builds the layer's part of the graph. Only the written ranks are
    /// returned; inputs are never modified.
    fn forward(&self, signals: &Signals, neighborhoods: &NeighborhoodTensors) -> Result<Signals>;

    fn parameters(&self) -> Vec<Tensor>;
}

/// Looks up the signal of `rank`.
pub fn signal(signals: &Signals, rank: Rank) -> std::result::Result<&Tensor, ConfigurationError> {
    signals.get(&rank).ok_or(ConfigurationError::MissingSignal(rank))
}

/// Looks up the neighborhood of `request`.
pub fn neighborhood(
    neighborhoods: &NeighborhoodTensors,
    request: NeighborhoodRequest,
) -> std::result::Result<&Tensor, ConfigurationError> {
    neighborhoods
        .get(&request)
        .ok_or_else(|| ConfigurationError::MissingNeighborhood(request.key()))
}
