//! Two-step message passing: compute messages, aggregate them over a
//! neighborhood.
//!
//! For a neighborhood `N` of shape `(n_target, n_source)` and a source
//! signal `x`, one propagation is
//!
//! ```text
//! m = message(x)                        (n_source, c)
//! y = N · m         (sum aggregation)   (n_target, c)
//! y = D⁻¹N · m      (mean aggregation, D = row sums of N)
//! ```
//!
//! The sparse product is itself gather, weight, scatter over the nonzeros of
//! `N`; see [`SparseMatrix::gather_sources`](crate::sparse::SparseMatrix::gather_sources)
//! and [`SparseMatrix::scatter_targets`](crate::sparse::SparseMatrix::scatter_targets)
//! for the eager versions of the two steps.

use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// How messages arriving at one target cell are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborhoodAggregation {
    /// Weighted sum, `N · m`.
    #[default]
    Sum,
    /// Weighted mean, `N` row-normalized first.
    Mean,
}

pub trait MessagePassing {
    /// Per-source-cell message. Identity unless overridden.
    fn message(&self, x: &Tensor) -> Tensor {
        x.clone()
    }

    fn aggregation(&self) -> NeighborhoodAggregation {
        NeighborhoodAggregation::Sum
    }

    /// Messages from the source cells of `neighborhood`, aggregated on its targets.
    fn propagate(&self, x: &Tensor, neighborhood: &Tensor) -> Tensor {
        let messages = self.message(x);
        match self.aggregation() {
            NeighborhoodAggregation::Sum => neighborhood.sparse_matmul(&messages),
            NeighborhoodAggregation::Mean => neighborhood.row_normalize().sparse_matmul(&messages),
        }
    }
}

/// Message passing with identity messages and a fixed aggregation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Propagation {
    pub aggregation: NeighborhoodAggregation,
}

impl MessagePassing for Propagation {
    fn aggregation(&self) -> NeighborhoodAggregation {
        self.aggregation
    }
}
