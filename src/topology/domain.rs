//! The `Domain` trait: cells grouped by rank plus their neighborhood matrices.

use crate::sparse::SparseMatrix;
use std::collections::BTreeSet;
use thiserror::Error;

/// Dimension class of a cell: 0 = vertex, 1 = edge, 2 = face.
pub type Rank = usize;

/// A cell, as the sorted (simplices) or cyclic (faces) list of its vertex labels.
pub type Cell = Vec<usize>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainQueryError {
    #[error("rank {rank} is not defined for this domain (highest rank is {max_rank})")]
    MissingRank { rank: Rank, max_rank: Rank },

    #[error("{relation} from rank {from_rank} to rank {to_rank} is not defined")]
    UnsupportedRelation { relation: String, from_rank: Rank, to_rank: Rank },

    #[error("invalid cell {cell:?}: {reason}")]
    InvalidCell { cell: Cell, reason: String },
}

/// A topological domain with a stable enumeration of cells at every rank.
///
/// Incidence matrices are unsigned. `incidence(r)` relates the (r-1)-cells
/// (rows) to the r-cells (columns). Adjacency and coadjacency are derived
/// from it: two r-cells are adjacent when they share an (r+1)-cell and
/// coadjacent when they share an (r-1)-cell.
pub trait Domain {
    /// Highest rank with at least one cell.
    fn dim(&self) -> Rank;

    /// Cells of the given rank, in their stable order.
    fn cells(&self, rank: Rank) -> Result<&[Cell], DomainQueryError>;

    /// Unsigned boundary relation of shape `(n_{rank-1}, n_rank)`.
    fn incidence(&self, rank: Rank) -> Result<SparseMatrix, DomainQueryError>;

    fn num_cells(&self, rank: Rank) -> Result<usize, DomainQueryError> {
        self.cells(rank).map(|c| c.len())
    }

    /// `(n_r, n_r)` upper adjacency. Zero at the highest rank.
    fn adjacency(&self, rank: Rank) -> Result<SparseMatrix, DomainQueryError> {
        let n = self.num_cells(rank)?;
        if rank == self.dim() {
            return Ok(SparseMatrix::zeros(n, n));
        }
        // B_{r+1} is (n_r, n_{r+1}): rows sharing a column are adjacent
        let b = self.incidence(rank + 1)?;
        Ok(shared_neighbors(n, b.target_indices(), b.source_indices()))
    }

    /// `(n_r, n_r)` lower adjacency. Undefined for vertices.
    fn coadjacency(&self, rank: Rank) -> Result<SparseMatrix, DomainQueryError> {
        if rank == 0 {
            return Err(DomainQueryError::UnsupportedRelation {
                relation: "coadjacency".to_string(),
                from_rank: 0,
                to_rank: 0,
            });
        }
        let n = self.num_cells(rank)?;
        // B_r is (n_{r-1}, n_r): columns sharing a row are coadjacent
        let b = self.incidence(rank)?;
        Ok(shared_neighbors(n, b.source_indices(), b.target_indices()))
    }

    fn check_rank(&self, rank: Rank) -> Result<(), DomainQueryError> {
        if rank > self.dim() {
            Err(DomainQueryError::MissingRank { rank, max_rank: self.dim() })
        } else {
            Ok(())
        }
    }
}

/// Binary `(n, n)` matrix linking distinct members that share a group.
///
/// `members[k]` belongs to `groups[k]`.
fn shared_neighbors(n: usize, members: &[usize], groups: &[usize]) -> SparseMatrix {
    let mut by_group: std::collections::BTreeMap<usize, Vec<usize>> = std::collections::BTreeMap::new();
    for (&m, &g) in members.iter().zip(groups) {
        by_group.entry(g).or_default().push(m);
    }
    let mut pairs = BTreeSet::new();
    for members in by_group.values() {
        for &a in members {
            for &b in members {
                if a != b {
                    pairs.insert((a, b));
                }
            }
        }
    }
    let (rows, cols): (Vec<usize>, Vec<usize>) = pairs.into_iter().unzip();
    let values = vec![1.0; rows.len()];
    SparseMatrix::from_sorted_unique(n, n, rows, cols, values)
}

/// Builds an unsigned incidence matrix from per-cell boundary indices.
pub(crate) fn incidence_from_boundaries(n_faces: usize, boundaries: &[Vec<usize>]) -> SparseMatrix {
    let mut entries: Vec<(usize, usize)> = boundaries
        .iter()
        .enumerate()
        .flat_map(|(col, faces)| faces.iter().map(move |&row| (row, col)))
        .collect();
    entries.sort_unstable();
    entries.dedup();
    let (rows, cols): (Vec<usize>, Vec<usize>) = entries.into_iter().unzip();
    let values = vec![1.0; rows.len()];
    SparseMatrix::from_sorted_unique(n_faces, boundaries.len(), rows, cols, values)
}
