//! Neighborhood adapter: turns domain relations into the sparse `f32`
//! matrices the layers multiply signals with.
//!
//! Every matrix is oriented `(target cells, source cells)`, so that
//! `N · x_source` lands on the target rank.

use super::domain::{Domain, DomainQueryError, Rank};
use crate::sparse::SparseMatrix;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Between ranks that differ by one.
    Incidence,
    /// Same rank, through a shared higher-rank cell.
    Adjacency,
    /// Same rank, through a shared lower-rank cell.
    Coadjacency,
}

/// One neighborhood a layer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NeighborhoodRequest {
    pub kind: RelationKind,
    pub source: Rank,
    pub target: Rank,
}

impl NeighborhoodRequest {
    /// Messages from `source`-cells to `target`-cells through incidence.
    pub fn incidence(source: Rank, target: Rank) -> Self {
        Self { kind: RelationKind::Incidence, source, target }
    }

    pub fn adjacency(rank: Rank) -> Self {
        Self { kind: RelationKind::Adjacency, source: rank, target: rank }
    }

    pub fn coadjacency(rank: Rank) -> Self {
        Self { kind: RelationKind::Coadjacency, source: rank, target: rank }
    }

    /// Stable name, used as the graph input name of the matrix.
    pub fn key(&self) -> String {
        match self.kind {
            RelationKind::Incidence => format!("incidence_{}_to_{}", self.source, self.target),
            RelationKind::Adjacency => format!("adjacency_{}", self.source),
            RelationKind::Coadjacency => format!("coadjacency_{}", self.source),
        }
    }

    pub fn validate(&self) -> Result<(), DomainQueryError> {
        let ok = match self.kind {
            RelationKind::Incidence => self.source.abs_diff(self.target) == 1,
            RelationKind::Adjacency | RelationKind::Coadjacency => self.source == self.target,
        };
        if ok {
            Ok(())
        } else {
            Err(DomainQueryError::UnsupportedRelation {
                relation: format!("{:?}", self.kind).to_lowercase(),
                from_rank: self.source,
                to_rank: self.target,
            })
        }
    }

    /// Reads the matrix for this request off a domain.
    pub fn resolve(&self, domain: &dyn Domain) -> Result<SparseMatrix, DomainQueryError> {
        self.validate()?;
        match self.kind {
            RelationKind::Incidence => {
                let upper = self.source.max(self.target);
                // natural orientation is (n_{upper-1}, n_upper), i.e. upper -> lower
                let b = domain.incidence(upper)?;
                Ok(if self.target < self.source { b } else { b.transpose() })
            }
            RelationKind::Adjacency => domain.adjacency(self.source),
            RelationKind::Coadjacency => domain.coadjacency(self.source),
        }
    }
}

impl fmt::Display for NeighborhoodRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// The fixed set of neighborhood matrices a model runs on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighborhoods {
    matrices: BTreeMap<NeighborhoodRequest, SparseMatrix>,
}

impl Neighborhoods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves every request against the domain.
    pub fn from_domain(domain: &dyn Domain, requests: &[NeighborhoodRequest]) -> Result<Self, DomainQueryError> {
        let mut neighborhoods = Self::new();
        for request in requests {
            let matrix = request.resolve(domain)?;
            tracing::debug!(key = %request, shape = ?matrix.shape(), nnz = matrix.nnz(), "resolved neighborhood");
            neighborhoods.matrices.insert(*request, matrix);
        }
        Ok(neighborhoods)
    }

    pub fn insert(&mut self, request: NeighborhoodRequest, matrix: SparseMatrix) -> Option<SparseMatrix> {
        self.matrices.insert(request, matrix)
    }

    /// Inserts a user-provided dense matrix, cast to `f32` and sparsified.
    pub fn insert_dense<A>(&mut self, request: NeighborhoodRequest, dense: ArrayView2<A>) -> Option<SparseMatrix>
    where
        A: Copy + Into<f64>,
    {
        let cast = dense.mapv(|v| Into::<f64>::into(v) as f32);
        self.insert(request, SparseMatrix::from_dense(&cast.view()))
    }

    pub fn get(&self, request: &NeighborhoodRequest) -> Option<&SparseMatrix> {
        self.matrices.get(request)
    }

    pub fn shape(&self, request: &NeighborhoodRequest) -> Option<[usize; 2]> {
        self.get(request).map(SparseMatrix::shape)
    }

    pub fn requests(&self) -> impl Iterator<Item = &NeighborhoodRequest> {
        self.matrices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NeighborhoodRequest, &SparseMatrix)> {
        self.matrices.iter()
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }
}
