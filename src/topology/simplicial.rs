use super::domain::{incidence_from_boundaries, Cell, Domain, DomainQueryError, Rank};
use crate::sparse::SparseMatrix;
use std::collections::BTreeSet;

/// Simplices above this size would make the face closure explode.
const MAX_SIMPLEX_VERTICES: usize = 16;

/// Simplicial complex closed under taking faces.
///
/// Cells at each rank are the sorted vertex tuples, enumerated in
/// lexicographic order.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplicialComplex {
    cells: Vec<Vec<Cell>>,
}

impl SimplicialComplex {
    /// Builds the closure of the given simplices.
    ///
    /// ```ignore
    /// let sc = SimplicialComplex::new([[1, 2], [1, 3]])?;
    /// assert_eq!(sc.num_cells(0)?, 3);
    /// ```
    pub fn new<I, S>(simplices: I) -> Result<Self, DomainQueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[usize]>,
    {
        let mut by_rank: Vec<BTreeSet<Cell>> = Vec::new();
        for simplex in simplices {
            let raw = simplex.as_ref();
            let mut vertices = raw.to_vec();
            vertices.sort_unstable();
            vertices.dedup();
            if vertices.is_empty() || vertices.len() != raw.len() {
                return Err(DomainQueryError::InvalidCell {
                    cell: raw.to_vec(),
                    reason: "a simplex needs at least one vertex and no repeated vertices".to_string(),
                });
            }
            if vertices.len() > MAX_SIMPLEX_VERTICES {
                return Err(DomainQueryError::InvalidCell {
                    cell: raw.to_vec(),
                    reason: format!("at most {} vertices are supported", MAX_SIMPLEX_VERTICES),
                });
            }
            if by_rank.len() < vertices.len() {
                by_rank.resize_with(vertices.len(), BTreeSet::new);
            }
            // every non-empty subset is a face
            for mask in 1u32..(1u32 << vertices.len()) {
                let face: Cell = vertices
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, &v)| v)
                    .collect();
                by_rank[face.len() - 1].insert(face);
            }
        }
        Ok(Self { cells: by_rank.into_iter().map(|set| set.into_iter().collect()).collect() })
    }

    fn index_of(&self, rank: Rank, cell: &[usize]) -> Option<usize> {
        self.cells.get(rank)?.binary_search_by(|c| c.as_slice().cmp(cell)).ok()
    }
}

impl Domain for SimplicialComplex {
    fn dim(&self) -> Rank {
        self.cells.len().saturating_sub(1)
    }

    fn cells(&self, rank: Rank) -> Result<&[Cell], DomainQueryError> {
        self.check_rank(rank)?;
        Ok(self.cells.get(rank).map(Vec::as_slice).unwrap_or(&[]))
    }

    fn incidence(&self, rank: Rank) -> Result<SparseMatrix, DomainQueryError> {
        if rank == 0 {
            return Err(DomainQueryError::UnsupportedRelation {
                relation: "incidence".to_string(),
                from_rank: 0,
                to_rank: 0,
            });
        }
        let simplices = self.cells(rank)?;
        let n_faces = self.num_cells(rank - 1)?;
        let boundaries: Vec<Vec<usize>> = simplices
            .iter()
            .map(|simplex| {
                (0..simplex.len())
                    .filter_map(|skip| {
                        let face: Cell = simplex
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != skip)
                            .map(|(_, &v)| v)
                            .collect();
                        self.index_of(rank - 1, &face)
                    })
                    .collect()
            })
            .collect();
        Ok(incidence_from_boundaries(n_faces, &boundaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_two_edges() {
        let sc = SimplicialComplex::new([[1, 2], [1, 3]]).unwrap();
        assert_eq!(sc.dim(), 1);
        assert_eq!(sc.num_cells(0).unwrap(), 3);
        assert_eq!(sc.num_cells(1).unwrap(), 2);
        assert_eq!(sc.cells(1).unwrap(), &[vec![1, 2], vec![1, 3]]);

        let b1 = sc.incidence(1).unwrap();
        assert_eq!(b1.shape(), [3, 2]);
        assert_eq!(b1.to_dense(), array![[1.0, 1.0], [1.0, 0.0], [0.0, 1.0]]);

        let a0 = sc.adjacency(0).unwrap();
        assert_eq!(a0.to_dense(), array![[0.0, 1.0, 1.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_triangle_closure() {
        let sc = SimplicialComplex::new([vec![0, 1, 2], vec![2, 3]]).unwrap();
        assert_eq!(sc.dim(), 2);
        assert_eq!(sc.num_cells(0).unwrap(), 4);
        assert_eq!(sc.num_cells(1).unwrap(), 4);
        assert_eq!(sc.num_cells(2).unwrap(), 1);
        assert_eq!(sc.incidence(2).unwrap().shape(), [4, 1]);
        assert_eq!(sc.incidence(2).unwrap().nnz(), 3);

        // [0,1] and [1,2] share vertex 1; [2,3] shares vertex 2 with [0,2] and [1,2]
        let co = sc.coadjacency(1).unwrap();
        assert_eq!(co.shape(), [4, 4]);
        assert_eq!(co.to_dense().diag().sum(), 0.0);
        assert_eq!(co.nnz(), 10);
    }

    #[test]
    fn test_missing_rank_is_named() {
        let sc = SimplicialComplex::new([[1, 2]]).unwrap();
        assert_eq!(sc.incidence(2), Err(DomainQueryError::MissingRank { rank: 2, max_rank: 1 }));
        assert!(sc.coadjacency(0).is_err());
    }

    #[test]
    fn test_repeated_vertex_is_rejected() {
        assert!(matches!(
            SimplicialComplex::new([[1, 1]]),
            Err(DomainQueryError::InvalidCell { .. })
        ));
    }
}
