//! Sparse neighborhood matrices.
//!
//! Neighborhoods (incidence, adjacency) are stored as coalesced COO matrices:
//! entries are sorted row-major and duplicate coordinates are summed. Rows index
//! the cells that receive messages (targets), columns index the cells that send
//! them (sources).
//!
//! Multiplying a signal by a neighborhood is the two-step message passing
//! scheme written out explicitly:
//!
//! ```text
//! gather_sources:  m_k = x[col_k]            one message per nonzero
//!                  (gather_targets reads x[row_k], the receiving cell)
//! weight:          m_k = value_k * m_k
//! scatter_targets: y[row_k] += m_k           sum into the receiving cell
//! ```

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by sparse matrix construction and products.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SparseError {
    #[error("Entry ({row}, {col}) is outside of a {rows}x{cols} matrix")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Cannot multiply a {rows}x{cols} neighborhood with a signal of {signal_rows} rows")]
    DimensionMismatch {
        rows: usize,
        cols: usize,
        signal_rows: usize,
    },

    #[error("Expected {expected} messages (one per nonzero), got {actual}")]
    MessageCount { expected: usize, actual: usize },
}

/// Coalesced sparse matrix in coordinate format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    row_indices: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f32>,
}

impl SparseMatrix {
    /// An all-zero matrix of the given shape.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            row_indices: Vec::new(),
            col_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Builds a matrix from `(row, col, value)` triplets.
    ///
    /// Triplets may come in any order; duplicates are summed and explicit
    /// zeros produced by the summation are kept out of the pattern.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        triplets: impl IntoIterator<Item = (usize, usize, f32)>,
    ) -> Result<Self, SparseError> {
        let mut entries: Vec<(usize, usize, f32)> = Vec::new();
        for (row, col, value) in triplets {
            if row >= rows || col >= cols {
                return Err(SparseError::OutOfBounds { row, col, rows, cols });
            }
            entries.push((row, col, value));
        }
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut matrix = Self::zeros(rows, cols);
        for (row, col, value) in entries {
            let last = matrix.values.len();
            if last > 0 && matrix.row_indices[last - 1] == row && matrix.col_indices[last - 1] == col {
                matrix.values[last - 1] += value;
            } else {
                matrix.row_indices.push(row);
                matrix.col_indices.push(col);
                matrix.values.push(value);
            }
        }
        matrix.prune_zeros();
        Ok(matrix)
    }

    /// Entries must already be row-major sorted, unique and in bounds.
    pub(crate) fn from_sorted_unique(
        rows: usize,
        cols: usize,
        row_indices: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f32>,
    ) -> Self {
        debug_assert!(row_indices.iter().all(|&r| r < rows) && col_indices.iter().all(|&c| c < cols));
        debug_assert!(row_indices.len() == col_indices.len() && col_indices.len() == values.len());
        Self { rows, cols, row_indices, col_indices, values }
    }

    /// Dense-to-sparse conversion: every nonzero entry becomes a stored value.
    pub fn from_dense(dense: &ArrayView2<f32>) -> Self {
        let (rows, cols) = dense.dim();
        let mut matrix = Self::zeros(rows, cols);
        for ((row, col), &value) in dense.indexed_iter() {
            if value != 0.0 {
                matrix.row_indices.push(row);
                matrix.col_indices.push(col);
                matrix.values.push(value);
            }
        }
        matrix
    }

    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for k in 0..self.nnz() {
            dense[[self.row_indices[k], self.col_indices[k]]] += self.values[k];
        }
        dense
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Indices of the receiving cells, one per nonzero.
    pub fn target_indices(&self) -> &[usize] {
        &self.row_indices
    }

    /// Indices of the sending cells, one per nonzero.
    pub fn source_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn transpose(&self) -> Self {
        let mut entries: Vec<(usize, usize, f32)> = (0..self.nnz())
            .map(|k| (self.col_indices[k], self.row_indices[k], self.values[k]))
            .collect();
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut transposed = Self::zeros(self.cols, self.rows);
        for (row, col, value) in entries {
            transposed.row_indices.push(row);
            transposed.col_indices.push(col);
            transposed.values.push(value);
        }
        transposed
    }

    /// Sum of the stored values in each row.
    pub fn row_sums(&self) -> Vec<f32> {
        let mut sums = vec![0.0; self.rows];
        for k in 0..self.nnz() {
            sums[self.row_indices[k]] += self.values[k];
        }
        sums
    }

    /// Divides every row by its sum, so that `A · x` averages over neighbors.
    /// Rows summing to zero are left untouched.
    pub fn row_normalized(&self) -> Self {
        let sums = self.row_sums();
        let mut normalized = self.clone();
        for k in 0..normalized.nnz() {
            let sum = sums[normalized.row_indices[k]];
            if sum != 0.0 {
                normalized.values[k] /= sum;
            }
        }
        normalized
    }

    /// Every stored value replaced by `1.0`.
    pub fn binarized(&self) -> Self {
        let mut pattern = self.clone();
        pattern.values.iter_mut().for_each(|v| *v = 1.0);
        pattern
    }

    /// Sparsifies a signal along the nonzeros: row `k` of the result is the
    /// source row `x[col_k]`.
    pub fn gather_sources(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>, SparseError> {
        if x.nrows() != self.cols {
            return Err(SparseError::DimensionMismatch {
                rows: self.rows,
                cols: self.cols,
                signal_rows: x.nrows(),
            });
        }
        Ok(x.select(Axis(0), &self.col_indices))
    }

    /// Target-side counterpart of [`gather_sources`](Self::gather_sources):
    /// row `k` of the result is the receiving row `x[row_k]`.
    pub fn gather_targets(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>, SparseError> {
        if x.nrows() != self.rows {
            return Err(SparseError::DimensionMismatch {
                rows: self.rows,
                cols: self.cols,
                signal_rows: x.nrows(),
            });
        }
        Ok(x.select(Axis(0), &self.row_indices))
    }

    /// Sums one message per nonzero into its target row.
    pub fn scatter_targets(&self, messages: &ArrayView2<f32>) -> Result<Array2<f32>, SparseError> {
        if messages.nrows() != self.nnz() {
            return Err(SparseError::MessageCount {
                expected: self.nnz(),
                actual: messages.nrows(),
            });
        }
        let mut out = Array2::zeros((self.rows, messages.ncols()));
        for (k, message) in messages.outer_iter().enumerate() {
            let mut target = out.row_mut(self.row_indices[k]);
            target += &message;
        }
        Ok(out)
    }

    /// `A · x`, computed as gather, weight, scatter.
    pub fn matmul(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>, SparseError> {
        let mut messages = self.gather_sources(x)?;
        for (k, mut message) in messages.outer_iter_mut().enumerate() {
            message *= self.values[k];
        }
        self.scatter_targets(&messages.view())
    }

    fn prune_zeros(&mut self) {
        let mut keep = 0;
        for k in 0..self.values.len() {
            if self.values[k] != 0.0 {
                self.row_indices[keep] = self.row_indices[k];
                self.col_indices[keep] = self.col_indices[k];
                self.values[keep] = self.values[k];
                keep += 1;
            }
        }
        self.row_indices.truncate(keep);
        self.col_indices.truncate(keep);
        self.values.truncate(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn example() -> SparseMatrix {
        SparseMatrix::from_triplets(
            3,
            3,
            vec![
                (0, 0, 1.0),
                (0, 1, 2.0),
                (0, 2, 3.0),
                (1, 1, 4.0),
                (1, 2, 5.0),
                (2, 2, 6.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_triplets_coalesces_duplicates() {
        let m = SparseMatrix::from_triplets(2, 2, vec![(1, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0)]).unwrap();
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.to_dense(), array![[0.0, 2.0], [4.0, 0.0]]);
        assert_eq!(m.target_indices(), &[0, 1]);
    }

    #[test]
    fn test_from_triplets_out_of_bounds() {
        let err = SparseMatrix::from_triplets(2, 2, vec![(2, 0, 1.0)]).unwrap_err();
        assert!(matches!(err, SparseError::OutOfBounds { row: 2, .. }));
    }

    #[test]
    fn test_dense_roundtrip_keeps_pattern() {
        let dense = array![[0.0, 1.0, 0.0], [2.0, 0.0, 3.0]];
        let m = SparseMatrix::from_dense(&dense.view());
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.to_dense(), dense);
        assert_eq!(m.transpose().to_dense(), dense.t().to_owned());
    }

    #[test]
    fn test_gather_and_scatter() {
        let m = example();
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let gathered = m.gather_sources(&x.view()).unwrap();
        assert_eq!(
            gathered,
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [3.0, 4.0], [5.0, 6.0], [5.0, 6.0]]
        );

        let summed = m.scatter_targets(&gathered.view()).unwrap();
        assert_eq!(summed, array![[9.0, 12.0], [8.0, 10.0], [5.0, 6.0]]);
    }

    #[test]
    fn test_matmul_matches_dense_product() {
        let m = example();
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let product = m.matmul(&x.view()).unwrap();
        assert_eq!(product, array![[22.0, 28.0], [37.0, 46.0], [30.0, 36.0]]);
        assert_eq!(product, m.to_dense().dot(&x));
    }

    #[test]
    fn test_matmul_rejects_wrong_signal() {
        let m = example();
        let x = Array2::<f32>::zeros((2, 2));
        assert!(matches!(
            m.matmul(&x.view()),
            Err(SparseError::DimensionMismatch { signal_rows: 2, .. })
        ));
    }

    #[test]
    fn test_row_normalized() {
        let m = SparseMatrix::from_triplets(3, 2, vec![(0, 0, 1.0), (0, 1, 1.0), (1, 1, 2.0)]).unwrap();
        let n = m.row_normalized();
        assert_eq!(n.to_dense(), array![[0.5, 0.5], [0.0, 1.0], [0.0, 0.0]]);
    }
}
