// src/solver/sparse.rs

//! Compressed sparse row storage and the additive sinks assembly writes into.

use std::collections::BTreeMap;

use crate::kernel::{Matrix, Vector};

/// Anything local element/face contributions can be added into.
///
/// Contributions are purely additive, so the order in which they arrive does
/// not matter.
pub trait Accumulate {
    /// Adds `local[(a, b)]` at global position `(rows[a], cols[b])`.
    fn add_matrix(&mut self, rows: &[usize], cols: &[usize], local: &Matrix);

    /// Adds `local[a]` at global position `rows[a]`.
    fn add_vector(&mut self, rows: &[usize], local: &Vector);
}

/// Row-wise builder for a [`SparseMatrix`]; duplicate entries are summed.
#[derive(Debug, Clone)]
pub struct SparseMatrixBuilder {
    n_cols: usize,
    rows: Vec<BTreeMap<usize, f64>>,
}

impl SparseMatrixBuilder {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        SparseMatrixBuilder { n_cols, rows: vec![BTreeMap::new(); n_rows] }
    }

    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(col < self.n_cols);
        *self.rows[row].entry(col).or_insert(0.0) += value;
    }

    pub fn build(self) -> SparseMatrix {
        let n_rows = self.rows.len();
        let mut row_ptr = Vec::with_capacity(n_rows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for row in self.rows {
            for (col, value) in row {
                col_idx.push(col);
                values.push(value);
            }
            row_ptr.push(col_idx.len());
        }
        SparseMatrix { n_rows, n_cols: self.n_cols, row_ptr, col_idx, values }
    }
}

/// CSR matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    n_rows: usize,
    n_cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Position of `(row, col)` in the value array, by binary search within the row.
    pub fn find_index(&self, row: usize, col: usize) -> Option<usize> {
        let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
        self.col_idx[start..end].binary_search(&col).ok().map(|k| start + k)
    }

    /// Entry `(row, col)`, zero outside the pattern.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.find_index(row, col).map_or(0.0, |k| self.values[k])
    }

    /// Column/value pairs of one row.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
        self.col_idx[start..end].iter().copied().zip(self.values[start..end].iter().copied())
    }

    pub fn mul_vec(&self, x: &Vector) -> Vector {
        Vector::from_iterator(self.n_rows, (0..self.n_rows).map(|r| self.row(r).map(|(c, v)| v * x[c]).sum::<f64>()))
    }

    pub fn to_dense(&self) -> Matrix {
        let mut dense = Matrix::zeros(self.n_rows, self.n_cols);
        for r in 0..self.n_rows {
            for (c, v) in self.row(r) {
                dense[(r, c)] = v;
            }
        }
        dense
    }
}

/// Global matrix under construction together with its right-hand side.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    matrix: SparseMatrixBuilder,
    rhs: Vector,
}

impl LinearSystem {
    pub fn new(n_dofs: usize) -> Self {
        LinearSystem { matrix: SparseMatrixBuilder::new(n_dofs, n_dofs), rhs: Vector::zeros(n_dofs) }
    }

    pub fn n_dofs(&self) -> usize {
        self.rhs.len()
    }

    pub fn rhs(&self) -> &Vector {
        &self.rhs
    }

    pub fn into_parts(self) -> (SparseMatrix, Vector) {
        (self.matrix.build(), self.rhs)
    }
}

impl Accumulate for LinearSystem {
    fn add_matrix(&mut self, rows: &[usize], cols: &[usize], local: &Matrix) {
        for (a, &r) in rows.iter().enumerate() {
            for (b, &c) in cols.iter().enumerate() {
                let value = local[(a, b)];
                if value != 0.0 {
                    self.matrix.add(r, c, value);
                }
            }
        }
    }

    fn add_vector(&mut self, rows: &[usize], local: &Vector) {
        for (a, &r) in rows.iter().enumerate() {
            self.rhs[r] += local[a];
        }
    }
}

/// Worker-local list of contributions, replayed into the global system after
/// a parallel assembly pass.
#[derive(Debug, Clone, Default)]
pub struct ContributionBuffer {
    matrices: Vec<(Vec<usize>, Vec<usize>, Matrix)>,
    vectors: Vec<(Vec<usize>, Vector)>,
}

impl ContributionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty() && self.vectors.is_empty()
    }

    pub fn append(&mut self, mut other: ContributionBuffer) {
        self.matrices.append(&mut other.matrices);
        self.vectors.append(&mut other.vectors);
    }

    pub fn merge_into(self, sink: &mut impl Accumulate) {
        for (rows, cols, local) in &self.matrices {
            sink.add_matrix(rows, cols, local);
        }
        for (rows, local) in &self.vectors {
            sink.add_vector(rows, local);
        }
    }
}

impl Accumulate for ContributionBuffer {
    fn add_matrix(&mut self, rows: &[usize], cols: &[usize], local: &Matrix) {
        self.matrices.push((rows.to_vec(), cols.to_vec(), local.clone()));
    }

    fn add_vector(&mut self, rows: &[usize], local: &Vector) {
        self.vectors.push((rows.to_vec(), local.clone()));
    }
}
