// src/solver/sparse_lu.rs

//! Sparse Gaussian elimination for the assembled systems.
//!
//! Rows are visited in reverse Cuthill-McKee order, which keeps the fill of
//! the factor inside the profile of the reordered matrix. Each row is reduced
//! against the rows factored before it and then pivots on its own column,
//! unless some remaining entry is much larger (threshold partial pivoting over
//! columns). Saddle-point rows with an empty diagonal are handled the same
//! way. The right-hand side is reduced alongside, so only `U` is stored.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use log::debug;

use super::{check_dimensions, LinearSolver, SolveError, SparseMatrix};
use crate::kernel::Vector;

/// Nodes with more neighbours than this multiple of the mean degree (such as
/// the row of a mean-value multiplier) are numbered last.
const DENSE_DEGREE_FACTOR: usize = 10;

/// Symmetrized pattern of `matrix`, without the diagonal.
fn adjacency(matrix: &SparseMatrix) -> Vec<Vec<usize>> {
    let n = matrix.n_rows();
    let mut adj = vec![Vec::new(); n];
    for r in 0..n {
        for (c, _) in matrix.row(r) {
            if c != r {
                adj[r].push(c);
                adj[c].push(r);
            }
        }
    }
    for list in &mut adj {
        list.sort_unstable();
        list.dedup();
    }
    adj
}

/// Reverse Cuthill-McKee ordering of the rows of a square matrix, as a list of
/// original row indices. Dense rows come last.
pub fn reverse_cuthill_mckee(matrix: &SparseMatrix) -> Vec<usize> {
    let n = matrix.n_rows();
    let adj = adjacency(matrix);
    let mean_degree = adj.iter().map(Vec::len).sum::<usize>() / n.max(1);
    let dense_limit = (DENSE_DEGREE_FACTOR * mean_degree).max(64);
    let dense: Vec<bool> = adj.iter().map(|a| a.len() > dense_limit).collect();
    let degree = |v: usize| adj[v].iter().filter(|&&w| !dense[w]).count();

    // Each component starts from its node of least degree.
    let mut seeds: Vec<usize> = (0..n).filter(|&v| !dense[v]).collect();
    seeds.sort_by_key(|&v| degree(v));

    let mut visited = dense.clone();
    let mut order = Vec::with_capacity(n);
    let mut queue = VecDeque::new();
    for seed in seeds {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        queue.push_back(seed);
        while let Some(v) = queue.pop_front() {
            order.push(v);
            let mut next: Vec<usize> = adj[v].iter().copied().filter(|&w| !visited[w]).collect();
            next.sort_by_key(|&w| degree(w));
            for w in next {
                visited[w] = true;
                queue.push_back(w);
            }
        }
    }
    order.reverse();
    order.extend((0..n).filter(|&v| dense[v]));
    order
}

/// Direct solver for sparse, possibly indefinite and non-symmetric systems.
#[derive(Debug, Clone, Copy)]
pub struct SparseLuSolver {
    /// The diagonal stays the pivot while it is at least this fraction of the
    /// largest remaining entry of its row.
    pub pivot_threshold: f64,
}

impl Default for SparseLuSolver {
    fn default() -> Self {
        SparseLuSolver { pivot_threshold: 0.1 }
    }
}

/// Dense scratch row with the list of its touched columns.
struct ScratchRow {
    values: Vec<f64>,
    present: Vec<bool>,
    pattern: Vec<usize>,
}

impl ScratchRow {
    fn new(n: usize) -> Self {
        ScratchRow { values: vec![0.0; n], present: vec![false; n], pattern: Vec::new() }
    }

    fn clear(&mut self) {
        for &c in &self.pattern {
            self.values[c] = 0.0;
            self.present[c] = false;
        }
        self.pattern.clear();
    }

    /// Marks `col` as touched; returns `true` the first time.
    fn touch(&mut self, col: usize) -> bool {
        if self.present[col] {
            return false;
        }
        self.present[col] = true;
        self.pattern.push(col);
        true
    }
}

impl LinearSolver for SparseLuSolver {
    fn name(&self) -> &'static str {
        "SparseLuSolver"
    }

    fn solve(&self, matrix: &SparseMatrix, rhs: &Vector) -> Result<Vector, SolveError> {
        check_dimensions(matrix, rhs)?;
        let n = rhs.len();
        let order = reverse_cuthill_mckee(matrix);

        let mut step_of: Vec<Option<usize>> = vec![None; n];
        let mut pivot_col = Vec::with_capacity(n);
        let mut pivots = Vec::with_capacity(n);
        let mut upper: Vec<Vec<(usize, f64)>> = Vec::with_capacity(n);
        let mut reduced_rhs = Vec::with_capacity(n);

        let mut row_work = ScratchRow::new(n);
        let mut queue = BinaryHeap::new();

        for (step, &row) in order.iter().enumerate() {
            // 1. Scatter the row.
            row_work.clear();
            let mut scale = 0.0_f64;
            for (c, v) in matrix.row(row) {
                scale = scale.max(v.abs());
                if row_work.touch(c) {
                    if let Some(s) = step_of[c] {
                        queue.push(Reverse(s));
                    }
                }
                row_work.values[c] += v;
            }
            let mut b = rhs[row];

            // 2. Eliminate the columns pivoted so far, in factorization order.
            while let Some(Reverse(s)) = queue.pop() {
                let c: usize = pivot_col[s];
                let factor = row_work.values[c] / pivots[s];
                row_work.values[c] = 0.0;
                if factor == 0.0 {
                    continue;
                }
                for &(col, u) in &upper[s] {
                    if row_work.touch(col) {
                        if let Some(later) = step_of[col] {
                            queue.push(Reverse(later));
                        }
                    }
                    row_work.values[col] -= factor * u;
                }
                b -= factor * reduced_rhs[s];
            }

            // 3. Choose the pivot among the columns not yet pivoted.
            let mut best: Option<(usize, f64)> = None;
            for &c in &row_work.pattern {
                let magnitude = row_work.values[c].abs();
                if step_of[c].is_none() && magnitude > best.map_or(0.0, |(_, m)| m) {
                    best = Some((c, magnitude));
                }
            }
            let Some((mut pivot, largest)) = best else {
                return Err(SolveError::Singular);
            };
            if largest <= f64::EPSILON * scale {
                return Err(SolveError::Singular);
            }
            if step_of[row].is_none() && row_work.values[row].abs() >= self.pivot_threshold * largest {
                pivot = row;
            }

            step_of[pivot] = Some(step);
            pivot_col.push(pivot);
            pivots.push(row_work.values[pivot]);
            upper.push(
                row_work
                    .pattern
                    .iter()
                    .copied()
                    .filter(|&c| step_of[c].is_none() && row_work.values[c] != 0.0)
                    .map(|c| (c, row_work.values[c]))
                    .collect(),
            );
            reduced_rhs.push(b);
        }

        // 4. Back substitution, latest pivot first.
        let mut x = Vector::zeros(n);
        for step in (0..n).rev() {
            let sum: f64 = upper[step].iter().map(|&(c, u)| u * x[c]).sum();
            x[pivot_col[step]] = (reduced_rhs[step] - sum) / pivots[step];
        }
        debug!(
            "{}: {} unknowns, {} non-zeros in A, {} in U",
            self.name(),
            n,
            matrix.nnz(),
            upper.iter().map(Vec::len).sum::<usize>() + n
        );

        if x.iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(SolveError::NonFinite)
        }
    }
}
