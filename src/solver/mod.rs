// src/solver/mod.rs

//! Linear solver framework: the `LinearSolver` plug-in trait, the solvers
//! shipped with the engine and a condition-number estimate for conditioning
//! studies.
//!
//! [`SparseLuSolver`] is the default of the time integrator. [`DenseLuSolver`]
//! is kept for small systems and as a reference in tests, and
//! [`BiCgStabSolver`] trades exactness for memory on large meshes.

pub mod iterative;
pub mod sparse;
pub mod sparse_lu;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::Vector;

pub use iterative::BiCgStabSolver;
pub use sparse::{Accumulate, ContributionBuffer, LinearSystem, SparseMatrix, SparseMatrixBuilder};
pub use sparse_lu::{reverse_cuthill_mckee, SparseLuSolver};

/// Why a linear solve did not produce a solution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("system of size {rows}x{cols} does not match right-hand side of length {rhs}")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
    #[error("matrix is singular")]
    Singular,
    #[error("solution contains non-finite values")]
    NonFinite,
    #[error("no convergence after {iterations} iterations (residual {residual:.3e})")]
    NotConverged { iterations: usize, residual: f64 },
    #[error("iteration broke down after {iterations} iterations")]
    Breakdown { iterations: usize },
}

/// The common interface for linear solvers.
///
/// The time integrator hands every assembled system to one of these and
/// aborts the run if it fails.
pub trait LinearSolver: Send + Sync {
    /// Returns the unique name of the solver.
    fn name(&self) -> &'static str;

    /// Solves `matrix * x = rhs`.
    fn solve(&self, matrix: &SparseMatrix, rhs: &Vector) -> Result<Vector, SolveError>;
}

impl LinearSolver for Box<dyn LinearSolver> {
    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn solve(&self, matrix: &SparseMatrix, rhs: &Vector) -> Result<Vector, SolveError> {
        self.as_ref().solve(matrix, rhs)
    }
}

/// Requires a square matrix matching the right-hand side.
pub(crate) fn check_dimensions(matrix: &SparseMatrix, rhs: &Vector) -> Result<(), SolveError> {
    if matrix.n_rows() != matrix.n_cols() || matrix.n_rows() != rhs.len() {
        return Err(SolveError::DimensionMismatch { rows: matrix.n_rows(), cols: matrix.n_cols(), rhs: rhs.len() });
    }
    Ok(())
}

/// Dense LU factorization with partial pivoting.
///
/// Cubic in the number of unknowns; meant for small systems.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseLuSolver;

impl LinearSolver for DenseLuSolver {
    fn name(&self) -> &'static str {
        "DenseLuSolver"
    }

    fn solve(&self, matrix: &SparseMatrix, rhs: &Vector) -> Result<Vector, SolveError> {
        check_dimensions(matrix, rhs)?;
        debug!("{}: factorizing {} unknowns ({} non-zeros)", self.name(), rhs.len(), matrix.nnz());

        let solution = matrix.to_dense().lu().solve(rhs).ok_or(SolveError::Singular)?;
        if solution.iter().all(|v| v.is_finite()) {
            Ok(solution)
        } else {
            Err(SolveError::NonFinite)
        }
    }
}

/// Solver selection of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinearSolverKind {
    #[default]
    SparseLu,
    DenseLu,
    BiCgStab,
}

impl LinearSolverKind {
    pub fn build(self) -> Box<dyn LinearSolver> {
        match self {
            LinearSolverKind::SparseLu => Box::new(SparseLuSolver::default()),
            LinearSolverKind::DenseLu => Box::new(DenseLuSolver),
            LinearSolverKind::BiCgStab => Box::new(BiCgStabSolver::default()),
        }
    }
}

/// Spectral condition number `sigma_max / sigma_min` from a dense SVD.
///
/// Infinite for a singular matrix, `None` for an empty one. Cubic in the
/// matrix size.
pub fn condition_number(matrix: &SparseMatrix) -> Option<f64> {
    if matrix.n_rows() == 0 || matrix.n_cols() == 0 {
        return None;
    }
    let sigma = matrix.to_dense().singular_values();
    let (largest, smallest) = (sigma.max(), sigma.min());
    Some(if smallest > 0.0 { largest / smallest } else { f64::INFINITY })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dense_solver_solves_small_system() {
        let mut builder = SparseMatrixBuilder::new(2, 2);
        builder.add(0, 0, 4.0);
        builder.add(0, 1, 1.0);
        builder.add(1, 0, 1.0);
        builder.add(1, 1, 3.0);
        let x = DenseLuSolver.solve(&builder.build(), &Vector::from_vec(vec![1.0, 2.0])).unwrap();
        assert_relative_eq!(x[0], 1.0 / 11.0, epsilon = 1e-14);
        assert_relative_eq!(x[1], 7.0 / 11.0, epsilon = 1e-14);
    }

    #[test]
    fn test_singular_system_is_reported() {
        let mut builder = SparseMatrixBuilder::new(2, 2);
        builder.add(0, 0, 1.0);
        builder.add(1, 0, 1.0);
        let result = DenseLuSolver.solve(&builder.build(), &Vector::from_vec(vec![1.0, 2.0]));
        assert_eq!(result, Err(SolveError::Singular));
    }

    #[test]
    fn test_dimension_mismatch_is_reported() {
        let matrix = SparseMatrixBuilder::new(3, 3).build();
        for kind in [LinearSolverKind::SparseLu, LinearSolverKind::DenseLu, LinearSolverKind::BiCgStab] {
            let result = kind.build().solve(&matrix, &Vector::zeros(2));
            assert!(matches!(result, Err(SolveError::DimensionMismatch { rhs: 2, .. })));
        }
    }

    #[test]
    fn test_solver_kind_names() {
        assert_eq!(LinearSolverKind::default().build().name(), "SparseLuSolver");
        assert_eq!(LinearSolverKind::DenseLu.build().name(), "DenseLuSolver");
        assert_eq!(serde_json::to_string(&LinearSolverKind::BiCgStab).unwrap(), "\"bi-cg-stab\"");
    }

    #[test]
    fn test_condition_number_of_diagonal_matrix() {
        let mut builder = SparseMatrixBuilder::new(3, 3);
        builder.add(0, 0, 2.0);
        builder.add(1, 1, -8.0);
        builder.add(2, 2, 0.5);
        assert_relative_eq!(condition_number(&builder.build()).unwrap(), 16.0, epsilon = 1e-12);

        let mut singular = SparseMatrixBuilder::new(2, 2);
        singular.add(0, 0, 1.0);
        assert_eq!(condition_number(&singular.build()), Some(f64::INFINITY));
        assert_eq!(condition_number(&SparseMatrixBuilder::new(0, 0).build()), None);
    }
}
