// src/solver/iterative.rs

//! Jacobi-preconditioned BiCGStab.
//!
//! Needs no factorization memory, at the price of an iteration count that
//! grows with the condition number. Saddle-point rows with an empty diagonal
//! are left unscaled by the preconditioner.

use log::{debug, warn};

use super::{check_dimensions, LinearSolver, SolveError, SparseMatrix};
use crate::kernel::Vector;

/// Inner products below this are treated as a breakdown of the recurrence.
const BREAKDOWN: f64 = 1e-300;

#[derive(Debug, Clone, Copy)]
pub struct BiCgStabSolver {
    /// Relative residual tolerance, against `|rhs|`.
    pub rtol: f64,
    /// Absolute residual tolerance.
    pub atol: f64,
    pub max_iterations: usize,
}

impl Default for BiCgStabSolver {
    fn default() -> Self {
        BiCgStabSolver { rtol: 1e-10, atol: 1e-14, max_iterations: 10_000 }
    }
}

/// Inverse diagonal, with 1 where the diagonal vanishes.
fn jacobi(matrix: &SparseMatrix) -> Vector {
    Vector::from_iterator(
        matrix.n_rows(),
        (0..matrix.n_rows()).map(|i| {
            let d = matrix.get(i, i);
            if d.abs() > 1e-14 {
                1.0 / d
            } else {
                1.0
            }
        }),
    )
}

impl BiCgStabSolver {
    fn converged(&self, x: Vector, iterations: usize, residual: f64) -> Result<Vector, SolveError> {
        debug!("{}: converged in {} iterations (residual {:.3e})", self.name(), iterations, residual);
        if x.iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(SolveError::NonFinite)
        }
    }
}

impl LinearSolver for BiCgStabSolver {
    fn name(&self) -> &'static str {
        "BiCgStabSolver"
    }

    fn solve(&self, matrix: &SparseMatrix, rhs: &Vector) -> Result<Vector, SolveError> {
        check_dimensions(matrix, rhs)?;
        let n = rhs.len();
        let inv_diag = jacobi(matrix);

        let mut x = Vector::zeros(n);
        let mut r = rhs.clone();
        let tolerance = self.atol.max(self.rtol * rhs.norm());
        if r.norm() <= tolerance {
            return self.converged(x, 0, r.norm());
        }

        // The shadow residual stays fixed.
        let r0 = r.clone();
        let mut p = Vector::zeros(n);
        let mut v = Vector::zeros(n);
        let (mut rho_old, mut alpha, mut omega) = (1.0, 1.0, 1.0);

        for iteration in 0..self.max_iterations {
            let rho = r0.dot(&r);
            if rho.abs() < BREAKDOWN {
                return Err(SolveError::Breakdown { iterations: iteration });
            }
            let beta = if iteration == 0 { 0.0 } else { (rho / rho_old) * (alpha / omega) };
            p = &r + (&p - &v * omega) * beta;

            let p_hat = p.component_mul(&inv_diag);
            v = matrix.mul_vec(&p_hat);
            let r0v = r0.dot(&v);
            if r0v.abs() < BREAKDOWN {
                return Err(SolveError::Breakdown { iterations: iteration });
            }
            alpha = rho / r0v;

            let s = &r - &v * alpha;
            if s.norm() <= tolerance {
                x += &p_hat * alpha;
                return self.converged(x, iteration + 1, s.norm());
            }

            let s_hat = s.component_mul(&inv_diag);
            let t = matrix.mul_vec(&s_hat);
            let tt = t.dot(&t);
            if tt < BREAKDOWN {
                return Err(SolveError::Breakdown { iterations: iteration });
            }
            omega = t.dot(&s) / tt;
            if omega.abs() < BREAKDOWN {
                return Err(SolveError::Breakdown { iterations: iteration });
            }

            x += &p_hat * alpha + &s_hat * omega;
            r = &s - &t * omega;
            if r.norm() <= tolerance {
                return self.converged(x, iteration + 1, r.norm());
            }
            rho_old = rho;
        }

        warn!("{}: stopped after {} iterations", self.name(), self.max_iterations);
        Err(SolveError::NotConverged { iterations: self.max_iterations, residual: r.norm() })
    }
}
