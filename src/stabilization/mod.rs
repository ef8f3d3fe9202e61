// src/stabilization/mod.rs

//! Ghost-penalty jump stabilization.
//!
//! For every interior face `F` in the stabilization zone the operator adds
//!
//! ```text
//! sum_{k=1..p} w_k h^(2k+1) int_F [d^k u / dn^k] [d^k v / dn^k]
//! ```
//!
//! where `[.]` is the jump across `F`. The term vanishes for polynomials of
//! degree `p`, so it does not spoil consistency, and it extends the control of
//! the bulk form from the physical domain to the whole active mesh.

use std::sync::Arc;

use crate::geometry::{GeometryState, Location};
use crate::kernel::{gauss_segment, LagrangeBasis, Matrix};
use crate::meshing::{DofHandler, FaceDirection};
use crate::solver::Accumulate;
use crate::{EngineError, EngineResult};

/// Decides which interior faces receive the penalty.
pub trait FaceSelector: Send + Sync {
    fn stabilize(&self, here: Location, there: Location) -> bool;
}

/// Faces between a cut cell and any other active cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct CutFaceSelector;

impl FaceSelector for CutFaceSelector {
    fn stabilize(&self, here: Location, there: Location) -> bool {
        match (here, there) {
            (Location::Cut, other) | (other, Location::Cut) => other != Location::Outside,
            _ => false,
        }
    }
}

/// Weight `w_k` of the jump of the `k`-th normal derivative.
pub type WeightFunction = fn(usize) -> f64;

/// Taylor-expansion weights `1 / ((k!)^2 (2k + 1))`.
pub fn taylor_weights(k: usize) -> f64 {
    let factorial: f64 = (1..=k).map(|i| i as f64).product();
    1.0 / (factorial * factorial * (2 * k + 1) as f64)
}

/// Which block of the global unknowns is stabilized.
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    /// One scalar block starting at `offset`.
    Scalar { offset: usize },
    /// One block per vector component, each starting at its own offset.
    Vector { offsets: Vec<usize> },
}

impl Extractor {
    fn offsets(&self) -> &[usize] {
        match self {
            Extractor::Scalar { offset } => std::slice::from_ref(offset),
            Extractor::Vector { offsets } => offsets,
        }
    }
}

/// Local face contribution awaiting accumulation.
#[derive(Debug, Clone)]
struct FaceContribution {
    dofs: Vec<usize>,
    matrix: Matrix,
}

/// Jump-penalty operator for one solution block.
///
/// Faces are visited from the cell on their lower side (east and north
/// neighbours), so calling [`JumpStabilization::compute_stabilization`] once
/// for every active cell covers every selected face exactly once.
#[derive(Clone)]
pub struct JumpStabilization {
    name: &'static str,
    basis: LagrangeBasis,
    selector: Arc<dyn FaceSelector>,
    weights: WeightFunction,
    extractor: Extractor,
    pending: Vec<FaceContribution>,
}

impl JumpStabilization {
    /// Operator for a Lagrange block of the given degree, stabilizing cut faces
    /// with Taylor weights on a scalar block at offset zero until configured otherwise.
    pub fn new(name: &'static str, degree: usize) -> Self {
        JumpStabilization {
            name,
            basis: LagrangeBasis::new(degree),
            selector: Arc::new(CutFaceSelector),
            weights: taylor_weights,
            extractor: Extractor::Scalar { offset: 0 },
            pending: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set_faces_to_stabilize(&mut self, selector: impl FaceSelector + 'static) {
        self.selector = Arc::new(selector);
    }

    pub fn set_weight_function(&mut self, weights: WeightFunction) {
        self.weights = weights;
    }

    pub fn set_extractor(&mut self, extractor: Extractor) {
        self.extractor = extractor;
    }

    /// Computes the penalty on the selected faces owned by `cell` and keeps it
    /// until the next [`JumpStabilization::add_stabilization_to_matrix`].
    pub fn compute_stabilization(&mut self, geometry: &GeometryState, dofs: &DofHandler, cell: usize) {
        let mesh = geometry.mesh();
        let here = geometry.classify(cell);
        if here == Location::Outside {
            return;
        }
        let Some(own_dofs) = dofs.cell_dofs(mesh, cell) else {
            return;
        };

        for dir in [FaceDirection::East, FaceDirection::North] {
            let Some(neighbor) = mesh.neighbor(cell, dir) else {
                continue;
            };
            if !self.selector.stabilize(here, geometry.classify(neighbor)) {
                continue;
            }
            let Some(other_dofs) = dofs.cell_dofs(mesh, neighbor) else {
                continue;
            };
            let matrix = self.face_matrix(geometry, cell, neighbor, dir);

            let block: Vec<usize> = own_dofs.iter().chain(other_dofs.iter()).copied().collect();
            for &offset in self.extractor.offsets() {
                self.pending.push(FaceContribution {
                    dofs: block.iter().map(|d| d + offset).collect(),
                    matrix: matrix.clone(),
                });
            }
        }
    }

    /// Penalty matrix over the dofs of `cell` followed by those of `neighbor`.
    fn face_matrix(&self, geometry: &GeometryState, cell: usize, neighbor: usize, dir: FaceDirection) -> Matrix {
        let mesh = geometry.mesh();
        let (own, other) = (mesh.cell_geometry(cell), mesh.cell_geometry(neighbor));
        let (start, end) = own.face_endpoints(dir);
        let axis = dir.axis();
        let h = mesh.h();
        let n = self.basis.dofs_per_cell();
        let degree = self.basis.degree();

        let mut matrix = Matrix::zeros(2 * n, 2 * n);
        let mut jump = vec![0.0; 2 * n];
        for (p, w) in gauss_segment(&start, &end, degree + 2) {
            for k in 1..=degree {
                let scale = (self.weights)(k) * h.powi(2 * k as i32 + 1) * w;
                let inner = self.basis.axis_derivatives(&own, &p, axis, k);
                let outer = self.basis.axis_derivatives(&other, &p, axis, k);
                for a in 0..n {
                    jump[a] = inner[a];
                    jump[n + a] = -outer[a];
                }
                for a in 0..2 * n {
                    for b in 0..2 * n {
                        matrix[(a, b)] += scale * jump[a] * jump[b];
                    }
                }
            }
        }
        matrix
    }

    /// Adds the pending face contributions, multiplied by `scaling`, into `sink`.
    ///
    /// A zero scaling is a configuration error; nothing is added in that case.
    pub fn add_stabilization_to_matrix(&mut self, scaling: f64, sink: &mut impl Accumulate) -> EngineResult<()> {
        if scaling == 0.0 {
            self.pending.clear();
            return Err(EngineError::ZeroStabilizationScaling { block: self.name.to_string() });
        }
        for contribution in self.pending.drain(..) {
            sink.add_matrix(&contribution.dofs, &contribution.dofs, &(contribution.matrix * scaling));
        }
        Ok(())
    }
}

impl std::fmt::Debug for JumpStabilization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JumpStabilization")
            .field("name", &self.name)
            .field("degree", &self.basis.degree())
            .field("extractor", &self.extractor)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Scaling constants of the stabilization blocks of one problem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StabilizationScaling {
    Scalar(f64),
    Flow { velocity: f64, pressure: f64 },
}

impl StabilizationScaling {
    /// `gamma_u (1 + tau nu / h^2)`.
    pub fn scalar(gamma_u: f64, nu: f64, tau: f64, h: f64) -> Self {
        StabilizationScaling::Scalar(velocity_scaling(gamma_u, nu, tau, h))
    }

    /// Velocity as in [`StabilizationScaling::scalar`], pressure
    /// `-gamma_p tau / (nu + h^2 / tau)`.
    pub fn flow(gamma_u: f64, gamma_p: f64, nu: f64, tau: f64, h: f64) -> Self {
        StabilizationScaling::Flow {
            velocity: velocity_scaling(gamma_u, nu, tau, h),
            pressure: -gamma_p * tau / (nu + h * h / tau),
        }
    }

    /// Block names and scalings, in the order the problem lists its stabilized blocks.
    pub fn blocks(&self) -> Vec<(&'static str, f64)> {
        match *self {
            StabilizationScaling::Scalar(s) => vec![("scalar", s)],
            StabilizationScaling::Flow { velocity, pressure } => vec![("velocity", velocity), ("pressure", pressure)],
        }
    }

    /// Every scaling must be non-zero when stabilization is enabled.
    pub fn validate(&self) -> EngineResult<()> {
        for (block, scaling) in self.blocks() {
            if scaling == 0.0 {
                return Err(EngineError::ZeroStabilizationScaling { block: block.to_string() });
            }
        }
        Ok(())
    }
}

fn velocity_scaling(gamma_u: f64, nu: f64, tau: f64, h: f64) -> f64 {
    gamma_u * (1.0 + tau * nu / (h * h))
}
