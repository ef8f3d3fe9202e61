// src/assembly/scalar.rs

//! Scalar diffusion `u_t - nu lap u = f` on a cut domain.

use crate::config::SimulationConfig;
use crate::fields::analytic::{Constant, HeatForcing, HeatSolution};
use crate::fields::{Field, TimeFunction};
use crate::geometry::{GeometryState, QuadratureService};
use crate::kernel::{LagrangeBasis, Matrix, Point, ShapeValues, Tensor1, Vector};
use crate::meshing::{BoundaryId, DofHandler, Mesh};
use crate::norms::{FieldErrors, NormTriple};
use crate::solver::Accumulate;
use crate::stabilization::{JumpStabilization, StabilizationScaling};
use crate::SolvedFields;

use super::{
    collect_regions, evaluate, evaluate_gradient, gather, nitsche_penalty, CellRegions, CutProblem,
    StabilizedBlock, StepContext,
};

/// Data of a scalar problem: forcing, Dirichlet data and the exact solution.
pub struct ScalarFunctions {
    pub rhs: Box<dyn Field<f64>>,
    pub boundary_values: Box<dyn Field<f64>>,
    pub analytic: Box<dyn Field<f64>>,
}

impl ScalarFunctions {
    /// `u = sin(pi x) sin(pi y) cos t` with matching forcing.
    pub fn sinusoid(nu: f64) -> Self {
        ScalarFunctions {
            rhs: Box::new(HeatForcing { nu }),
            boundary_values: Box::new(HeatSolution),
            analytic: Box::new(HeatSolution),
        }
    }

    /// `u = value` everywhere, no forcing.
    pub fn constant(value: f64) -> Self {
        ScalarFunctions {
            rhs: Box::new(Constant(0.0)),
            boundary_values: Box::new(Constant(value)),
            analytic: Box::new(Constant(value)),
        }
    }
}

/// Heat equation with Nitsche boundary conditions and one ghost-penalty block.
pub struct HeatProblem {
    order: usize,
    nu: f64,
    gamma_u: f64,
    do_nothing_id: Option<BoundaryId>,
    basis: LagrangeBasis,
    rhs: TimeFunction<f64>,
    boundary_values: TimeFunction<f64>,
    analytic: TimeFunction<f64>,
}

impl HeatProblem {
    pub fn new(config: &SimulationConfig, functions: ScalarFunctions) -> Self {
        HeatProblem {
            order: config.element_order,
            nu: config.nu,
            gamma_u: config.gamma_u,
            do_nothing_id: config.do_nothing_id,
            basis: LagrangeBasis::new(config.element_order),
            rhs: TimeFunction::from_box(functions.rhs),
            boundary_values: TimeFunction::from_box(functions.boundary_values),
            analytic: TimeFunction::from_box(functions.analytic),
        }
    }

    /// Symmetric Nitsche terms at one boundary quadrature point.
    #[allow(clippy::too_many_arguments)]
    fn add_nitsche(
        &self,
        shape: &ShapeValues,
        p: &Point,
        weight: f64,
        normal: &Tensor1,
        tau: f64,
        mu: f64,
        matrix: &mut Matrix,
        rhs: &mut Vector,
    ) {
        let g = self.boundary_values.value(p);
        let n = shape.values.len();
        let nu = self.nu;
        let w = tau * weight;
        for i in 0..n {
            let (phi_i, dn_i) = (shape.values[i], shape.gradients[i].dot(normal));
            for j in 0..n {
                let (phi_j, dn_j) = (shape.values[j], shape.gradients[j].dot(normal));
                matrix[(i, j)] += w * (-nu * dn_j * phi_i - nu * dn_i * phi_j + mu * phi_i * phi_j);
            }
            rhs[i] += w * g * (mu * phi_i - nu * dn_i);
        }
    }
}

impl CutProblem for HeatProblem {
    type Layout = DofHandler;

    fn kind(&self) -> SolvedFields {
        SolvedFields::Scalar
    }

    fn name(&self) -> &'static str {
        "heat"
    }

    fn set_function_times(&mut self, t: f64) {
        self.rhs.set_time(t);
        self.boundary_values.set_time(t);
        self.analytic.set_time(t);
    }

    fn distribute_dofs(&self, geometry: &GeometryState) -> DofHandler {
        DofHandler::distribute(geometry.mesh(), self.order, |cell| geometry.is_active(cell))
    }

    fn n_dofs(&self, layout: &DofHandler) -> usize {
        layout.n_dofs()
    }

    fn transfer(&self, mesh: &Mesh, from: &DofHandler, to: &DofHandler, values: &Vector) -> Vector {
        Vector::from_vec(to.transfer(mesh, from, values.as_slice()))
    }

    fn interpolate_initial(&mut self, geometry: &GeometryState, layout: &DofHandler, t: f64) -> Vector {
        self.set_function_times(t);
        Vector::from_vec(layout.interpolate(geometry.mesh(), |p| self.boundary_values.value(p)))
    }

    fn stabilization_scaling(&self, h: f64, tau: f64) -> StabilizationScaling {
        StabilizationScaling::scalar(self.gamma_u, self.nu, tau, h)
    }

    fn stabilized_blocks<'a>(&self, layout: &'a DofHandler, scaling: &StabilizationScaling) -> Vec<StabilizedBlock<'a>> {
        let operator = JumpStabilization::new("scalar", self.order);
        scaling
            .blocks()
            .into_iter()
            .take(1)
            .map(|(_, scaling)| StabilizedBlock { operator: operator.clone(), dofs: layout, scaling })
            .collect()
    }

    fn assemble_cell(&self, ctx: &StepContext<'_>, layout: &DofHandler, cell: usize, sink: &mut dyn Accumulate) {
        let mesh = ctx.geometry.mesh();
        let Some(dofs) = layout.cell_dofs(mesh, cell) else {
            return;
        };
        let regions = CellRegions::collect(ctx, cell, self.do_nothing_id);
        let g = mesh.cell_geometry(cell);
        let n = dofs.len();
        let (tau, nu) = (ctx.tau, self.nu);
        let leading = ctx.bdf.leading();
        let mu = nitsche_penalty(nu, self.order, mesh.h());
        let history: Vec<Vec<f64>> = ctx.history.iter().map(|values| gather(values, &dofs, 0)).collect();

        let mut matrix = Matrix::zeros(n, n);
        let mut rhs = Vector::zeros(n);

        // 1. Bulk: BDF mass, diffusion, forcing and history.
        if let Some(bulk) = &regions.bulk {
            for (p, w) in bulk.iter() {
                let shape = self.basis.shape(&g, p);
                let past: f64 = ctx
                    .bdf
                    .history()
                    .iter()
                    .zip(&history)
                    .map(|(c, coeffs)| c * evaluate(&shape.values, coeffs))
                    .sum();
                let source = tau * self.rhs.value(p) - past;
                for i in 0..n {
                    for j in 0..n {
                        matrix[(i, j)] += w
                            * (leading * shape.values[i] * shape.values[j]
                                + tau * nu * shape.gradients[i].dot(&shape.gradients[j]));
                    }
                    rhs[i] += w * source * shape.values[i];
                }
            }
        }

        // 2. Nitsche on the immersed boundary and on the outer faces.
        if let Some(surface) = &regions.surface {
            for (p, w, normal) in surface.iter() {
                let shape = self.basis.shape(&g, p);
                self.add_nitsche(&shape, p, w, normal, tau, mu, &mut matrix, &mut rhs);
            }
        }
        for (face, rule) in &regions.boundary {
            for (p, w) in rule.iter() {
                let shape = self.basis.shape(&g, p);
                self.add_nitsche(&shape, p, w, &face.normal, tau, mu, &mut matrix, &mut rhs);
            }
        }

        sink.add_matrix(&dofs, &dofs, &matrix);
        sink.add_vector(&dofs, &rhs);
    }

    fn compute_errors(
        &self,
        geometry: &GeometryState,
        quadrature: &dyn QuadratureService,
        layout: &DofHandler,
        solution: &Vector,
    ) -> FieldErrors {
        let mesh = geometry.mesh();
        let (mut l2, mut semi) = (0.0, 0.0);
        for cell in geometry.active_cells() {
            let Some(dofs) = layout.cell_dofs(mesh, cell) else {
                continue;
            };
            let Some(bulk) = collect_regions(geometry, quadrature, cell, None).bulk else {
                continue;
            };
            let g = mesh.cell_geometry(cell);
            let coeffs = gather(solution, &dofs, 0);
            for (p, w) in bulk.iter() {
                let shape = self.basis.shape(&g, p);
                let e = evaluate(&shape.values, &coeffs) - self.analytic.value(p);
                let de = evaluate_gradient(&shape.gradients, &coeffs) - self.analytic.gradient(p);
                l2 += w * e * e;
                semi += w * de.norm_squared();
            }
        }
        FieldErrors::Scalar(NormTriple::from_squares(l2, semi))
    }
}
