// src/assembly/flow.rs

//! Time-dependent Stokes, Oseen and Navier-Stokes flow on a cut domain with
//! Taylor-Hood elements.
//!
//! Unknowns are ordered `[u_x | u_y | p | lambda]`, where the optional
//! multiplier `lambda` fixes the mean pressure when no part of the domain
//! touches a do-nothing boundary.
//!
//! The convection term `(u* . grad u, v)` is linearized: `u*` is either a
//! given field or built from the stored solutions, so every step stays one
//! linear solve.

use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::fields::analytic::{
    zero_velocity, Constant, EthierSteinmanForcing, EthierSteinmanPressure, EthierSteinmanVelocity,
    NavierStokesForcing, ParabolicFlow,
};
use crate::fields::{Field, TimeFunction};
use crate::geometry::{GeometryState, QuadratureService};
use crate::kernel::{double_contract, LagrangeBasis, Matrix, Point, ShapeValues, Tensor1, Tensor2, Vector};
use crate::meshing::{BoundaryId, DofHandler, Mesh};
use crate::norms::{FieldErrors, NormTriple};
use crate::solver::Accumulate;
use crate::stabilization::{Extractor, JumpStabilization, StabilizationScaling};
use crate::time::BdfCoefficients;
use crate::SolvedFields;

use super::{
    collect_regions, evaluate, evaluate_gradient, gather, nitsche_penalty, CellRegions, CutProblem,
    StabilizedBlock, StepContext,
};

/// Data of a flow problem.
pub struct FlowFunctions {
    pub rhs: Box<dyn Field<Tensor1>>,
    pub boundary_values: Box<dyn Field<Tensor1>>,
    pub analytic_velocity: Box<dyn Field<Tensor1>>,
    pub analytic_pressure: Box<dyn Field<f64>>,
}

impl FlowFunctions {
    /// Ethier-Steinman type solution with matching forcing.
    pub fn ethier_steinman(nu: f64) -> Self {
        FlowFunctions {
            rhs: Box::new(EthierSteinmanForcing { nu }),
            boundary_values: Box::new(EthierSteinmanVelocity),
            analytic_velocity: Box::new(EthierSteinmanVelocity),
            analytic_pressure: Box::new(EthierSteinmanPressure),
        }
    }

    /// Ethier-Steinman solution of the Navier-Stokes equations.
    pub fn navier_stokes_ethier_steinman(nu: f64) -> Self {
        FlowFunctions { rhs: Box::new(NavierStokesForcing { nu }), ..Self::ethier_steinman(nu) }
    }

    /// Channel flow driven by the parabolic inflow. There is no exact
    /// solution, so the reported errors are the norms of the discrete flow.
    pub fn parabolic_inflow(inflow: ParabolicFlow) -> Self {
        FlowFunctions { boundary_values: Box::new(inflow), ..Self::at_rest() }
    }

    /// Fluid at rest with zero pressure.
    pub fn at_rest() -> Self {
        FlowFunctions {
            rhs: Box::new(zero_velocity()),
            boundary_values: Box::new(zero_velocity()),
            analytic_velocity: Box::new(zero_velocity()),
            analytic_pressure: Box::new(Constant(0.0)),
        }
    }
}

/// How the convection velocity is built from the stored solutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvectionScheme {
    /// The newest stored solution. First order in time.
    Lagged,
    /// The stored solutions extrapolated to the new time level, second order
    /// with BDF-2.
    #[default]
    Extrapolated,
}

/// The convection velocity `u*` of the term `(u* . grad u, v)`.
#[derive(Debug, Default)]
pub enum Convection {
    /// Stokes flow.
    #[default]
    None,
    /// A given velocity field (Oseen flow).
    Prescribed(TimeFunction<Tensor1>),
    /// Semi-implicit Navier-Stokes.
    FromHistory(ConvectionScheme),
}

/// Dof layout of the velocity/pressure pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowLayout {
    pub velocity: DofHandler,
    pub pressure: DofHandler,
    pub mean_constraint: bool,
}

impl FlowLayout {
    /// First global index of velocity component `component`.
    pub fn velocity_offset(&self, component: usize) -> usize {
        component * self.velocity.n_dofs()
    }

    pub fn pressure_offset(&self) -> usize {
        2 * self.velocity.n_dofs()
    }

    /// Global index of the mean-pressure multiplier, if present.
    pub fn multiplier(&self) -> Option<usize> {
        self.mean_constraint.then(|| self.pressure_offset() + self.pressure.n_dofs())
    }

    pub fn n_dofs(&self) -> usize {
        self.pressure_offset() + self.pressure.n_dofs() + usize::from(self.mean_constraint)
    }
}

/// Flow problem with Nitsche boundary conditions and velocity/pressure ghost
/// penalties. Stokes flow unless a [`Convection`] is set.
pub struct StokesProblem {
    order: usize,
    nu: f64,
    gamma_u: f64,
    gamma_p: f64,
    do_nothing_id: Option<BoundaryId>,
    velocity_basis: LagrangeBasis,
    pressure_basis: LagrangeBasis,
    rhs: TimeFunction<Tensor1>,
    boundary_values: TimeFunction<Tensor1>,
    analytic_velocity: TimeFunction<Tensor1>,
    analytic_pressure: TimeFunction<f64>,
    convection: Convection,
}

/// Local dof indices of one cell: velocity shape functions first (per component), then pressure.
struct CellDofs {
    velocity: Vec<usize>,
    pressure: Vec<usize>,
    global: Vec<usize>,
}

impl StokesProblem {
    pub fn new(config: &SimulationConfig, functions: FlowFunctions) -> Self {
        StokesProblem {
            order: config.element_order,
            nu: config.nu,
            gamma_u: config.gamma_u,
            gamma_p: config.gamma_p,
            do_nothing_id: config.do_nothing_id,
            velocity_basis: LagrangeBasis::new(config.element_order + 1),
            pressure_basis: LagrangeBasis::new(config.element_order),
            rhs: TimeFunction::from_box(functions.rhs),
            boundary_values: TimeFunction::from_box(functions.boundary_values),
            analytic_velocity: TimeFunction::from_box(functions.analytic_velocity),
            analytic_pressure: TimeFunction::from_box(functions.analytic_pressure),
            convection: Convection::None,
        }
    }

    pub fn with_convection(mut self, convection: Convection) -> Self {
        self.convection = convection;
        self
    }

    pub fn convection(&self) -> &Convection {
        &self.convection
    }

    /// Convection velocity at `p`, or `None` for Stokes flow. `history`
    /// holds the local velocity coefficients of the stored solutions, newest
    /// first.
    fn convection_at(
        &self,
        bdf: &BdfCoefficients,
        shape: &ShapeValues,
        p: &Point,
        history: &[(Vec<f64>, Vec<f64>)],
    ) -> Option<Tensor1> {
        let weights = match &self.convection {
            Convection::None => return None,
            Convection::Prescribed(field) => return Some(field.value(p)),
            Convection::FromHistory(ConvectionScheme::Lagged) => &[1.0][..],
            Convection::FromHistory(ConvectionScheme::Extrapolated) => bdf.extrapolation(),
        };
        Some(
            weights
                .iter()
                .zip(history)
                .map(|(c, (ux, uy))| Self::velocity_at(shape, ux, uy).0 * *c)
                .sum(),
        )
    }

    /// Whether some active cell has part of a do-nothing face inside the domain.
    fn touches_do_nothing(&self, geometry: &GeometryState) -> bool {
        let Some(id) = self.do_nothing_id else {
            return false;
        };
        let mesh = geometry.mesh();
        geometry.active_cells().into_iter().any(|cell| {
            mesh.boundary_faces(cell)
                .iter()
                .any(|face| face.boundary_id == id && geometry.face_touches_domain(cell, face.direction))
        })
    }

    fn cell_dofs(&self, mesh: &Mesh, layout: &FlowLayout, cell: usize) -> Option<CellDofs> {
        let velocity = layout.velocity.cell_dofs(mesh, cell)?;
        let pressure = layout.pressure.cell_dofs(mesh, cell)?;
        let global = (0..2)
            .flat_map(|c| velocity.iter().map(move |&d| d + layout.velocity_offset(c)))
            .chain(pressure.iter().map(|&d| d + layout.pressure_offset()))
            .collect();
        Some(CellDofs { velocity, pressure, global })
    }

    /// Symmetric Nitsche terms for the velocity and the matching pressure
    /// coupling at one boundary point.
    #[allow(clippy::too_many_arguments)]
    fn add_nitsche(
        &self,
        velocity: &ShapeValues,
        pressure: &ShapeValues,
        p: &Point,
        weight: f64,
        normal: &Tensor1,
        tau: f64,
        mu: f64,
        matrix: &mut Matrix,
        rhs: &mut Vector,
    ) {
        let g = self.boundary_values.value(p);
        let nv = velocity.values.len();
        let np = pressure.values.len();
        let nu = self.nu;
        let w = tau * weight;
        for c in 0..2 {
            for i in 0..nv {
                let (phi_i, dn_i) = (velocity.values[i], velocity.gradients[i].dot(normal));
                let row = c * nv + i;
                for j in 0..nv {
                    let (phi_j, dn_j) = (velocity.values[j], velocity.gradients[j].dot(normal));
                    matrix[(row, c * nv + j)] += w * (-nu * dn_j * phi_i - nu * dn_i * phi_j + mu * phi_i * phi_j);
                }
                for m in 0..np {
                    let coupling = w * normal[c] * phi_i * pressure.values[m];
                    matrix[(row, 2 * nv + m)] += coupling;
                    matrix[(2 * nv + m, row)] += coupling;
                }
                rhs[row] += w * g[c] * (mu * phi_i - nu * dn_i);
            }
        }
        let g_n = g.dot(normal);
        for m in 0..np {
            rhs[2 * nv + m] += w * g_n * pressure.values[m];
        }
    }

    fn velocity_at(shape: &ShapeValues, ux: &[f64], uy: &[f64]) -> (Tensor1, Tensor2) {
        let value = Tensor1::new(evaluate(&shape.values, ux), evaluate(&shape.values, uy));
        let (gx, gy) = (evaluate_gradient(&shape.gradients, ux), evaluate_gradient(&shape.gradients, uy));
        (value, Tensor2::new(gx.x, gx.y, gy.x, gy.y))
    }
}

impl CutProblem for StokesProblem {
    type Layout = FlowLayout;

    fn kind(&self) -> SolvedFields {
        SolvedFields::Flow
    }

    fn name(&self) -> &'static str {
        match self.convection {
            Convection::None => "stokes",
            Convection::Prescribed(_) => "oseen",
            Convection::FromHistory(_) => "navier-stokes",
        }
    }

    fn set_function_times(&mut self, t: f64) {
        self.rhs.set_time(t);
        self.boundary_values.set_time(t);
        self.analytic_velocity.set_time(t);
        self.analytic_pressure.set_time(t);
        if let Convection::Prescribed(field) = &mut self.convection {
            field.set_time(t);
        }
    }

    fn distribute_dofs(&self, geometry: &GeometryState) -> FlowLayout {
        let mesh = geometry.mesh();
        let active = |cell: usize| geometry.is_active(cell);
        FlowLayout {
            velocity: DofHandler::distribute(mesh, self.order + 1, active),
            pressure: DofHandler::distribute(mesh, self.order, active),
            mean_constraint: !self.touches_do_nothing(geometry),
        }
    }

    fn n_dofs(&self, layout: &FlowLayout) -> usize {
        layout.n_dofs()
    }

    fn transfer(&self, mesh: &Mesh, from: &FlowLayout, to: &FlowLayout, values: &Vector) -> Vector {
        let mut out = Vector::zeros(to.n_dofs());
        let (nv_from, nv_to) = (from.velocity.n_dofs(), to.velocity.n_dofs());
        for c in 0..2 {
            let old = &values.as_slice()[from.velocity_offset(c)..from.velocity_offset(c) + nv_from];
            let moved = to.velocity.transfer(mesh, &from.velocity, old);
            out.rows_mut(to.velocity_offset(c), nv_to).copy_from_slice(&moved);
        }
        let old = &values.as_slice()[from.pressure_offset()..from.pressure_offset() + from.pressure.n_dofs()];
        let moved = to.pressure.transfer(mesh, &from.pressure, old);
        out.rows_mut(to.pressure_offset(), to.pressure.n_dofs()).copy_from_slice(&moved);
        if let (Some(old), Some(new)) = (from.multiplier(), to.multiplier()) {
            out[new] = values[old];
        }
        out
    }

    fn interpolate_initial(&mut self, geometry: &GeometryState, layout: &FlowLayout, t: f64) -> Vector {
        self.set_function_times(t);
        let mesh = geometry.mesh();
        let mut out = Vector::zeros(layout.n_dofs());
        for c in 0..2 {
            let values = layout.velocity.interpolate(mesh, |p| self.boundary_values.value(p)[c]);
            out.rows_mut(layout.velocity_offset(c), values.len()).copy_from_slice(&values);
        }
        let values = layout.pressure.interpolate(mesh, |p| self.analytic_pressure.value(p));
        out.rows_mut(layout.pressure_offset(), values.len()).copy_from_slice(&values);
        out
    }

    fn stabilization_scaling(&self, h: f64, tau: f64) -> StabilizationScaling {
        StabilizationScaling::flow(self.gamma_u, self.gamma_p, self.nu, tau, h)
    }

    fn stabilized_blocks<'a>(&self, layout: &'a FlowLayout, scaling: &StabilizationScaling) -> Vec<StabilizedBlock<'a>> {
        let StabilizationScaling::Flow { velocity, pressure } = *scaling else {
            return Vec::new();
        };
        let mut velocity_stab = JumpStabilization::new("velocity", self.order + 1);
        velocity_stab.set_extractor(Extractor::Vector {
            offsets: vec![layout.velocity_offset(0), layout.velocity_offset(1)],
        });
        let mut pressure_stab = JumpStabilization::new("pressure", self.order);
        pressure_stab.set_extractor(Extractor::Scalar { offset: layout.pressure_offset() });
        vec![
            StabilizedBlock { operator: velocity_stab, dofs: &layout.velocity, scaling: velocity },
            StabilizedBlock { operator: pressure_stab, dofs: &layout.pressure, scaling: pressure },
        ]
    }

    fn assemble_cell(&self, ctx: &StepContext<'_>, layout: &FlowLayout, cell: usize, sink: &mut dyn Accumulate) {
        let mesh = ctx.geometry.mesh();
        let Some(dofs) = self.cell_dofs(mesh, layout, cell) else {
            return;
        };
        let regions = CellRegions::collect(ctx, cell, self.do_nothing_id);
        let g = mesh.cell_geometry(cell);
        let nv = dofs.velocity.len();
        let np = dofs.pressure.len();
        let n = 2 * nv + np;
        let (tau, nu) = (ctx.tau, self.nu);
        let leading = ctx.bdf.leading();
        let mu = nitsche_penalty(nu, self.order, mesh.h());
        let history: Vec<(Vec<f64>, Vec<f64>)> = ctx
            .history
            .iter()
            .map(|values| {
                (
                    gather(values, &dofs.velocity, layout.velocity_offset(0)),
                    gather(values, &dofs.velocity, layout.velocity_offset(1)),
                )
            })
            .collect();

        let mut matrix = Matrix::zeros(n, n);
        let mut rhs = Vector::zeros(n);
        let mut pressure_mean = Vector::zeros(np);

        // 1. Bulk: BDF mass, viscous and convective terms, pressure/divergence coupling.
        if let Some(bulk) = &regions.bulk {
            for (p, w) in bulk.iter() {
                let sv = self.velocity_basis.shape(&g, p);
                let sp = self.pressure_basis.shape(&g, p);
                let past: Tensor1 = ctx
                    .bdf
                    .history()
                    .iter()
                    .zip(&history)
                    .map(|(c, (ux, uy))| Self::velocity_at(&sv, ux, uy).0 * *c)
                    .sum();
                let source = self.rhs.value(p) * tau - past;
                let advection: Vec<f64> = match self.convection_at(ctx.bdf, &sv, p, &history) {
                    Some(wind) => sv.gradients.iter().map(|grad| wind.dot(grad)).collect(),
                    None => vec![0.0; nv],
                };

                for i in 0..nv {
                    let (phi_i, grad_i) = (sv.values[i], sv.gradients[i]);
                    for j in 0..nv {
                        let a = w
                            * (leading * phi_i * sv.values[j]
                                + tau * nu * grad_i.dot(&sv.gradients[j])
                                + tau * advection[j] * phi_i);
                        matrix[(i, j)] += a;
                        matrix[(nv + i, nv + j)] += a;
                    }
                    for c in 0..2 {
                        for m in 0..np {
                            let b = -tau * w * grad_i[c] * sp.values[m];
                            matrix[(c * nv + i, 2 * nv + m)] += b;
                            matrix[(2 * nv + m, c * nv + i)] += b;
                        }
                        rhs[c * nv + i] += w * source[c] * phi_i;
                    }
                }
                if layout.mean_constraint {
                    for m in 0..np {
                        pressure_mean[m] += w * sp.values[m];
                    }
                }
            }
        }

        // 2. Nitsche on the immersed boundary and on the outer faces.
        if let Some(surface) = &regions.surface {
            for (p, w, normal) in surface.iter() {
                let sv = self.velocity_basis.shape(&g, p);
                let sp = self.pressure_basis.shape(&g, p);
                self.add_nitsche(&sv, &sp, p, w, normal, tau, mu, &mut matrix, &mut rhs);
            }
        }
        for (face, rule) in &regions.boundary {
            for (p, w) in rule.iter() {
                let sv = self.velocity_basis.shape(&g, p);
                let sp = self.pressure_basis.shape(&g, p);
                self.add_nitsche(&sv, &sp, p, w, &face.normal, tau, mu, &mut matrix, &mut rhs);
            }
        }

        sink.add_matrix(&dofs.global, &dofs.global, &matrix);
        sink.add_vector(&dofs.global, &rhs);

        // 3. Mean-pressure constraint row and column.
        if let Some(lambda) = layout.multiplier() {
            let pressure_global: Vec<usize> = dofs.pressure.iter().map(|&d| d + layout.pressure_offset()).collect();
            let row = Matrix::from_row_slice(1, np, pressure_mean.as_slice());
            sink.add_matrix(&[lambda], &pressure_global, &row);
            sink.add_matrix(&pressure_global, &[lambda], &row.transpose());
        }
    }

    fn compute_errors(
        &self,
        geometry: &GeometryState,
        quadrature: &dyn QuadratureService,
        layout: &FlowLayout,
        solution: &Vector,
    ) -> FieldErrors {
        let mesh = geometry.mesh();
        let cells: Vec<_> = geometry
            .active_cells()
            .into_iter()
            .filter_map(|cell| {
                let dofs = self.cell_dofs(mesh, layout, cell)?;
                let bulk = collect_regions(geometry, quadrature, cell, None).bulk?;
                Some((cell, dofs, bulk))
            })
            .collect();

        // 1. Domain means of the discrete and exact pressure.
        let (mut area, mut mean_h, mut mean_exact) = (0.0, 0.0, 0.0);
        for (cell, dofs, bulk) in &cells {
            let g = mesh.cell_geometry(*cell);
            let ph = gather(solution, &dofs.pressure, layout.pressure_offset());
            for (p, w) in bulk.iter() {
                let sp = self.pressure_basis.shape(&g, p);
                area += w;
                mean_h += w * evaluate(&sp.values, &ph);
                mean_exact += w * self.analytic_pressure.value(p);
            }
        }
        if area > 0.0 {
            mean_h /= area;
            mean_exact /= area;
        }

        // 2. Velocity and mean-free pressure errors.
        let (mut u_l2, mut u_semi, mut p_l2, mut p_semi) = (0.0, 0.0, 0.0, 0.0);
        for (cell, dofs, bulk) in &cells {
            let g = mesh.cell_geometry(*cell);
            let ux = gather(solution, &dofs.velocity, layout.velocity_offset(0));
            let uy = gather(solution, &dofs.velocity, layout.velocity_offset(1));
            let ph = gather(solution, &dofs.pressure, layout.pressure_offset());
            for (p, w) in bulk.iter() {
                let sv = self.velocity_basis.shape(&g, p);
                let sp = self.pressure_basis.shape(&g, p);
                let (u, grad_u) = Self::velocity_at(&sv, &ux, &uy);
                let eu = u - self.analytic_velocity.value(p);
                let egu = grad_u - self.analytic_velocity.gradient(p);
                u_l2 += w * eu.norm_squared();
                u_semi += w * double_contract(&egu, &egu);

                let ep = (evaluate(&sp.values, &ph) - mean_h) - (self.analytic_pressure.value(p) - mean_exact);
                let egp = evaluate_gradient(&sp.gradients, &ph) - self.analytic_pressure.gradient(p);
                p_l2 += w * ep * ep;
                p_semi += w * egp.norm_squared();
            }
        }

        FieldErrors::Flow {
            velocity: NormTriple::from_squares(u_l2, u_semi),
            pressure: NormTriple::from_squares(p_l2, p_semi),
        }
    }
}
