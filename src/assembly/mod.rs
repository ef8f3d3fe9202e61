// src/assembly/mod.rs

//! Local assembly of the cut finite element systems.
//!
//! A [`CutProblem`] knows its unknowns and its weak form. Given a
//! [`StepContext`] it writes the bulk, Nitsche and constraint contributions of
//! one cell into an [`Accumulate`] sink. [`assemble_system`] drives it over the
//! active cells, in parallel with rayon when asked to, and adds the ghost
//! penalty of every stabilized block.

pub mod flow;
pub mod scalar;

use log::{debug, trace};
use rayon::prelude::*;

use crate::geometry::{GeometryState, Location, QuadratureRule, QuadratureService, SurfaceRule};
use crate::kernel::{Tensor1, Vector};
use crate::meshing::{BoundaryFace, BoundaryId, DofHandler, Mesh};
use crate::norms::FieldErrors;
use crate::solver::{Accumulate, ContributionBuffer, LinearSystem};
use crate::stabilization::{JumpStabilization, StabilizationScaling};
use crate::time::BdfCoefficients;
use crate::{EngineResult, SolvedFields};

pub use flow::{Convection, ConvectionScheme, FlowFunctions, FlowLayout, StokesProblem};
pub use scalar::{HeatProblem, ScalarFunctions};

/// Regions whose measure falls below this fraction of the cell measure are skipped.
const DEGENERATE_FRACTION: f64 = 1e-12;

/// Everything a cell assembly needs to know about the current step.
pub struct StepContext<'a> {
    pub geometry: &'a GeometryState,
    pub quadrature: &'a dyn QuadratureService,
    pub bdf: &'a BdfCoefficients,
    pub tau: f64,
    /// Previous solutions on the current layout, newest first, matching
    /// `bdf.history()`.
    pub history: &'a [Vector],
}

/// Quadrature over the parts of one cell that contribute to the system.
#[derive(Debug, Default)]
pub struct CellRegions {
    pub bulk: Option<QuadratureRule>,
    pub surface: Option<SurfaceRule>,
    pub boundary: Vec<(BoundaryFace, QuadratureRule)>,
}

impl CellRegions {
    /// Collects the regions of `cell`, leaving out zero-measure pieces and the
    /// faces of the do-nothing boundary.
    pub fn collect(ctx: &StepContext<'_>, cell: usize, do_nothing: Option<BoundaryId>) -> Self {
        collect_regions(ctx.geometry, ctx.quadrature, cell, do_nothing)
    }
}

pub(crate) fn collect_regions(
    geometry: &GeometryState,
    quadrature: &dyn QuadratureService,
    cell: usize,
    do_nothing: Option<BoundaryId>,
) -> CellRegions {
    let mesh = geometry.mesh();
    let g = mesh.cell_geometry(cell);
    let mut regions = CellRegions::default();
    if geometry.classify(cell) == Location::Outside {
        return regions;
    }

    let bulk = quadrature.inside(geometry, cell);
    if bulk.measure() > DEGENERATE_FRACTION * g.area() {
        regions.bulk = Some(bulk);
    } else {
        trace!("cell {}: skipping degenerate bulk region", cell);
    }

    if geometry.classify(cell) == Location::Cut {
        let surface = quadrature.surface(geometry, cell);
        if surface.measure() > DEGENERATE_FRACTION * mesh.h() {
            regions.surface = Some(surface);
        }
    }

    for face in mesh.boundary_faces(cell) {
        if Some(face.boundary_id) == do_nothing {
            continue;
        }
        let rule = quadrature.boundary_face(geometry, cell, &face);
        if rule.measure() > DEGENERATE_FRACTION * mesh.h() {
            regions.boundary.push((face, rule));
        }
    }
    regions
}

/// Nitsche penalty `5 nu p (p + 1) / h`.
pub fn nitsche_penalty(nu: f64, order: usize, h: f64) -> f64 {
    5.0 * nu * (order * (order + 1)) as f64 / h
}

/// A stabilized solution block: the operator, the dofs it acts on and its scaling.
#[derive(Debug, Clone)]
pub struct StabilizedBlock<'a> {
    pub operator: JumpStabilization,
    pub dofs: &'a DofHandler,
    pub scaling: f64,
}

/// A time-dependent problem discretized on the active part of the mesh.
pub trait CutProblem: Send + Sync {
    /// Layout of the global unknowns; equal layouts mean identical numbering.
    type Layout: Clone + PartialEq + Send + Sync + std::fmt::Debug;

    fn kind(&self) -> SolvedFields;

    /// Short name of the equations, used in logs and report file names.
    fn name(&self) -> &'static str;

    /// Binds every field of the problem to time `t`.
    fn set_function_times(&mut self, t: f64);

    fn distribute_dofs(&self, geometry: &GeometryState) -> Self::Layout;

    fn n_dofs(&self, layout: &Self::Layout) -> usize;

    /// Moves `values` from layout `from` onto layout `to`.
    fn transfer(&self, mesh: &Mesh, from: &Self::Layout, to: &Self::Layout, values: &Vector) -> Vector;

    /// Interpolates the initial data at time `t` into `layout`.
    fn interpolate_initial(&mut self, geometry: &GeometryState, layout: &Self::Layout, t: f64) -> Vector;

    fn stabilization_scaling(&self, h: f64, tau: f64) -> StabilizationScaling;

    /// Stabilized blocks in the order of [`StabilizationScaling::blocks`].
    fn stabilized_blocks<'a>(&self, layout: &'a Self::Layout, scaling: &StabilizationScaling) -> Vec<StabilizedBlock<'a>>;

    /// Adds the contributions of `cell` to `sink`.
    fn assemble_cell(&self, ctx: &StepContext<'_>, layout: &Self::Layout, cell: usize, sink: &mut dyn Accumulate);

    /// Spatial errors of `solution` against the analytic reference at the bound time.
    fn compute_errors(
        &self,
        geometry: &GeometryState,
        quadrature: &dyn QuadratureService,
        layout: &Self::Layout,
        solution: &Vector,
    ) -> FieldErrors;
}

/// How [`assemble_system`] runs.
#[derive(Debug, Clone, Copy)]
pub struct AssemblySettings {
    pub stabilized: bool,
    pub parallel: bool,
}

/// Builds the global system of one time step.
pub fn assemble_system<P: CutProblem>(
    problem: &P,
    ctx: &StepContext<'_>,
    layout: &P::Layout,
    settings: AssemblySettings,
) -> EngineResult<LinearSystem> {
    // 1. Stabilization constants are checked before anything is assembled.
    let scaling = problem.stabilization_scaling(ctx.geometry.mesh().h(), ctx.tau);
    let blocks = if settings.stabilized {
        scaling.validate()?;
        problem.stabilized_blocks(layout, &scaling)
    } else {
        Vec::new()
    };

    // 2. Cell and face contributions into worker-local buffers.
    let cells = ctx.geometry.active_cells();
    debug!(
        "assembling {} unknowns on {} active cells (stabilized: {}, parallel: {})",
        problem.n_dofs(layout),
        cells.len(),
        settings.stabilized,
        settings.parallel
    );

    let buffers: Vec<EngineResult<ContributionBuffer>> = if settings.parallel {
        cells
            .par_iter()
            .fold(
                || -> EngineResult<_> { Ok((ContributionBuffer::new(), blocks.clone())) },
                |acc, &cell| {
                    let (mut buffer, mut local) = acc?;
                    assemble_cell_into(problem, ctx, layout, cell, &mut buffer, &mut local)?;
                    Ok((buffer, local))
                },
            )
            .map(|acc| acc.map(|(buffer, _)| buffer))
            .collect()
    } else {
        let mut buffer = ContributionBuffer::new();
        let mut local = blocks.clone();
        let result = cells
            .iter()
            .try_for_each(|&cell| assemble_cell_into(problem, ctx, layout, cell, &mut buffer, &mut local));
        vec![result.map(|()| buffer)]
    };

    // 3. Additive merge into the global system.
    let mut system = LinearSystem::new(problem.n_dofs(layout));
    for buffer in buffers {
        buffer?.merge_into(&mut system);
    }
    Ok(system)
}

fn assemble_cell_into<P: CutProblem>(
    problem: &P,
    ctx: &StepContext<'_>,
    layout: &P::Layout,
    cell: usize,
    buffer: &mut ContributionBuffer,
    blocks: &mut [StabilizedBlock<'_>],
) -> EngineResult<()> {
    problem.assemble_cell(ctx, layout, cell, buffer);
    for block in blocks.iter_mut() {
        block.operator.compute_stabilization(ctx.geometry, block.dofs, cell);
        block.operator.add_stabilization_to_matrix(block.scaling, buffer)?;
    }
    Ok(())
}

/// Value of the finite element function with local coefficients `coeffs`.
#[inline]
pub(crate) fn evaluate(values: &[f64], coeffs: &[f64]) -> f64 {
    values.iter().zip(coeffs).map(|(v, c)| v * c).sum()
}

/// Gradient of the finite element function with local coefficients `coeffs`.
#[inline]
pub(crate) fn evaluate_gradient(gradients: &[Tensor1], coeffs: &[f64]) -> Tensor1 {
    gradients.iter().zip(coeffs).map(|(g, c)| g * *c).sum()
}

/// Local coefficients of `global` on `dofs`, shifted by `offset`.
pub(crate) fn gather(global: &Vector, dofs: &[usize], offset: usize) -> Vec<f64> {
    dofs.iter().map(|&d| global[offset + d]).collect()
}
