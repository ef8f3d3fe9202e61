// src/time/mod.rs

//! BDF-1/BDF-2 time integration of a [`CutProblem`] on a moving domain.
//!
//! The [`TimeIntegrator`] owns everything that lives across steps: the BDF
//! coefficients, the solution history, the error samples and the provenance
//! ledger. Each step re-classifies the mesh, transfers stale history entries
//! onto the current dof layout, assembles, solves and records the errors. A
//! failed step leaves the integrator [`IntegratorState::Aborted`].

use std::collections::VecDeque;

use log::{debug, info};

use crate::assembly::{assemble_system, AssemblySettings, CutProblem, StepContext};
use crate::geometry::{GeometryState, QuadratureService, SubdivisionQuadrature};
use crate::kernel::Vector;
use crate::norms::{ErrorAccumulator, ErrorSample, TimeErrorSummary};
use crate::provenance::ProvenanceChain;
use crate::report::ReportWriter;
use crate::solver::{condition_number, LinearSolver, SparseLuSolver};
use crate::{EngineError, EngineResult};

/// Coefficients of the BDF time derivative
/// `(leading * u^{n+1} + sum_k history[k] * u^{n-k}) / tau`.
#[derive(Debug, Clone, PartialEq)]
pub struct BdfCoefficients {
    order: usize,
    leading: f64,
    history: Vec<f64>,
    extrapolation: Vec<f64>,
}

impl BdfCoefficients {
    pub fn for_order(order: usize) -> EngineResult<Self> {
        let (leading, history, extrapolation) = match order {
            1 => (1.0, vec![-1.0], vec![1.0]),
            2 => (1.5, vec![-2.0, 0.5], vec![2.0, -1.0]),
            _ => return Err(EngineError::InvalidBdfOrder(order)),
        };
        Ok(BdfCoefficients { order, leading, history, extrapolation })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn leading(&self) -> f64 {
        self.leading
    }

    /// Coefficients of the previous solutions, newest first.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Weights of the previous solutions, newest first, that extrapolate them
    /// to the new time level with the accuracy of the scheme.
    pub fn extrapolation(&self) -> &[f64] {
        &self.extrapolation
    }

    /// All coefficients, `[leading, history...]`.
    pub fn to_vec(&self) -> Vec<f64> {
        std::iter::once(self.leading).chain(self.history.iter().copied()).collect()
    }
}

/// One stored solution with the layout it is expressed in.
#[derive(Debug, Clone)]
pub struct HistoryEntry<L> {
    pub time: f64,
    pub layout: L,
    pub values: Vector,
}

/// The most recent solutions, oldest first, at most `window` of them.
#[derive(Debug, Clone)]
pub struct SolutionHistory<L> {
    window: usize,
    entries: VecDeque<HistoryEntry<L>>,
}

impl<L> SolutionHistory<L> {
    pub fn new(window: usize) -> Self {
        SolutionHistory { window, entries: VecDeque::with_capacity(window + 1) }
    }

    /// Appends `entry`, dropping the oldest entry beyond the window.
    pub fn push(&mut self, entry: HistoryEntry<L>) {
        self.entries.push_back(entry);
        while self.entries.len() > self.window {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.window
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn latest(&self) -> Option<&HistoryEntry<L>> {
        self.entries.back()
    }

    /// Entries from newest to oldest.
    pub fn newest_first(&self) -> impl Iterator<Item = &HistoryEntry<L>> + '_ {
        self.entries.iter().rev()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut HistoryEntry<L>> + '_ {
        self.entries.iter_mut()
    }
}

/// How the history is filled before the first solved step.
#[derive(Debug, Clone, Default)]
pub enum Startup {
    /// Interpolate the boundary data at every startup time.
    #[default]
    Interpolate,
    /// Caller-computed solutions for the most recent startup times, most
    /// recent last. Missing older entries are interpolated.
    Supplied(Vec<Vector>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorState {
    Uninitialized,
    Startup,
    Stepping,
    Finished,
    /// A step failed; the run cannot be continued or finished.
    Aborted,
}

/// Run-level switches of the integrator.
#[derive(Debug, Clone, Copy)]
pub struct IntegratorSettings {
    pub tau: f64,
    pub stabilized: bool,
    pub parallel: bool,
}

/// Multistep driver for one problem on one geometry.
pub struct TimeIntegrator<P: CutProblem> {
    problem: P,
    geometry: GeometryState,
    quadrature: Box<dyn QuadratureService>,
    solver: Box<dyn LinearSolver>,
    settings: IntegratorSettings,
    state: IntegratorState,
    bdf: Option<BdfCoefficients>,
    history: SolutionHistory<P::Layout>,
    level: usize,
    errors: ErrorAccumulator,
    provenance: ProvenanceChain,
    report: Option<ReportWriter>,
    condition_numbers: Option<Vec<(usize, f64)>>,
}

impl<P: CutProblem> TimeIntegrator<P> {
    pub fn new(problem: P, geometry: GeometryState, settings: IntegratorSettings) -> Self {
        TimeIntegrator {
            problem,
            geometry,
            quadrature: Box::new(SubdivisionQuadrature::default()),
            solver: Box::new(SparseLuSolver::default()),
            settings,
            state: IntegratorState::Uninitialized,
            bdf: None,
            history: SolutionHistory::new(0),
            level: 0,
            errors: ErrorAccumulator::new(settings.tau),
            provenance: ProvenanceChain::new(),
            report: None,
            condition_numbers: None,
        }
    }

    pub fn with_solver(mut self, solver: impl LinearSolver + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    pub fn with_quadrature(mut self, quadrature: impl QuadratureService + 'static) -> Self {
        self.quadrature = Box::new(quadrature);
        self
    }

    /// Writes one report row per solved step, and the run row on finish.
    pub fn with_report(mut self, report: ReportWriter) -> Self {
        self.report = Some(report);
        self
    }

    /// Records the condition number of every assembled matrix. Uses a dense
    /// SVD, so only practical for small systems.
    pub fn with_condition_numbers(mut self) -> Self {
        self.condition_numbers = Some(Vec::new());
        self
    }

    /// Runs `num_steps` solved steps of BDF-`order` after the startup phase.
    pub fn run(&mut self, order: usize, num_steps: usize, startup: Startup) -> EngineResult<TimeErrorSummary> {
        self.start(order, startup)?;
        self.advance(num_steps)?;
        self.finish()
    }

    /// Selects the coefficients and fills the history up to the BDF order.
    pub fn start(&mut self, order: usize, startup: Startup) -> EngineResult<()> {
        if self.state != IntegratorState::Uninitialized {
            return Err(EngineError::InvalidState(format!("start called in state {:?}", self.state)));
        }
        let bdf = BdfCoefficients::for_order(order)?;
        let supplied = match startup {
            Startup::Interpolate => Vec::new(),
            Startup::Supplied(vectors) => vectors,
        };
        if supplied.len() > order {
            return Err(EngineError::TooManyStartupSolutions { supplied: supplied.len(), order });
        }

        self.state = IntegratorState::Startup;
        info!("BDF-{} startup with {} supplied solution(s)", order, supplied.len());
        self.history = SolutionHistory::new(order);
        let first_supplied = order - supplied.len();
        let mut supplied = supplied.into_iter();
        for index in 0..order {
            let time = index as f64 * self.settings.tau;
            self.geometry.set_time(time);
            self.problem.set_function_times(time);
            let layout = self.problem.distribute_dofs(&self.geometry);
            let expected = self.problem.n_dofs(&layout);

            let values = match (index >= first_supplied).then(|| supplied.next()).flatten() {
                Some(values) if values.len() != expected => {
                    return Err(EngineError::StartupSizeMismatch { index, expected, actual: values.len(), time });
                }
                Some(values) => values,
                None => self.problem.interpolate_initial(&self.geometry, &layout, time),
            };
            debug!("startup entry {} at t = {} ({} unknowns)", index, time, expected);
            self.history.push(HistoryEntry { time, layout, values });
        }
        self.level = order - 1;
        self.bdf = Some(bdf);
        self.state = IntegratorState::Stepping;
        Ok(())
    }

    /// Solves `num_steps` further steps.
    pub fn advance(&mut self, num_steps: usize) -> EngineResult<()> {
        if self.state != IntegratorState::Stepping {
            return Err(EngineError::InvalidState(format!("advance called in state {:?}", self.state)));
        }
        for _ in 0..num_steps {
            if let Err(e) = self.step() {
                self.state = IntegratorState::Aborted;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Ends the run and combines the error samples into time norms.
    pub fn finish(&mut self) -> EngineResult<TimeErrorSummary> {
        if self.state != IntegratorState::Stepping {
            return Err(EngineError::InvalidState(format!("finish called in state {:?}", self.state)));
        }
        self.state = IntegratorState::Finished;
        let summary = self.errors.finalize()?;
        info!("run finished after {} solved steps: {}", summary.steps, summary);
        if let Some(report) = self.report.as_mut() {
            report.record_run(&summary)?;
        }
        Ok(summary)
    }

    fn step(&mut self) -> EngineResult<()> {
        let step = self.level + 1;
        let tau = self.settings.tau;
        let time = step as f64 * tau;

        // 1. Move the geometry and the data to the new time.
        self.geometry.set_time(time);
        self.problem.set_function_times(time);
        let layout = self.problem.distribute_dofs(&self.geometry);

        // 2. Bring every stored solution onto the current layout.
        let mesh = self.geometry.mesh();
        for entry in self.history.entries_mut() {
            if entry.layout != layout {
                debug!("transferring solution at t = {} onto the new layout", entry.time);
                entry.values = self.problem.transfer(mesh, &entry.layout, &layout, &entry.values);
                entry.layout = layout.clone();
            }
        }
        let past: Vec<Vector> = self.history.newest_first().map(|entry| entry.values.clone()).collect();

        // 3. Assemble and solve.
        let bdf = self.bdf.as_ref().ok_or_else(|| EngineError::InvalidState("no BDF coefficients".into()))?;
        let ctx = StepContext {
            geometry: &self.geometry,
            quadrature: self.quadrature.as_ref(),
            bdf,
            tau,
            history: &past,
        };
        let settings = AssemblySettings { stabilized: self.settings.stabilized, parallel: self.settings.parallel };
        let system = assemble_system(&self.problem, &ctx, &layout, settings)?;
        let (matrix, rhs) = system.into_parts();
        if let Some(record) = self.condition_numbers.as_mut() {
            if let Some(kappa) = condition_number(&matrix) {
                info!("step {}: condition number {:.4e}", step, kappa);
                record.push((step, kappa));
            }
        }
        let solution = self
            .solver
            .solve(&matrix, &rhs)
            .map_err(|e| EngineError::SolveFailed { step, time, reason: e.to_string() })?;

        // 4. Record errors, provenance and report.
        let errors = self.problem.compute_errors(&self.geometry, self.quadrature.as_ref(), &layout, &solution);
        let sample = ErrorSample { step, time, h: mesh.h(), tau, errors };
        info!("step {} (t = {:.4}): {}", step, time, sample.errors);
        if let Some(report) = self.report.as_mut() {
            report.record_step(&sample)?;
        }
        self.errors.record(sample)?;
        self.provenance.add_step(step, time, solution.as_slice())?;

        self.history.push(HistoryEntry { time, layout, values: solution });
        self.level = step;
        Ok(())
    }

    pub fn state(&self) -> IntegratorState {
        self.state
    }

    pub fn bdf(&self) -> Option<&BdfCoefficients> {
        self.bdf.as_ref()
    }

    pub fn history(&self) -> &SolutionHistory<P::Layout> {
        &self.history
    }

    /// Latest solution, if any.
    pub fn solution(&self) -> Option<&Vector> {
        self.history.latest().map(|entry| &entry.values)
    }

    /// Time of the latest stored solution.
    pub fn time(&self) -> f64 {
        self.history.latest().map_or(0.0, |entry| entry.time)
    }

    /// `(step, condition number)` pairs, when enabled.
    pub fn condition_numbers(&self) -> &[(usize, f64)] {
        self.condition_numbers.as_deref().unwrap_or(&[])
    }

    pub fn errors(&self) -> &ErrorAccumulator {
        &self.errors
    }

    pub fn provenance(&self) -> &ProvenanceChain {
        &self.provenance
    }

    pub fn geometry(&self) -> &GeometryState {
        &self.geometry
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }
}
