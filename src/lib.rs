// src/lib.rs

//! Cut finite element engine for moving domains.
//!
//! A [`Simulation`] turns a [`SimulationConfig`] into a [`TimeIntegrator`]
//! for one of the shipped problems (scalar diffusion, Stokes or Navier-Stokes
//! flow) on a
//! channel mesh cut by a level set. The integrator advances a BDF-1/BDF-2
//! scheme, reclassifying the mesh every step, and reports discrete-in-time
//! error norms against the analytic reference.

pub mod kernel;
pub mod meshing;
pub mod fields;
pub mod geometry;
pub mod solver;
pub mod stabilization;
pub mod assembly;
pub mod time;
pub mod norms;
pub mod report;
pub mod config;
pub mod provenance;

use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-exporting the main entry points for easier access by drivers.
pub use assembly::{Convection, ConvectionScheme, CutProblem, FlowFunctions, HeatProblem, ScalarFunctions, StokesProblem};
pub use config::SimulationConfig;
pub use geometry::{GeometryState, Location};
pub use kernel::{Matrix, Point, Vector};
pub use meshing::Mesh;
pub use norms::{ErrorAccumulator, ErrorSample, FieldErrors, TimeErrorSummary, TimeNorms};
pub use report::{write_error, write_header};
pub use time::{BdfCoefficients, IntegratorSettings, IntegratorState, Startup, TimeIntegrator};

// --- Return Types and Errors ---

/// Which unknowns a problem solves for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolvedFields {
    /// One scalar unknown.
    Scalar,
    /// Velocity and pressure.
    Flow,
}

impl fmt::Display for SolvedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolvedFields::Scalar => write!(f, "scalar"),
            SolvedFields::Flow => write!(f, "flow"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported BDF order {0}, expected 1 or 2")]
    InvalidBdfOrder(usize),
    #[error("stabilization scaling of the {block} block is zero")]
    ZeroStabilizationScaling { block: String },
    #[error("no error samples were recorded")]
    EmptyErrorHistory,
    #[error("startup solution {index} at t = {time} has {actual} entries, expected {expected}")]
    StartupSizeMismatch { index: usize, expected: usize, actual: usize, time: f64 },
    #[error("{supplied} startup solutions supplied for a BDF-{order} run")]
    TooManyStartupSolutions { supplied: usize, order: usize },
    #[error("error sample of kind {found} recorded in a {expected} run")]
    SampleKindMismatch { expected: SolvedFields, found: SolvedFields },
    #[error("invalid integrator state: {0}")]
    InvalidState(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("solve failed at step {step} (t = {time}): {reason}")]
    SolveFailed { step: usize, time: f64, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

// --- Simulation Facade ---

/// Builds integrators for one configuration.
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Simulation { config })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Channel mesh of the configured size and refinement.
    pub fn mesh(&self) -> EngineResult<Mesh> {
        Mesh::channel(self.config.half_length, self.config.radius, self.config.n_refines)
    }

    /// Integrator for `problem` on the domain `level_set < 0`.
    pub fn integrator<P: CutProblem>(
        &self,
        problem: P,
        level_set: impl fields::Field<f64> + 'static,
    ) -> EngineResult<TimeIntegrator<P>> {
        let config = &self.config;
        let mesh = self.mesh()?;
        info!(
            "{} problem on {}x{} cells (h = {:.4}, tau = {}, order {}, moving: {})",
            problem.name(),
            mesh.nx,
            mesh.ny,
            mesh.h(),
            config.tau,
            config.element_order,
            config.moving_domain
        );
        let geometry = GeometryState::new(mesh, level_set, config.moving_domain, config.subdivisions)?;
        let settings = IntegratorSettings { tau: config.tau, stabilized: config.stabilized, parallel: config.parallel };
        let report = report::ReportWriter::from_config(config, problem.name(), problem.kind())?;
        let integrator = TimeIntegrator::new(problem, geometry, settings).with_solver(config.linear_solver.build());
        Ok(match report {
            Some(writer) => integrator.with_report(writer),
            None => integrator,
        })
    }

    pub fn heat(
        &self,
        functions: ScalarFunctions,
        level_set: impl fields::Field<f64> + 'static,
    ) -> EngineResult<TimeIntegrator<HeatProblem>> {
        self.integrator(HeatProblem::new(&self.config, functions), level_set)
    }

    pub fn stokes(
        &self,
        functions: FlowFunctions,
        level_set: impl fields::Field<f64> + 'static,
    ) -> EngineResult<TimeIntegrator<StokesProblem>> {
        self.integrator(StokesProblem::new(&self.config, functions), level_set)
    }

    /// Semi-implicit Navier-Stokes: the convection velocity comes from the
    /// stored solutions as chosen by `scheme`.
    pub fn navier_stokes(
        &self,
        functions: FlowFunctions,
        scheme: ConvectionScheme,
        level_set: impl fields::Field<f64> + 'static,
    ) -> EngineResult<TimeIntegrator<StokesProblem>> {
        let problem = StokesProblem::new(&self.config, functions).with_convection(Convection::FromHistory(scheme));
        self.integrator(problem, level_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::analytic::{zero_velocity, Circle, MovingCircle};
    use crate::fields::Field;
    use crate::kernel::{Tensor1, Tensor2};
    use crate::solver::{LinearSolver, LinearSolverKind, SolveError, SparseMatrix};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    /// 4x4 cells on [-1.25, 1.25]^2 around the unit disc.
    fn disc_config() -> SimulationConfig {
        SimulationConfig {
            radius: 1.25,
            half_length: 1.25,
            n_refines: 2,
            tau: 0.25,
            ..SimulationConfig::default()
        }
    }

    fn unit_disc() -> Circle {
        Circle::interior(Point::origin(), 1.0)
    }

    /// Time step of refinement level `n_refines` in the studies below, which
    /// all end at `T = 0.25`.
    fn refined_disc_config(n_refines: u32, element_order: usize) -> (SimulationConfig, usize) {
        let steps = 1usize << (n_refines - 1);
        (SimulationConfig { n_refines, element_order, tau: 0.25 / steps as f64, ..disc_config() }, steps)
    }

    /// `log2` of the ratios of successive errors.
    fn observed_orders(errors: &[f64]) -> Vec<f64> {
        errors.windows(2).map(|pair| (pair[0] / pair[1]).log2()).collect()
    }

    /// `u = (1, x)`, `p = -y`: the convection `(u . grad) u = (0, 1)` balances
    /// `grad p`, so this is a steady Navier-Stokes solution without forcing.
    struct ShearFlow;

    impl Field<Tensor1> for ShearFlow {
        fn value_at(&self, p: &Point, _t: f64) -> Tensor1 {
            Tensor1::new(1.0, p.x)
        }

        fn gradient_at(&self, _p: &Point, _t: f64) -> Tensor2 {
            Tensor2::new(0.0, 0.0, 1.0, 0.0)
        }
    }

    struct LinearPressure;

    impl Field<f64> for LinearPressure {
        fn value_at(&self, p: &Point, _t: f64) -> f64 {
            -p.y
        }

        fn gradient_at(&self, _p: &Point, _t: f64) -> Tensor1 {
            Tensor1::new(0.0, -1.0)
        }
    }

    fn shear_flow() -> FlowFunctions {
        FlowFunctions {
            rhs: Box::new(zero_velocity()),
            boundary_values: Box::new(ShearFlow),
            analytic_velocity: Box::new(ShearFlow),
            analytic_pressure: Box::new(LinearPressure),
        }
    }

    struct FailingSolver;

    impl LinearSolver for FailingSolver {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn solve(&self, _matrix: &SparseMatrix, _rhs: &Vector) -> Result<Vector, SolveError> {
            Err(SolveError::Singular)
        }
    }

    #[test]
    fn test_e2e_bdf1_flow_at_rest_has_zero_error() {
        let simulation = Simulation::new(disc_config()).unwrap();
        let mut integrator = simulation.stokes(FlowFunctions::at_rest(), unit_disc()).unwrap();
        let summary = integrator.run(1, 4, Startup::Interpolate).unwrap();

        assert_eq!(integrator.state(), IntegratorState::Finished);
        assert_eq!(summary.steps, 4);
        assert_eq!(integrator.errors().len(), 4);
        for sample in integrator.errors().samples() {
            let FieldErrors::Flow { velocity, pressure } = sample.errors else {
                panic!("flow run produced scalar errors");
            };
            assert_abs_diff_eq!(velocity.l2, 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(velocity.h1, 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(pressure.l2, 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(pressure.h1, 0.0, epsilon = 1e-10);
        }
        let TimeNorms::Flow { velocity, pressure } = summary.norms else {
            panic!("flow run produced scalar norms");
        };
        assert_abs_diff_eq!(velocity.l2_l2, 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(velocity.linf_h1, 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(pressure.l2_h1, 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(summary.tau, 0.25);
        assert_eq!(integrator.provenance().records().len(), 4);
        assert!(integrator.provenance().verify().unwrap());
    }

    #[test]
    fn test_e2e_bdf2_with_supplied_first_step() {
        let config = SimulationConfig { tau: 0.05, ..disc_config() };
        let simulation = Simulation::new(config).unwrap();

        let mut starter = simulation.stokes(FlowFunctions::ethier_steinman(0.1), unit_disc()).unwrap();
        starter.start(1, Startup::Interpolate).unwrap();
        starter.advance(1).unwrap();
        let u1 = starter.solution().cloned().unwrap();

        let mut integrator = simulation.stokes(FlowFunctions::ethier_steinman(0.1), unit_disc()).unwrap();
        integrator.start(2, Startup::Supplied(vec![u1.clone()])).unwrap();
        assert_eq!(integrator.state(), IntegratorState::Stepping);
        assert_eq!(integrator.history().len(), 2);
        assert_eq!(integrator.bdf().unwrap().to_vec(), vec![1.5, -2.0, 0.5]);
        assert_abs_diff_eq!(integrator.time(), 0.05);
        assert_eq!(integrator.solution(), Some(&u1));

        integrator.advance(5).unwrap();
        assert_eq!(integrator.errors().len(), 5);
        assert_eq!(integrator.errors().samples()[0].step, 2);
        let summary = integrator.finish().unwrap();
        assert_eq!(summary.steps, 5);
        let primary = summary.norms.primary();
        assert!(primary.l2_l2.is_finite() && primary.linf_h1.is_finite());
    }

    #[test]
    fn test_e2e_constant_scalar_is_exact() {
        let config = SimulationConfig { element_order: 2, ..disc_config() };
        let mut integrator = Simulation::new(config)
            .unwrap()
            .heat(ScalarFunctions::constant(1.5), unit_disc())
            .unwrap();
        let summary = integrator.run(2, 3, Startup::Interpolate).unwrap();
        let TimeNorms::Scalar(u) = summary.norms else {
            panic!("scalar run produced flow norms");
        };
        assert_abs_diff_eq!(u.l2_l2, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(u.linf_h1, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_e2e_constant_scalar_on_moving_domain() {
        let config = SimulationConfig {
            radius: 1.0,
            half_length: 2.0,
            n_refines: 3,
            tau: 0.125,
            moving_domain: true,
            ..SimulationConfig::default()
        };
        let obstacle = MovingCircle { radius: 0.25, half_length: 2.0, channel_radius: 1.0, path_duration: 1.0 };
        let mut integrator = Simulation::new(config)
            .unwrap()
            .heat(ScalarFunctions::constant(-0.75), obstacle)
            .unwrap();
        integrator.start(2, Startup::Interpolate).unwrap();
        let before = integrator.geometry().locations().to_vec();
        integrator.advance(4).unwrap();
        assert_ne!(integrator.geometry().locations(), before.as_slice());

        let summary = integrator.finish().unwrap();
        let TimeNorms::Scalar(u) = summary.norms else {
            panic!("scalar run produced flow norms");
        };
        assert_abs_diff_eq!(u.l2_l2, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(u.linf_h1, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_e2e_ethier_steinman_errors_are_small() {
        let config = SimulationConfig { n_refines: 3, tau: 0.02, nu: 0.1, ..disc_config() };
        let mut integrator = Simulation::new(config)
            .unwrap()
            .stokes(FlowFunctions::ethier_steinman(0.1), unit_disc())
            .unwrap();
        let summary = integrator.run(2, 3, Startup::Interpolate).unwrap();
        let TimeNorms::Flow { velocity, pressure } = summary.norms else {
            panic!("flow run produced scalar norms");
        };
        assert!(velocity.l2_l2 > 0.0 && velocity.linf_l2 < 0.5);
        assert!(pressure.l2_l2.is_finite());
    }

    #[test]
    fn test_e2e_heat_q1_converges_at_second_order() {
        let errors: Vec<f64> = (2..=4)
            .map(|n_refines| {
                let (config, steps) = refined_disc_config(n_refines, 1);
                let nu = config.nu;
                let summary = Simulation::new(config)
                    .unwrap()
                    .heat(ScalarFunctions::sinusoid(nu), unit_disc())
                    .unwrap()
                    .run(2, steps - 1, Startup::Interpolate)
                    .unwrap();
                summary.norms.primary().l2_l2
            })
            .collect();
        let orders = observed_orders(&errors);
        assert!(orders.iter().all(|&order| order > 0.0), "errors {:?} do not decrease", errors);
        assert!(orders[1] > 1.5, "observed L2 orders {:?}", orders);
    }

    #[test]
    fn test_e2e_taylor_hood_converges_at_third_order() {
        let mut velocity_errors = Vec::new();
        let mut pressure_errors = Vec::new();
        for n_refines in 2..=4 {
            let (config, steps) = refined_disc_config(n_refines, 1);
            let nu = config.nu;
            let summary = Simulation::new(config)
                .unwrap()
                .stokes(FlowFunctions::ethier_steinman(nu), unit_disc())
                .unwrap()
                .run(2, steps - 1, Startup::Interpolate)
                .unwrap();
            let TimeNorms::Flow { velocity, pressure } = summary.norms else {
                panic!("flow run produced scalar norms");
            };
            velocity_errors.push(velocity.l2_l2);
            pressure_errors.push(pressure.l2_l2);
        }
        let velocity_orders = observed_orders(&velocity_errors);
        let pressure_orders = observed_orders(&pressure_errors);
        assert!(velocity_orders.iter().all(|&order| order > 0.0), "errors {:?}", velocity_errors);
        assert!(velocity_orders[1] > 2.0, "observed velocity L2 orders {:?}", velocity_orders);
        assert!(pressure_orders[1] > 1.0, "observed pressure L2 orders {:?}", pressure_orders);
    }

    #[test]
    fn test_e2e_navier_stokes_reproduces_linear_flow() {
        let simulation = Simulation::new(SimulationConfig { element_order: 1, ..disc_config() }).unwrap();
        for scheme in [ConvectionScheme::Lagged, ConvectionScheme::Extrapolated] {
            for order in [1, 2] {
                let mut integrator = simulation.navier_stokes(shear_flow(), scheme, unit_disc()).unwrap();
                assert_eq!(integrator.problem().name(), "navier-stokes");
                let summary = integrator.run(order, 3, Startup::Interpolate).unwrap();
                let TimeNorms::Flow { velocity, pressure } = summary.norms else {
                    panic!("flow run produced scalar norms");
                };
                assert_abs_diff_eq!(velocity.l2_h1, 0.0, epsilon = 1e-8);
                assert_abs_diff_eq!(pressure.l2_h1, 0.0, epsilon = 1e-8);
            }
        }

        // Without convection the same data gives a constant pressure.
        let summary = simulation.stokes(shear_flow(), unit_disc()).unwrap().run(1, 3, Startup::Interpolate).unwrap();
        let TimeNorms::Flow { pressure, .. } = summary.norms else {
            panic!("flow run produced scalar norms");
        };
        assert!(pressure.l2_l2 > 0.1, "pressure error {}", pressure.l2_l2);
    }

    #[test]
    fn test_e2e_navier_stokes_ethier_steinman() {
        let config = SimulationConfig { n_refines: 4, tau: 0.02, ..disc_config() };
        let nu = config.nu;
        let simulation = Simulation::new(config).unwrap();

        let mut navier_stokes = simulation
            .navier_stokes(FlowFunctions::navier_stokes_ethier_steinman(nu), ConvectionScheme::Extrapolated, unit_disc())
            .unwrap();
        let TimeNorms::Flow { velocity, pressure: ns_pressure } = navier_stokes.run(2, 3, Startup::Interpolate).unwrap().norms
        else {
            panic!("flow run produced scalar norms");
        };
        assert!(velocity.linf_l2 < 0.05, "velocity error {}", velocity.linf_l2);

        // Stokes flow misses the convection, which is a pressure gradient here.
        let mut stokes = simulation.stokes(FlowFunctions::navier_stokes_ethier_steinman(nu), unit_disc()).unwrap();
        let TimeNorms::Flow { pressure: stokes_pressure, .. } = stokes.run(2, 3, Startup::Interpolate).unwrap().norms else {
            panic!("flow run produced scalar norms");
        };
        assert!(
            ns_pressure.l2_l2 < 0.3 * stokes_pressure.l2_l2,
            "pressure errors {} vs {}",
            ns_pressure.l2_l2,
            stokes_pressure.l2_l2
        );
    }

    #[test]
    fn test_e2e_solvers_agree() {
        let solve_with = |linear_solver: LinearSolverKind| {
            let config = SimulationConfig { tau: 0.1, linear_solver, ..disc_config() };
            let mut integrator = Simulation::new(config)
                .unwrap()
                .stokes(FlowFunctions::ethier_steinman(0.1), unit_disc())
                .unwrap();
            integrator.run(2, 2, Startup::Interpolate).unwrap();
            integrator.solution().cloned().unwrap()
        };
        let sparse = solve_with(LinearSolverKind::SparseLu);
        let dense = solve_with(LinearSolverKind::DenseLu);
        assert_relative_eq!(sparse, dense, epsilon = 1e-9, max_relative = 1e-9);

        let heat_with = |linear_solver: LinearSolverKind| {
            let config = SimulationConfig { tau: 0.1, linear_solver, ..disc_config() };
            let mut integrator = Simulation::new(config)
                .unwrap()
                .heat(ScalarFunctions::sinusoid(0.1), unit_disc())
                .unwrap();
            integrator.run(1, 2, Startup::Interpolate).unwrap();
            integrator.solution().cloned().unwrap()
        };
        assert_relative_eq!(
            heat_with(LinearSolverKind::BiCgStab),
            heat_with(LinearSolverKind::SparseLu),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_condition_numbers_are_recorded_per_step() {
        let simulation = Simulation::new(disc_config()).unwrap();
        let mut integrator = simulation.heat(ScalarFunctions::constant(1.0), unit_disc()).unwrap();
        integrator.run(1, 2, Startup::Interpolate).unwrap();
        assert!(integrator.condition_numbers().is_empty());

        let mut integrator = simulation.heat(ScalarFunctions::constant(1.0), unit_disc()).unwrap().with_condition_numbers();
        integrator.run(1, 2, Startup::Interpolate).unwrap();
        let steps: Vec<usize> = integrator.condition_numbers().iter().map(|&(step, _)| step).collect();
        assert_eq!(steps, vec![1, 2]);
        assert!(integrator.condition_numbers().iter().all(|&(_, kappa)| kappa.is_finite() && kappa >= 1.0));
    }

    #[test]
    fn test_zero_stabilization_scaling_aborts_run() {
        let config = SimulationConfig { gamma_u: 0.0, ..disc_config() };
        let mut integrator = Simulation::new(config)
            .unwrap()
            .stokes(FlowFunctions::at_rest(), unit_disc())
            .unwrap();
        let err = integrator.run(1, 2, Startup::Interpolate).unwrap_err();
        assert!(matches!(err, EngineError::ZeroStabilizationScaling { .. }));
        assert!(integrator.errors().is_empty());
        assert_eq!(integrator.state(), IntegratorState::Aborted);
    }

    #[test]
    fn test_solve_failure_reports_step_and_time() {
        let mut integrator = Simulation::new(disc_config())
            .unwrap()
            .heat(ScalarFunctions::constant(1.0), unit_disc())
            .unwrap()
            .with_solver(FailingSolver);
        match integrator.run(2, 3, Startup::Interpolate) {
            Err(EngineError::SolveFailed { step, time, reason }) => {
                assert_eq!(step, 2);
                assert_abs_diff_eq!(time, 0.5);
                assert!(reason.contains("singular"));
            }
            other => panic!("expected a solve failure, got {:?}", other),
        }
        assert_eq!(integrator.state(), IntegratorState::Aborted);
        assert!(integrator.errors().is_empty());
        assert!(matches!(integrator.advance(1), Err(EngineError::InvalidState(_))));
        assert!(matches!(integrator.finish(), Err(EngineError::InvalidState(_))));
        assert!(matches!(integrator.start(1, Startup::Interpolate), Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_startup_errors() {
        let simulation = Simulation::new(disc_config()).unwrap();

        let mut integrator = simulation.heat(ScalarFunctions::constant(1.0), unit_disc()).unwrap();
        assert!(matches!(integrator.advance(1), Err(EngineError::InvalidState(_))));
        assert!(matches!(integrator.finish(), Err(EngineError::InvalidState(_))));
        assert!(matches!(
            integrator.start(1, Startup::Supplied(vec![Vector::zeros(2), Vector::zeros(2)])),
            Err(EngineError::TooManyStartupSolutions { supplied: 2, order: 1 })
        ));

        let mut integrator = simulation.heat(ScalarFunctions::constant(1.0), unit_disc()).unwrap();
        match integrator.start(2, Startup::Supplied(vec![Vector::zeros(3)])) {
            Err(EngineError::StartupSizeMismatch { index, actual, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(actual, 3);
            }
            other => panic!("expected a size mismatch, got {:?}", other),
        }

        let mut integrator = simulation.heat(ScalarFunctions::constant(1.0), unit_disc()).unwrap();
        assert!(matches!(integrator.run(3, 1, Startup::Interpolate), Err(EngineError::InvalidBdfOrder(3))));
    }

    #[test]
    fn test_report_rows_for_finished_run() {
        let mut integrator = Simulation::new(disc_config())
            .unwrap()
            .heat(ScalarFunctions::constant(2.0), unit_disc())
            .unwrap();
        let summary = integrator.run(1, 2, Startup::Interpolate).unwrap();
        let mut out = Vec::new();
        write_header(SolvedFields::Scalar, &mut out).unwrap();
        write_error(&summary, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("h, \\tau"));
        assert!(lines.next().unwrap().starts_with("0.625,0.25,"));
    }
}
