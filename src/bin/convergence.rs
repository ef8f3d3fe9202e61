// src/bin/convergence.rs

//! Convergence study driver.
//!
//! Runs one problem over a range of refinements with `tau = T / 2^(n - 1)`,
//! logs the discrete-in-time error norms and appends one report row per
//! refinement when output is enabled. Optionally logs the condition number of
//! every assembled matrix.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};

use cutfem_engine::config::MAX_REFINES;
use cutfem_engine::fields::analytic::{Circle, MovingCircle};
use cutfem_engine::fields::Field;
use cutfem_engine::solver::LinearSolverKind;
use cutfem_engine::{
    ConvectionScheme, CutProblem, EngineError, EngineResult, FlowFunctions, Point, ScalarFunctions, Simulation,
    SimulationConfig, Startup, TimeErrorSummary, TimeIntegrator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Problem {
    Heat,
    Stokes,
    NavierStokes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Convection {
    Lagged,
    Extrapolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Solver {
    SparseLu,
    DenseLu,
    Bicgstab,
}

/// Convergence study of the cut finite element schemes.
#[derive(Parser, Debug)]
#[command(name = "cutfem-convergence")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Moving-domain CutFEM convergence study", long_about = None)]
struct Cli {
    /// Problem to solve.
    #[arg(short, long, value_enum, default_value = "stokes")]
    problem: Problem,

    /// BDF order (1 or 2).
    #[arg(short, long, default_value = "2")]
    bdf: usize,

    /// Polynomial order; flow problems use one more for the velocity.
    #[arg(short = 'o', long, default_value = "1")]
    element_order: usize,

    #[arg(long, default_value = "3")]
    min_refines: u32,

    #[arg(long, default_value = "5")]
    max_refines: u32,

    /// End time of every run.
    #[arg(short = 't', long, default_value = "0.05")]
    end_time: f64,

    /// Radius of the circular obstacle, 0.75 * channel radius if omitted.
    #[arg(long)]
    obstacle_radius: Option<f64>,

    /// JSON configuration; command line values override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Move the obstacle across the channel during each run.
    #[arg(long)]
    moving: bool,

    /// Convection velocity of the Navier-Stokes problem.
    #[arg(long, value_enum, default_value = "extrapolated")]
    convection: Convection,

    /// Linear solver; the configuration's choice if omitted.
    #[arg(long, value_enum)]
    solver: Option<Solver>,

    /// Log the condition number of every system (dense SVD, small runs only).
    #[arg(long)]
    condition_number: bool,

    /// Write CSV reports into this directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn obstacle(cli: &Cli, config: &SimulationConfig) -> Box<dyn Field<f64>> {
    let radius = cli.obstacle_radius.unwrap_or(0.75 * config.radius);
    if config.moving_domain {
        Box::new(MovingCircle {
            radius,
            half_length: config.half_length,
            channel_radius: config.radius,
            path_duration: cli.end_time,
        })
    } else {
        Box::new(Circle::exterior(Point::origin(), radius))
    }
}

/// Runs `steps` time levels, starting from interpolated data.
fn drive<P: CutProblem>(cli: &Cli, integrator: TimeIntegrator<P>, steps: usize) -> EngineResult<TimeErrorSummary> {
    let mut integrator = if cli.condition_number { integrator.with_condition_numbers() } else { integrator };
    // BDF-2 starts from interpolated data at t = 0 and t = tau.
    let solved_steps = steps.saturating_sub(cli.bdf.saturating_sub(1)).max(1);
    let summary = integrator.run(cli.bdf, solved_steps, Startup::Interpolate)?;
    if let Some(worst) = integrator.condition_numbers().iter().map(|&(_, kappa)| kappa).reduce(f64::max) {
        info!("largest condition number: {:.4e}", worst);
    }
    Ok(summary)
}

fn run_refinement(cli: &Cli, base: &SimulationConfig, n_refines: u32) -> EngineResult<TimeErrorSummary> {
    // The level bounds the shift below.
    let config = SimulationConfig { n_refines, ..base.clone() };
    config.validate()?;
    let steps = 1usize << n_refines.saturating_sub(1);
    let simulation = Simulation::new(SimulationConfig { tau: cli.end_time / steps as f64, ..config })?;
    info!("n_refines = {}: T = {}, tau = {}, steps = {}", n_refines, cli.end_time, simulation.config().tau, steps);

    let level_set = obstacle(cli, simulation.config());
    let nu = simulation.config().nu;
    match cli.problem {
        Problem::Heat => drive(cli, simulation.heat(ScalarFunctions::sinusoid(nu), level_set)?, steps),
        Problem::Stokes => drive(cli, simulation.stokes(FlowFunctions::ethier_steinman(nu), level_set)?, steps),
        Problem::NavierStokes => {
            let scheme = match cli.convection {
                Convection::Lagged => ConvectionScheme::Lagged,
                Convection::Extrapolated => ConvectionScheme::Extrapolated,
            };
            let functions = FlowFunctions::navier_stokes_ethier_steinman(nu);
            drive(cli, simulation.navier_stokes(functions, scheme, level_set)?, steps)
        }
    }
}

fn main() -> Result<(), EngineError> {
    let cli = Cli::parse();
    let level = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(level).format_target(false).init();

    let mut config = match &cli.config {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    config.element_order = cli.element_order;
    config.moving_domain |= cli.moving;
    if let Some(solver) = cli.solver {
        config.linear_solver = match solver {
            Solver::SparseLu => LinearSolverKind::SparseLu,
            Solver::DenseLu => LinearSolverKind::DenseLu,
            Solver::Bicgstab => LinearSolverKind::BiCgStab,
        };
    }
    if let Some(dir) = &cli.output {
        config.write_output = true;
        config.output_dir = dir.clone();
    }
    config.validate()?;
    if cli.min_refines > cli.max_refines {
        return Err(EngineError::Config(format!(
            "empty refinement range {}..={}",
            cli.min_refines, cli.max_refines
        )));
    }
    if cli.max_refines > MAX_REFINES {
        return Err(EngineError::Config(format!("max_refines must be at most {}", MAX_REFINES)));
    }

    info!("{:?} convergence study, BDF-{}, element order {}", cli.problem, cli.bdf, config.element_order);
    for n_refines in cli.min_refines..=cli.max_refines {
        let summary = run_refinement(&cli, &config, n_refines)?;
        let primary = summary.norms.primary();
        info!("|| u - u_h ||_L2L2 = {:.4e}", primary.l2_l2);
        info!("|| u - u_h ||_L2H1 = {:.4e}", primary.l2_h1);
        if let cutfem_engine::TimeNorms::Flow { pressure, .. } = &summary.norms {
            info!("|| p - p_h ||_L2L2 = {:.4e}", pressure.l2_l2);
            info!("|| p - p_h ||_L2H1 = {:.4e}", pressure.l2_h1);
        }
        info!("summary: {}", summary.to_json()?);
    }
    Ok(())
}
