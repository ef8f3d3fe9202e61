// src/config/mod.rs

//! Run configuration, loadable from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::meshing::BoundaryId;
use crate::solver::LinearSolverKind;
use crate::{EngineError, EngineResult};

/// Largest accepted refinement level. A channel refined this often already
/// has more than 10^12 cells, and the level is used as a shift width.
pub const MAX_REFINES: u32 = 20;

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Half height of the channel.
    pub radius: f64,
    /// Half length of the channel.
    pub half_length: f64,
    pub n_refines: u32,
    /// Polynomial order `p`; flow problems use `p + 1` for the velocity.
    pub element_order: usize,
    /// Viscosity / diffusivity.
    pub nu: f64,
    /// Time step.
    pub tau: f64,
    pub stabilized: bool,
    pub moving_domain: bool,
    pub gamma_u: f64,
    pub gamma_p: f64,
    /// Outer boundary left free (natural condition), if any.
    pub do_nothing_id: Option<BoundaryId>,
    /// Level-set samples per cell side used for classification and cut quadrature.
    pub subdivisions: usize,
    /// Assemble with rayon.
    pub parallel: bool,
    pub linear_solver: LinearSolverKind,
    pub write_output: bool,
    pub output_dir: PathBuf,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            radius: 0.205,
            half_length: 0.41,
            n_refines: 3,
            element_order: 1,
            nu: 0.1,
            tau: 0.01,
            stabilized: true,
            moving_domain: false,
            gamma_u: 0.5,
            gamma_p: 0.5,
            do_nothing_id: None,
            subdivisions: 4,
            parallel: true,
            linear_solver: LinearSolverKind::SparseLu,
            write_output: false,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl SimulationConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let positive = [
            ("radius", self.radius),
            ("half_length", self.half_length),
            ("nu", self.nu),
            ("tau", self.tau),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(EngineError::Config(format!("{} must be positive, got {}", name, value)));
            }
        }
        if !(1..=2).contains(&self.element_order) {
            return Err(EngineError::Config(format!(
                "element order must be 1 or 2, got {}",
                self.element_order
            )));
        }
        if self.n_refines > MAX_REFINES {
            return Err(EngineError::Config(format!(
                "n_refines must be at most {}, got {}",
                MAX_REFINES, self.n_refines
            )));
        }
        if self.subdivisions == 0 {
            return Err(EngineError::Config("subdivisions must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.stabilized);
        assert!(!config.moving_domain);
        assert_eq!(config.do_nothing_id, None);
        assert_eq!(config.subdivisions, 4);
        assert_eq!(config.linear_solver, LinearSolverKind::SparseLu);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = SimulationConfig::from_json(r#"{ "tau": 0.05, "element_order": 2, "do_nothing_id": 2 }"#).unwrap();
        assert_eq!(config.tau, 0.05);
        assert_eq!(config.element_order, 2);
        assert_eq!(config.do_nothing_id, Some(2));
        assert_eq!(config.gamma_u, 0.5);

        let round_trip = SimulationConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(SimulationConfig::from_json(r#"{ "tau": 0.0 }"#), Err(EngineError::Config(_))));
        assert!(matches!(SimulationConfig::from_json(r#"{ "element_order": 3 }"#), Err(EngineError::Config(_))));
        assert!(matches!(SimulationConfig::from_json(r#"{ "subdivisions": 0 }"#), Err(EngineError::Config(_))));
        assert!(matches!(SimulationConfig::from_json("not json"), Err(EngineError::Json(_))));
        assert!(matches!(SimulationConfig::from_json(r#"{ "linear_solver": "qr" }"#), Err(EngineError::Json(_))));
    }

    #[test]
    fn test_refinement_level_is_bounded() {
        let at_limit = SimulationConfig { n_refines: MAX_REFINES, ..SimulationConfig::default() };
        assert!(at_limit.validate().is_ok());
        for n_refines in [MAX_REFINES + 1, 63, 64, u32::MAX] {
            let config = SimulationConfig { n_refines, ..SimulationConfig::default() };
            assert!(matches!(config.validate(), Err(EngineError::Config(msg)) if msg.contains("n_refines")));
        }
    }

    #[test]
    fn test_solver_selection_from_json() {
        let config = SimulationConfig::from_json(r#"{ "linear_solver": "dense-lu" }"#).unwrap();
        assert_eq!(config.linear_solver, LinearSolverKind::DenseLu);
        let config = SimulationConfig::from_json(r#"{ "linear_solver": "bi-cg-stab" }"#).unwrap();
        assert_eq!(config.linear_solver, LinearSolverKind::BiCgStab);
    }
}
