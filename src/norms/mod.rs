// src/norms/mod.rs

//! Spatial error norms per step and their discrete-in-time combinations.
//!
//! Every accepted step produces an [`ErrorSample`]. The [`ErrorAccumulator`]
//! stores the per-step magnitudes as rows of an `ndarray` table and reduces
//! the columns to L²-in-time (`sqrt(tau * sum e_i^2)`) and L∞-in-time
//! (`max e_i`) norms when the run is finalized.

use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult, SolvedFields};

/// L², H¹ and H¹-seminorm of one field at one time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormTriple {
    pub l2: f64,
    pub h1: f64,
    pub h1_semi: f64,
}

impl NormTriple {
    /// Builds the triple from the squared L² norm and squared seminorm.
    pub fn from_squares(l2_sq: f64, semi_sq: f64) -> Self {
        let (l2_sq, semi_sq) = (l2_sq.max(0.0), semi_sq.max(0.0));
        NormTriple { l2: l2_sq.sqrt(), h1: (l2_sq + semi_sq).sqrt(), h1_semi: semi_sq.sqrt() }
    }

    fn as_array(&self) -> [f64; 3] {
        [self.l2, self.h1, self.h1_semi]
    }
}

/// Spatial errors of one step, tagged by the kind of problem solved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldErrors {
    Scalar(NormTriple),
    Flow { velocity: NormTriple, pressure: NormTriple },
}

impl FieldErrors {
    pub fn kind(&self) -> SolvedFields {
        match self {
            FieldErrors::Scalar(_) => SolvedFields::Scalar,
            FieldErrors::Flow { .. } => SolvedFields::Flow,
        }
    }

    /// Row layout: `[l2, h1, h1_semi]` per field, primary field first.
    fn to_row(&self) -> Vec<f64> {
        match self {
            FieldErrors::Scalar(u) => u.as_array().to_vec(),
            FieldErrors::Flow { velocity, pressure } => {
                velocity.as_array().into_iter().chain(pressure.as_array()).collect()
            }
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldErrors::Scalar(u) => write!(f, "|e|_L2 = {:.3e}, |e|_H1 = {:.3e}", u.l2, u.h1),
            FieldErrors::Flow { velocity, pressure } => write!(
                f,
                "|e_u|_L2 = {:.3e}, |e_u|_H1 = {:.3e}, |e_p|_L2 = {:.3e}, |e_p|_H1 = {:.3e}",
                velocity.l2, velocity.h1, pressure.l2, pressure.h1
            ),
        }
    }
}

/// Spatial errors of one accepted step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub step: usize,
    pub time: f64,
    pub h: f64,
    pub tau: f64,
    pub errors: FieldErrors,
}

/// Time norms of one field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldTimeNorms {
    pub l2_l2: f64,
    pub l2_h1: f64,
    pub l2_h1_semi: f64,
    pub linf_l2: f64,
    pub linf_h1: f64,
    pub linf_h1_semi: f64,
}

impl FieldTimeNorms {
    fn from_columns(l2: &[f64], linf: &[f64]) -> Self {
        FieldTimeNorms {
            l2_l2: l2[0],
            l2_h1: l2[1],
            l2_h1_semi: l2[2],
            linf_l2: linf[0],
            linf_h1: linf[1],
            linf_h1_semi: linf[2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeNorms {
    Scalar(FieldTimeNorms),
    Flow { velocity: FieldTimeNorms, pressure: FieldTimeNorms },
}

impl TimeNorms {
    pub fn kind(&self) -> SolvedFields {
        match self {
            TimeNorms::Scalar(_) => SolvedFields::Scalar,
            TimeNorms::Flow { .. } => SolvedFields::Flow,
        }
    }

    /// Norms of the velocity for flow runs, of the unknown for scalar runs.
    pub fn primary(&self) -> &FieldTimeNorms {
        match self {
            TimeNorms::Scalar(u) => u,
            TimeNorms::Flow { velocity, .. } => velocity,
        }
    }
}

/// Discrete-in-time error norms of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeErrorSummary {
    /// Mesh size of the last sample.
    pub h: f64,
    pub tau: f64,
    pub steps: usize,
    pub norms: TimeNorms,
}

impl TimeErrorSummary {
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for TimeErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.norms {
            TimeNorms::Scalar(u) => write!(f, "|e|_L2L2 = {:.3e}, |e|_L2H1 = {:.3e}", u.l2_l2, u.l2_h1),
            TimeNorms::Flow { velocity, pressure } => write!(
                f,
                "|e_u|_L2L2 = {:.3e}, |e_u|_L2H1 = {:.3e}, |e_p|_L2L2 = {:.3e}",
                velocity.l2_l2, velocity.l2_h1, pressure.l2_l2
            ),
        }
    }
}

/// Collects per-step errors of one run.
#[derive(Debug, Clone)]
pub struct ErrorAccumulator {
    tau: f64,
    kind: Option<SolvedFields>,
    samples: Vec<ErrorSample>,
    table: Array2<f64>,
}

impl ErrorAccumulator {
    pub fn new(tau: f64) -> Self {
        ErrorAccumulator { tau, kind: None, samples: Vec::new(), table: Array2::zeros((0, 0)) }
    }

    /// Appends one sample. All samples of a run must be of the same kind.
    pub fn record(&mut self, sample: ErrorSample) -> EngineResult<()> {
        let found = sample.errors.kind();
        match self.kind {
            Some(expected) if expected != found => {
                return Err(EngineError::SampleKindMismatch { expected, found });
            }
            Some(_) => {}
            None => {
                self.kind = Some(found);
                self.table = Array2::zeros((0, sample.errors.to_row().len()));
            }
        }
        let row = Array1::from(sample.errors.to_row());
        self.table
            .push_row(row.view())
            .map_err(|e| EngineError::Config(format!("error table shape: {}", e)))?;
        self.samples.push(sample);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[ErrorSample] {
        &self.samples
    }

    /// Combines the recorded samples into time norms.
    pub fn finalize(&self) -> EngineResult<TimeErrorSummary> {
        let (Some(kind), Some(last)) = (self.kind, self.samples.last()) else {
            return Err(EngineError::EmptyErrorHistory);
        };
        let tau = self.tau;
        let l2_in_time = |column: ArrayView1<f64>| (tau * column.fold(0.0, |acc, e| acc + e * e)).sqrt();
        let linf_in_time = |column: ArrayView1<f64>| column.fold(0.0_f64, |acc, &e| acc.max(e));

        let l2: Vec<f64> = self.table.axis_iter(Axis(1)).map(l2_in_time).collect();
        let linf: Vec<f64> = self.table.axis_iter(Axis(1)).map(linf_in_time).collect();

        let norms = match kind {
            SolvedFields::Scalar => TimeNorms::Scalar(FieldTimeNorms::from_columns(&l2, &linf)),
            SolvedFields::Flow => TimeNorms::Flow {
                velocity: FieldTimeNorms::from_columns(&l2[..3], &linf[..3]),
                pressure: FieldTimeNorms::from_columns(&l2[3..], &linf[3..]),
            },
        };
        Ok(TimeErrorSummary { h: last.h, tau, steps: self.samples.len(), norms })
    }
}
