// src/report/mod.rs

//! Comma-separated error reports.
//!
//! A run report has one row per finished run (mesh size, time step, the
//! L²-in-time norms of every field, then the l∞-in-time norms of the primary
//! field). A time report has one row per accepted step. Headers use the
//! LaTeX column names the plotting scripts expect.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::SimulationConfig;
use crate::norms::{ErrorSample, FieldErrors, FieldTimeNorms, NormTriple, TimeErrorSummary, TimeNorms};
use crate::{EngineResult, SolvedFields};

const FLOW_RUN_HEADER: &str = "h, \\tau, \\|u\\|_{L^2L^2}, \\|u\\|_{L^2H^1}, |u|_{L^2H^1}, \
\\|p\\|_{L^2L^2}, \\|p\\|_{L^2H^1}, |p|_{L^2H^1}, \
\\|u\\|_{l^\\infty L^2}, \\|u\\|_{l^\\infty H^1},";

const SCALAR_RUN_HEADER: &str = "h, \\tau, \\|u\\|_{L^2L^2}, \\|u\\|_{L^2H^1}, |u|_{L^2H^1}, \
\\|u\\|_{l^\\infty L^2}, \\|u\\|_{l^\\infty H^1},";

const FLOW_TIME_HEADER: &str = "k, \\tau, h, \\|u\\|_{L^2}, \\|u\\|_{H^1}, |u|_{H^1}, \
\\|p\\|_{L^2}, \\|p\\|_{H^1}, |p|_{H^1}";

const SCALAR_TIME_HEADER: &str = "k, \\tau, h, \\|u\\|_{L^2}, \\|u\\|_{H^1}, |u|_{H^1}";

fn write_row(values: &[f64], w: &mut impl Write) -> EngineResult<()> {
    let row: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    writeln!(w, "{}", row.join(","))?;
    Ok(())
}

fn l2_columns(n: &FieldTimeNorms) -> [f64; 3] {
    [n.l2_l2, n.l2_h1, n.l2_h1_semi]
}

fn space_columns(n: &NormTriple) -> [f64; 3] {
    [n.l2, n.h1, n.h1_semi]
}

/// Writes the header of a run report.
pub fn write_header(kind: SolvedFields, w: &mut impl Write) -> EngineResult<()> {
    let header = match kind {
        SolvedFields::Scalar => SCALAR_RUN_HEADER,
        SolvedFields::Flow => FLOW_RUN_HEADER,
    };
    writeln!(w, "{}", header)?;
    Ok(())
}

/// Writes one run row.
pub fn write_error(summary: &TimeErrorSummary, w: &mut impl Write) -> EngineResult<()> {
    let mut values = vec![summary.h, summary.tau];
    match &summary.norms {
        TimeNorms::Scalar(u) => values.extend(l2_columns(u)),
        TimeNorms::Flow { velocity, pressure } => {
            values.extend(l2_columns(velocity));
            values.extend(l2_columns(pressure));
        }
    }
    let primary = summary.norms.primary();
    values.extend([primary.linf_l2, primary.linf_h1]);
    write_row(&values, w)
}

/// Writes the header of a time report.
pub fn write_time_header(kind: SolvedFields, w: &mut impl Write) -> EngineResult<()> {
    let header = match kind {
        SolvedFields::Scalar => SCALAR_TIME_HEADER,
        SolvedFields::Flow => FLOW_TIME_HEADER,
    };
    writeln!(w, "{}", header)?;
    Ok(())
}

/// Writes one step row.
pub fn write_time_error(sample: &ErrorSample, w: &mut impl Write) -> EngineResult<()> {
    let mut values = vec![sample.step as f64, sample.tau, sample.h];
    match &sample.errors {
        FieldErrors::Scalar(u) => values.extend(space_columns(u)),
        FieldErrors::Flow { velocity, pressure } => {
            values.extend(space_columns(velocity));
            values.extend(space_columns(pressure));
        }
    }
    write_row(&values, w)
}

/// File-backed report of one run: a time report per run, rows appended to a
/// run report shared by all runs of the same problem and element order.
pub struct ReportWriter {
    kind: SolvedFields,
    run_path: PathBuf,
    time_file: BufWriter<File>,
}

impl ReportWriter {
    /// Creates the writer when `write_output` is set.
    pub fn from_config(config: &SimulationConfig, problem: &str, kind: SolvedFields) -> EngineResult<Option<Self>> {
        if !config.write_output {
            return Ok(None);
        }
        Self::create(&config.output_dir, problem, kind, config.element_order, config.n_refines).map(Some)
    }

    /// Opens the reports of a `problem` run; the problem name keeps runs of
    /// different equations, whose columns differ, in separate files.
    pub fn create(dir: &Path, problem: &str, kind: SolvedFields, order: usize, n_refines: u32) -> EngineResult<Self> {
        fs::create_dir_all(dir)?;
        let run_path = dir.join(format!("errors-{}-d2o{}.csv", problem, order));
        let time_path = dir.join(format!("errors-time-{}-d2o{}r{}.csv", problem, order, n_refines));
        let mut time_file = BufWriter::new(File::create(&time_path)?);
        write_time_header(kind, &mut time_file)?;
        info!("writing error reports to {}", dir.display());
        Ok(ReportWriter { kind, run_path, time_file })
    }

    pub fn kind(&self) -> SolvedFields {
        self.kind
    }

    pub fn run_path(&self) -> &Path {
        &self.run_path
    }

    pub fn record_step(&mut self, sample: &ErrorSample) -> EngineResult<()> {
        write_time_error(sample, &mut self.time_file)?;
        self.time_file.flush()?;
        Ok(())
    }

    /// Appends the run row, writing the header first if the file is new.
    pub fn record_run(&mut self, summary: &TimeErrorSummary) -> EngineResult<()> {
        let is_new = fs::metadata(&self.run_path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = BufWriter::new(OpenOptions::new().create(true).append(true).open(&self.run_path)?);
        if is_new {
            write_header(self.kind, &mut file)?;
        }
        write_error(summary, &mut file)?;
        file.flush()?;
        debug!("appended run row to {}", self.run_path.display());
        Ok(())
    }
}
