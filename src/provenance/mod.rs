// src/provenance/mod.rs

//! Step ledger of a run.
//!
//! Every accepted time step appends a [`ProvenanceRecord`] holding the
//! SHA-256 of the solution coefficients and the hash of the previous record,
//! so a stored run can be checked for tampering or silent divergence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::EngineResult;

/// Version stamped into every record.
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One entry of the ledger: what happened, a digest of its data and the link to its predecessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub data_hash: String,
    pub software_version: String,
    pub previous_record_hash: Option<String>,
    pub metadata: serde_json::Value,
}

impl ProvenanceRecord {
    pub fn new(
        event_type: String,
        data: &[u8],
        previous_record_hash: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        ProvenanceRecord {
            timestamp: Utc::now(),
            event_type,
            data_hash: calculate_hash(data),
            software_version: SOFTWARE_VERSION.to_string(),
            previous_record_hash,
            metadata,
        }
    }

    /// Hash of the serialized record, used as the link of the next record.
    pub fn calculate_record_hash(&self) -> EngineResult<String> {
        let serialized = serde_json::to_string(self)?;
        Ok(calculate_hash(serialized.as_bytes()))
    }
}

/// Lowercase hex SHA-256.
fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Little-endian bytes of the coefficients.
fn solution_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Hash-linked records of a run, oldest first.
#[derive(Debug, Default)]
pub struct ProvenanceChain {
    records: Vec<ProvenanceRecord>,
}

impl ProvenanceChain {
    pub fn new() -> Self {
        ProvenanceChain { records: Vec::new() }
    }

    pub fn add_record(&mut self, event_type: &str, data: &[u8], metadata: serde_json::Value) -> EngineResult<()> {
        let previous_record_hash = self.records.last().map(|r| r.calculate_record_hash()).transpose()?;
        self.records.push(ProvenanceRecord::new(event_type.to_string(), data, previous_record_hash, metadata));
        Ok(())
    }

    /// Records an accepted time step.
    pub fn add_step(&mut self, step: usize, time: f64, solution: &[f64]) -> EngineResult<()> {
        let metadata = serde_json::json!({ "step": step, "time": time, "n_dofs": solution.len() });
        self.add_record("time_step", &solution_bytes(solution), metadata)
    }

    pub fn records(&self) -> &[ProvenanceRecord] {
        &self.records
    }

    /// Checks every link of the chain.
    pub fn verify(&self) -> EngineResult<bool> {
        for pair in self.records.windows(2) {
            if pair[1].previous_record_hash.as_deref() != Some(pair[0].calculate_record_hash()?.as_str()) {
                return Ok(false);
            }
        }
        Ok(self.records.first().map_or(true, |r| r.previous_record_hash.is_none()))
    }

    /// Whether `solution` hashes to the record at `index`.
    pub fn matches(&self, index: usize, solution: &[f64]) -> bool {
        self.records
            .get(index)
            .is_some_and(|r| r.data_hash == calculate_hash(&solution_bytes(solution)))
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(&self.records)?)
    }

    pub fn from_json(json_str: &str) -> EngineResult<Self> {
        Ok(ProvenanceChain { records: serde_json::from_str(json_str)? })
    }

    pub fn take_records(self) -> Vec<ProvenanceRecord> {
        self.records
    }
}
