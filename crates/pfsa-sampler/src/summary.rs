use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use pfsa_plan::SamplingPlan;
use serde::Serialize;

use crate::dispatcher::DispatchRecord;
use crate::error::{JobFailure, Result, SamplerError};
use crate::workload::{WorkloadKey, WorkloadSpec};

pub const SUMMARY_FILE_NAME: &str = "summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Final bookkeeping of one workload run, written as `summary.json` in its output directory.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadSummary {
    pub workload: WorkloadKey,
    pub status: RunStatus,
    /// Binary, arguments and stream redirections the run was booted with.
    pub spec: Option<WorkloadSpec>,
    /// First error that stopped the run, or a description of the failed jobs.
    pub error: Option<String>,
    pub plan: Option<SamplingPlan>,
    pub checkpoints_taken: u64,
    pub committed_insts: u64,
    pub exit_code: Option<i32>,
    /// Keyed by checkpoint id.
    pub dispatch: BTreeMap<u64, DispatchRecord>,
    pub failures: Vec<JobFailure>,
    pub abandoned: Vec<u64>,
    /// Checkpoint directories still on disk after draining.
    pub leftover_checkpoints: Option<usize>,
    pub host_seconds: f64,
}

impl WorkloadSummary {
    pub fn new(workload: WorkloadKey) -> Self {
        Self {
            workload,
            status: RunStatus::Completed,
            spec: None,
            error: None,
            plan: None,
            checkpoints_taken: 0,
            committed_insts: 0,
            exit_code: None,
            dispatch: BTreeMap::new(),
            failures: Vec::new(),
            abandoned: Vec::new(),
            leftover_checkpoints: None,
            host_seconds: 0.0,
        }
    }

    pub fn failed(workload: WorkloadKey, error: impl Into<String>) -> Self {
        let mut summary = Self::new(workload);
        summary.fail(error);
        summary
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error.get_or_insert_with(|| error.into());
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path).map_err(SamplerError::fs(path))?);
        serde_json::to_writer_pretty(&mut w, self).map_err(|source| SamplerError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        w.flush().map_err(SamplerError::fs(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_wins() {
        let mut summary = WorkloadSummary::new(WorkloadKey::new("mcf", "ref", "0"));
        assert!(summary.is_success());
        summary.fail("checkpoint 3 could not be written");
        summary.fail("later");
        assert!(!summary.is_success());
        assert_eq!(
            summary.error.as_deref(),
            Some("checkpoint 3 could not be written")
        );
    }

    #[test]
    fn serializes_status_and_records() {
        let mut summary = WorkloadSummary::new(WorkloadKey::new("mcf", "ref", "0"));
        summary.dispatch.insert(
            2,
            DispatchRecord {
                tick: 49_000,
                pid: 4242,
                command: vec!["pfsa".into(), "detail".into()],
            },
        );
        summary.failures.push(JobFailure::Timeout {
            checkpoint: 1,
            pid: 4241,
            after_secs: 60,
        });

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["workload"]["benchmark"], "mcf");
        assert_eq!(json["dispatch"]["2"]["pid"], 4242);
        assert_eq!(json["failures"][0]["kind"], "timeout");
        assert_eq!(json["failures"][0]["after_secs"], 60);
    }
}
