use std::io;
use std::path::PathBuf;

use pfsa_engine::EngineError;
use pfsa_plan::PlanError;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::controller::ControllerError;

pub type Result<T> = std::result::Result<T, SamplerError>;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("invalid sampling plan: {0}")]
    Plan(#[from] PlanError),

    #[error("checkpoint {id} could not be written: {source}")]
    Checkpoint {
        id: u64,
        #[source]
        source: EngineError,
    },

    #[error("checkpoint at {} could not be restored: {source}", path.display())]
    Restore {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("{0}")]
    Job(#[from] JobFailure),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("statistics were not reset before the measurement window ({instructions} instructions still counted)")]
    StatsNotReset { instructions: u64 },

    #[error(
        "no detailed job is running to free capacity \
         ({outstanding} checkpoints outstanding, {waiting} waiting)"
    )]
    Stalled { outstanding: usize, waiting: usize },

    #[error("no workload metadata for {0}")]
    UnknownWorkload(String),

    #[error("no instruction count for {0}")]
    UnknownInstructionCount(String),

    #[error("{}: {source}", path.display())]
    Fs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("json error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SamplerError {
    pub(crate) fn fs(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| SamplerError::Fs { path, source }
    }
}

/// A detailed job that did not complete normally.
///
/// Recorded by the dispatcher and reported in the workload summary; none of these are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    #[error("failed to launch detailed job for checkpoint {checkpoint}: {error}")]
    Dispatch { checkpoint: u64, error: String },

    #[error(
        "detailed job for checkpoint {checkpoint} (pid {pid}) exited abnormally \
         (code {code:?}, checkpoint left behind: {checkpoint_left})"
    )]
    Crash {
        checkpoint: u64,
        pid: u32,
        code: Option<i32>,
        checkpoint_left: bool,
    },

    #[error("detailed job for checkpoint {checkpoint} (pid {pid}) killed after {after_secs}s")]
    Timeout {
        checkpoint: u64,
        pid: u32,
        after_secs: u64,
    },
}

impl JobFailure {
    pub fn checkpoint(&self) -> u64 {
        match *self {
            JobFailure::Dispatch { checkpoint, .. }
            | JobFailure::Crash { checkpoint, .. }
            | JobFailure::Timeout { checkpoint, .. } => checkpoint,
        }
    }
}
