//! Parallel fast-forward sampled simulation.
//!
//! A functional-mode engine fast-forwards each workload, checkpointing at the start of every
//! warmup window of a periodic sampling plan. Each checkpoint is handed to an independent detailed
//! job that re-simulates warmup plus one measurement unit and reports its statistics. The
//! dispatcher bounds how many jobs run at once and how many checkpoints may pile up on disk.

#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod driver;
mod error;
pub mod fast_forward;
pub mod job;
pub mod store;
pub mod summary;
pub mod workload;

pub use crate::backend::{JobBackend, JobExit, JobHandle, JobInvocation, Launched, ProcessBackend};
pub use crate::config::{ConfigError, SamplerConfig};
pub use crate::controller::{ControllerError, FastForwardController, Phase, Request};
pub use crate::dispatcher::{CheckpointDispatcher, DispatchRecord, DispatchReport, JobTemplate};
pub use crate::driver::{run_all, run_workload, DriverConfig, RunLayout, WorkloadRun};
pub use crate::error::{JobFailure, Result, SamplerError};
pub use crate::job::{DetailedJob, StatsSample, Truncation};
pub use crate::store::{Checkpoint, CheckpointState, CheckpointStore};
pub use crate::summary::{RunStatus, WorkloadSummary};
pub use crate::workload::{InstructionTable, WorkloadCatalog, WorkloadKey, WorkloadSpec};
