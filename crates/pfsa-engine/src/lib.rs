//! The simulation-engine boundary used by the sampler, plus a deterministic reference engine.
//!
//! The sampler only ever needs four capabilities from an engine: run for exactly N more committed
//! instructions, report progress, write a checkpoint to a directory, and read/reset statistics.
//! Restoring from a checkpoint is a constructor of the concrete engine.

#![forbid(unsafe_code)]

mod reference;
mod stats;

pub use crate::reference::{Program, ReferenceEngine, MEMORY_SIZE};
pub use crate::stats::SimStats;

use std::path::Path;

use pfsa_snapshot::SnapshotError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMode {
    /// Architectural state only; one tick per instruction.
    Functional,
    /// Cycle-approximate timing with cache and branch predictor state.
    Detailed,
}

/// Why [`SimEngine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The requested instruction budget was fully committed.
    Paused { executed: u64 },
    /// The simulated program exited before the budget was reached.
    Exited { executed: u64, code: i32 },
}

impl RunExit {
    /// Number of instructions committed by this call.
    pub fn executed(&self) -> u64 {
        match *self {
            RunExit::Paused { executed } | RunExit::Exited { executed, .. } => executed,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("checkpoint i/o failed: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("checkpoint belongs to workload {found}, expected {expected}")]
    WorkloadMismatch { expected: String, found: String },

    #[error("engine fault: {0}")]
    Fault(String),
}

pub trait SimEngine {
    /// Runs until exactly `max_insts` further instructions have committed or the program exits.
    ///
    /// A budget that ends on the program's final instruction reports [`RunExit::Paused`]; the
    /// following call reports the exit with `executed == 0`.
    fn run(&mut self, max_insts: u64) -> Result<RunExit, EngineError>;

    fn committed_insts(&self) -> u64;

    fn cur_tick(&self) -> u64;

    /// Writes full architectural state into `dir`, which already exists and is empty.
    fn checkpoint(&mut self, dir: &Path) -> Result<(), EngineError>;

    fn stats(&self) -> SimStats;

    fn reset_stats(&mut self);
}
