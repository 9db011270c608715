//! The detailed job: restore a checkpoint, warm up, measure, report, and delete the checkpoint.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use pfsa_engine::{EngineError, RunExit, SimEngine, SimStats};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SamplerError};
use crate::store;

pub const SAMPLE_FILE_NAME: &str = "stats.json";

/// The window in which the program exited before the sample was complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    Warmup,
    Measurement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSample {
    pub checkpoint: PathBuf,
    /// Committed instructions at the restored checkpoint.
    pub start_insts: u64,
    pub warmup_requested: u64,
    pub warmup_executed: u64,
    pub measure_requested: u64,
    pub measure_executed: u64,
    pub truncated: Option<Truncation>,
    /// Counters for the measurement window only.
    pub stats: SimStats,
}

impl StatsSample {
    pub fn is_complete(&self) -> bool {
        self.truncated.is_none()
    }

    pub fn ipc(&self) -> f64 {
        self.stats.ipc()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(SamplerError::fs(path))?;
        serde_json::from_slice(&bytes).map_err(|source| SamplerError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DetailedJob {
    pub checkpoint: PathBuf,
    pub warmup_length: u64,
    pub unit_length: u64,
    pub outdir: PathBuf,
}

impl DetailedJob {
    pub fn sample_path(&self) -> PathBuf {
        self.outdir.join(SAMPLE_FILE_NAME)
    }

    /// Runs the job against the engine produced by `restore`.
    ///
    /// Once the restore has succeeded the checkpoint is deleted whatever happens afterwards, so
    /// the dispatcher's slot is always released by a job that got that far. A failed restore
    /// leaves the checkpoint in place.
    pub fn run<E, F>(&self, restore: F) -> Result<StatsSample>
    where
        E: SimEngine,
        F: FnOnce(&Path) -> std::result::Result<E, EngineError>,
    {
        let mut engine = restore(&self.checkpoint).map_err(|source| SamplerError::Restore {
            path: self.checkpoint.clone(),
            source,
        })?;

        let outcome = self
            .simulate(&mut engine)
            .and_then(|sample| self.write_sample(&sample).map(|()| sample));
        let removed = store::discard(&self.checkpoint);

        let sample = outcome?;
        removed?;
        Ok(sample)
    }

    fn simulate<E: SimEngine>(&self, engine: &mut E) -> Result<StatsSample> {
        let start_insts = engine.committed_insts();

        let warmup = engine.run(self.warmup_length)?;
        engine.reset_stats();
        let cleared = engine.stats();
        if !cleared.is_zero() {
            return Err(SamplerError::StatsNotReset {
                instructions: cleared.instructions,
            });
        }

        let (truncated, measure_executed) = match warmup {
            RunExit::Exited { .. } => (Some(Truncation::Warmup), 0),
            RunExit::Paused { .. } => match engine.run(self.unit_length)? {
                RunExit::Exited { executed, .. } => (Some(Truncation::Measurement), executed),
                RunExit::Paused { executed } => (None, executed),
            },
        };

        let sample = StatsSample {
            checkpoint: self.checkpoint.clone(),
            start_insts,
            warmup_requested: self.warmup_length,
            warmup_executed: warmup.executed(),
            measure_requested: self.unit_length,
            measure_executed,
            truncated,
            stats: engine.stats(),
        };
        match truncated {
            None => info!(
                start_insts,
                ipc = sample.ipc(),
                "detailed sample complete"
            ),
            Some(window) => warn!(
                start_insts,
                ?window,
                measure_executed,
                "program exited before the sample window ended"
            ),
        }
        Ok(sample)
    }

    fn write_sample(&self, sample: &StatsSample) -> Result<()> {
        fs::create_dir_all(&self.outdir).map_err(SamplerError::fs(&self.outdir))?;
        let path = self.sample_path();
        let mut w = BufWriter::new(File::create(&path).map_err(SamplerError::fs(&path))?);
        serde_json::to_writer_pretty(&mut w, sample).map_err(|source| SamplerError::Json {
            path: path.clone(),
            source,
        })?;
        w.flush().map_err(SamplerError::fs(&path))
    }
}
