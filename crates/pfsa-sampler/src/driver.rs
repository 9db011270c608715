//! Per-workload orchestration and the concurrent fan-out over a batch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use pfsa_engine::{EngineError, Program, SimEngine};
use pfsa_plan::{compute_plan, PlanError, SamplingPlan};
use tracing::{error, info, info_span, warn};

use crate::backend::JobBackend;
use crate::config::SamplerConfig;
use crate::controller::FastForwardController;
use crate::dispatcher::{CheckpointDispatcher, JobTemplate};
use crate::error::{Result, SamplerError};
use crate::fast_forward;
use crate::store::CheckpointStore;
use crate::summary::{WorkloadSummary, SUMMARY_FILE_NAME};
use crate::workload::{InstructionTable, WorkloadCatalog, WorkloadKey, WorkloadSpec};

pub const CHECKPOINT_DIR: &str = "cpt";
pub const RESTORE_DIR: &str = "restore";

/// One independent unit of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRun {
    pub key: WorkloadKey,
    pub spec: WorkloadSpec,
    pub total_insts: u64,
}

impl WorkloadRun {
    pub fn resolve(
        key: WorkloadKey,
        catalog: &WorkloadCatalog,
        table: &InstructionTable,
    ) -> Result<Self> {
        Ok(Self {
            spec: catalog.resolve(&key)?,
            total_insts: table.lookup(&key)?,
            key,
        })
    }

    /// The program the fast-forward engine boots for this run.
    pub fn program(&self) -> Program {
        Program::from_binary(
            &self.key.to_string(),
            &self.spec.binary,
            &self.spec.arguments,
            self.spec.stdin.as_deref(),
            self.total_insts,
        )
    }

    pub fn plan(
        &self,
        unit_length: u64,
        target_samples: u64,
    ) -> std::result::Result<SamplingPlan, PlanError> {
        compute_plan(self.total_insts, unit_length, target_samples)
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub output_root: PathBuf,
    pub unit_length: u64,
    pub target_samples: u64,
    pub sampler: SamplerConfig,
}

/// `<output_root>/<bench>-<size>-<input>/{cpt,restore,summary.json}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub root: PathBuf,
    pub checkpoints: PathBuf,
    pub restore: PathBuf,
}

impl RunLayout {
    pub fn new(output_root: &Path, key: &WorkloadKey) -> Self {
        let root = output_root.join(key.to_string());
        Self {
            checkpoints: root.join(CHECKPOINT_DIR),
            restore: root.join(RESTORE_DIR),
            root,
        }
    }

    /// Creates the run directory, refusing to reuse one left by an earlier run.
    pub fn create(&self) -> Result<()> {
        fs::create_dir(&self.root).map_err(SamplerError::fs(&self.root))?;
        fs::create_dir(&self.checkpoints).map_err(SamplerError::fs(&self.checkpoints))?;
        fs::create_dir(&self.restore).map_err(SamplerError::fs(&self.restore))?;
        Ok(())
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE_NAME)
    }
}

/// Runs one workload to completion and writes its summary.
///
/// Never fails: every error ends up in the returned summary.
pub fn run_workload<E, B, Boot>(
    run: &WorkloadRun,
    config: &DriverConfig,
    boot: Boot,
    backend: B,
) -> WorkloadSummary
where
    E: SimEngine,
    B: JobBackend,
    Boot: FnOnce(&WorkloadRun) -> std::result::Result<E, EngineError>,
{
    let _span = info_span!("workload", workload = %run.key).entered();
    let started = Instant::now();
    let layout = RunLayout::new(&config.output_root, &run.key);
    let mut summary = WorkloadSummary::new(run.key.clone());
    summary.spec = Some(run.spec.clone());

    let mut created = false;
    let result = layout.create().and_then(|()| {
        created = true;
        execute(run, config, &layout, boot, backend, &mut summary)
    });

    match result {
        Ok(()) if summary.failures.is_empty() && summary.abandoned.is_empty() => {}
        Ok(()) => summary.fail(format!(
            "{} detailed job(s) failed, {} checkpoint(s) abandoned",
            summary.failures.len(),
            summary.abandoned.len()
        )),
        Err(err) => {
            error!(%err, "workload run failed");
            summary.fail(err.to_string());
        }
    }
    summary.host_seconds = started.elapsed().as_secs_f64();

    if created {
        if let Err(err) = summary.write(&layout.summary_path()) {
            warn!(%err, "failed to write summary");
        }
    }
    info!(
        status = ?summary.status,
        checkpoints = summary.checkpoints_taken,
        failures = summary.failures.len(),
        host_seconds = summary.host_seconds,
        "workload run finished"
    );
    summary
}

fn execute<E, B, Boot>(
    run: &WorkloadRun,
    config: &DriverConfig,
    layout: &RunLayout,
    boot: Boot,
    backend: B,
    summary: &mut WorkloadSummary,
) -> Result<()>
where
    E: SimEngine,
    B: JobBackend,
    Boot: FnOnce(&WorkloadRun) -> std::result::Result<E, EngineError>,
{
    let plan = run.plan(config.unit_length, config.target_samples)?;
    summary.plan = Some(plan);
    info!(
        total = plan.total_dynamic_instructions,
        stride = plan.stride,
        warmup = plan.warmup_length,
        warmup_start = plan.warmup_start,
        expected_checkpoints = plan.expected_checkpoints(),
        "sampling plan"
    );

    let mut engine = boot(run)?;
    let store = Arc::new(CheckpointStore::open(&layout.checkpoints)?);
    let template = JobTemplate {
        workload: run.key.clone(),
        unit_length: plan.unit_length,
        warmup_length: plan.warmup_length,
        output_root: layout.restore.clone(),
    };
    let mut dispatcher =
        CheckpointDispatcher::new(config.sampler.clone(), backend, store.clone(), template)?;
    let mut controller = FastForwardController::new(plan);

    let fast_forward = fast_forward::run(&mut engine, &mut controller, &mut dispatcher);
    if let Err(err) = &fast_forward {
        error!(%err, "fast-forward stopped early; draining submitted jobs");
    }
    dispatcher.drain(engine.cur_tick());

    let report = dispatcher.into_report();
    summary.checkpoints_taken = report.states.len() as u64;
    summary.committed_insts = engine.committed_insts();
    summary.dispatch = report.records;
    summary.failures = report.failures;
    summary.abandoned = report.abandoned;
    summary.leftover_checkpoints = Some(store.disk_occupancy()?);

    summary.exit_code = Some(fast_forward?.exit_code);
    Ok(())
}

/// Runs every workload concurrently on its own thread.
///
/// Each run gets its own engine from `boot` and its own backend from `backend`; a failure or
/// panic in one run does not affect the others.
pub fn run_all<E, B, Boot, Backend>(
    runs: &[WorkloadRun],
    config: &DriverConfig,
    boot: Boot,
    backend: Backend,
) -> Vec<WorkloadSummary>
where
    E: SimEngine,
    B: JobBackend,
    Boot: Fn(&WorkloadRun) -> std::result::Result<E, EngineError> + Sync,
    Backend: Fn(&WorkloadRun) -> B + Sync,
{
    let boot = &boot;
    let backend = &backend;
    thread::scope(|scope| {
        let handles: Vec<_> = runs
            .iter()
            .map(|run| scope.spawn(move || run_workload(run, config, boot, backend(run))))
            .collect();

        handles
            .into_iter()
            .zip(runs)
            .map(|(handle, run)| match handle.join() {
                Ok(summary) => summary,
                Err(_) => {
                    error!(workload = %run.key, "workload thread panicked");
                    let summary =
                        WorkloadSummary::failed(run.key.clone(), "workload thread panicked");
                    let layout = RunLayout::new(&config.output_root, &run.key);
                    let path = layout.summary_path();
                    if layout.root.is_dir() && !path.exists() {
                        if let Err(err) = summary.write(&path) {
                            warn!(%err, "failed to write summary");
                        }
                    }
                    summary
                }
            })
            .collect()
    })
}
