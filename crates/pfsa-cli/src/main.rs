#![forbid(unsafe_code)]

mod args;

use std::fs;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::Parser;
use pfsa_engine::{EngineError, ExecMode, ReferenceEngine};
use pfsa_plan::compute_plan;
use pfsa_sampler::workload::load_batch;
use pfsa_sampler::{
    run_all, DetailedJob, DriverConfig, InstructionTable, WorkloadCatalog, WorkloadRun,
    WorkloadSummary,
};
use tracing_subscriber::EnvFilter;

use crate::args::{
    CatalogArgs, Cli, Command, DetailArgs, DispatchArgs, FastForwardArgs, PlanArgs, RunArgs,
    SamplingArgs,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Plan(args) => plan(args),
        Command::Run(args) => run(args),
        Command::FastForward(args) => fast_forward(args),
        Command::Detail(args) => detail(args),
    }
}

fn plan(args: PlanArgs) -> Result<()> {
    let plan = compute_plan(args.total, args.sampling.unit_length, args.sampling.samples)?;
    let mut json = serde_json::to_value(plan)?;
    json["expected_checkpoints"] = plan.expected_checkpoints().into();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let keys = load_batch(&args.batch)?;
    let (catalog, table) = load_catalogs(&args.catalog)?;

    let mut summaries = Vec::new();
    let mut runs = Vec::new();
    for key in keys {
        match WorkloadRun::resolve(key.clone(), &catalog, &table) {
            Ok(run) => runs.push(run),
            Err(err) => {
                tracing::error!(workload = %key, %err, "skipping workload");
                summaries.push(WorkloadSummary::failed(key, err.to_string()));
            }
        }
    }

    summaries.extend(sample(&runs, &args.output, &args.sampling, &args.dispatch)?);
    report(&summaries)
}

fn fast_forward(args: FastForwardArgs) -> Result<()> {
    let (catalog, table) = load_catalogs(&args.catalog)?;
    let run = WorkloadRun::resolve(args.workload.key(), &catalog, &table)?;
    let summaries = sample(&[run], &args.output, &args.sampling, &args.dispatch)?;
    report(&summaries)
}

fn detail(args: DetailArgs) -> Result<()> {
    let workload = args.workload.key().to_string();
    let job = DetailedJob {
        checkpoint: args.checkpoint,
        warmup_length: args.warmup_length,
        unit_length: args.unit_length,
        outdir: args.outdir,
    };
    let sample = job
        .run(|dir| ReferenceEngine::restore_for(dir, &workload, ExecMode::Detailed))
        .with_context(|| format!("detailed job on {}", job.checkpoint.display()))?;
    println!("{}", serde_json::to_string(&sample)?);
    Ok(())
}

fn load_catalogs(args: &CatalogArgs) -> Result<(WorkloadCatalog, InstructionTable)> {
    let catalog = WorkloadCatalog::load(&args.catalog, args.package_root.as_deref())?;
    let table = InstructionTable::load(&args.inst_table)?;
    Ok((catalog, table))
}

fn sample(
    runs: &[WorkloadRun],
    output: &std::path::Path,
    sampling: &SamplingArgs,
    dispatch: &DispatchArgs,
) -> Result<Vec<WorkloadSummary>> {
    fs::create_dir_all(output)
        .with_context(|| format!("failed to create output root {}", output.display()))?;
    let config = DriverConfig {
        output_root: output.to_path_buf(),
        unit_length: sampling.unit_length,
        target_samples: sampling.samples,
        sampler: dispatch.sampler_config()?,
    };
    let backend = dispatch.backend()?;
    tracing::info!(
        workloads = runs.len(),
        proc_limit = config.sampler.proc_limit,
        proc_over_allowance = config.sampler.proc_over_allowance,
        job_program = %backend.program().display(),
        "starting sampled simulation"
    );
    Ok(run_all(runs, &config, boot, |_| backend.clone()))
}

fn boot(run: &WorkloadRun) -> Result<ReferenceEngine, EngineError> {
    Ok(ReferenceEngine::boot(run.program(), ExecMode::Functional))
}

fn report(summaries: &[WorkloadSummary]) -> Result<()> {
    let mut out = io::stdout().lock();
    let mut failed = 0;
    for summary in summaries {
        let status = if summary.is_success() {
            "ok"
        } else {
            failed += 1;
            "FAILED"
        };
        write!(
            out,
            "{}: {status} ({} checkpoints, {} job failures, {:.1}s)",
            summary.workload,
            summary.checkpoints_taken,
            summary.failures.len(),
            summary.host_seconds
        )?;
        if let Some(err) = &summary.error {
            write!(out, ": {err}")?;
        }
        writeln!(out)?;
    }
    if failed > 0 {
        bail!("{failed} of {} workload runs failed", summaries.len());
    }
    Ok(())
}
