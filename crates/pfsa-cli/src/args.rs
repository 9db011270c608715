use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pfsa_sampler::config::{DEFAULT_PROC_LIMIT, DEFAULT_PROC_OVER_ALLOWANCE};
use pfsa_sampler::{ProcessBackend, SamplerConfig, WorkloadKey};

#[derive(Debug, Parser)]
#[command(
    name = "pfsa",
    version,
    about = "Parallel fast-forward sampled simulation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the sampling plan for a program of a given length as JSON.
    Plan(PlanArgs),
    /// Sample every workload of a batch file concurrently.
    Run(RunArgs),
    /// Sample a single workload.
    FastForward(FastForwardArgs),
    /// Consume one checkpoint: warm up, measure, write stats.json, delete the checkpoint.
    Detail(DetailArgs),
}

#[derive(Debug, Args)]
pub struct SamplingArgs {
    /// Instructions per measurement unit.
    #[arg(short = 'U', long = "unit-length", default_value_t = 1000)]
    pub unit_length: u64,

    /// Target number of samples.
    #[arg(short = 'n', long = "samples", default_value_t = 10_000)]
    pub samples: u64,
}

#[derive(Debug, Args)]
pub struct WorkloadArgs {
    #[arg(long)]
    pub benchmark: String,

    #[arg(long)]
    pub size: String,

    #[arg(long)]
    pub input_id: String,
}

impl WorkloadArgs {
    pub fn key(&self) -> WorkloadKey {
        WorkloadKey::new(&self.benchmark, &self.size, &self.input_id)
    }
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Workload catalog (`binary-<bench>-<size>-input-<input>` entries).
    #[arg(long)]
    pub catalog: PathBuf,

    /// Directory holding `<bench>/exe` and `<bench>/input`; defaults to the catalog's directory.
    #[arg(long)]
    pub package_root: Option<PathBuf>,

    /// Dynamic instruction counts, `{size: {bench: {input: count}}}`.
    #[arg(long)]
    pub inst_table: PathBuf,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Detailed jobs allowed to run at once per workload.
    #[arg(long, default_value_t = DEFAULT_PROC_LIMIT)]
    pub proc_limit: usize,

    /// Extra checkpoints allowed to wait on disk before fast-forwarding pauses.
    #[arg(long, default_value_t = DEFAULT_PROC_OVER_ALLOWANCE)]
    pub proc_over_allowance: usize,

    /// How often to check for finished jobs while waiting [env: PFSA_POLL_INTERVAL_MS].
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Kill detailed jobs running longer than this; 0 disables [env: PFSA_JOB_TIMEOUT_SECS].
    #[arg(long)]
    pub job_timeout_secs: Option<u64>,

    /// Program to run for each detailed job instead of this executable.
    #[arg(long)]
    pub job_program: Option<PathBuf>,

    /// Arguments placed before the job arguments; defaults to `detail`.
    #[arg(long = "job-arg", allow_hyphen_values = true)]
    pub job_args: Vec<String>,
}

impl DispatchArgs {
    /// Defaults, then environment overrides, then flags.
    pub fn sampler_config(&self) -> Result<SamplerConfig> {
        let mut config = SamplerConfig {
            proc_limit: self.proc_limit,
            proc_over_allowance: self.proc_over_allowance,
            ..SamplerConfig::default()
        }
        .apply_env()?;
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.job_timeout_secs {
            config.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn backend(&self) -> Result<ProcessBackend> {
        let leading: Vec<OsString> = if self.job_args.is_empty() {
            vec!["detail".into()]
        } else {
            self.job_args.iter().map(OsString::from).collect()
        };
        let program = match &self.job_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().context("failed to locate the pfsa executable")?,
        };
        Ok(ProcessBackend::new(program, leading))
    }
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Total dynamic instructions of the program.
    #[arg(long)]
    pub total: u64,

    #[command(flatten)]
    pub sampling: SamplingArgs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Batch file, `{size: {bench: [input, ...]}}`.
    #[arg(long)]
    pub batch: PathBuf,

    /// Output root; each workload gets `<bench>-<size>-<input>/` underneath.
    #[arg(long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    #[command(flatten)]
    pub dispatch: DispatchArgs,
}

#[derive(Debug, Args)]
pub struct FastForwardArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    #[arg(long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    #[command(flatten)]
    pub dispatch: DispatchArgs,
}

#[derive(Debug, Args)]
pub struct DetailArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    /// Checkpoint directory to restore; deleted once restored.
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Measurement unit length.
    #[arg(short = 'U', long = "unit-length")]
    pub unit_length: u64,

    /// Warmup length.
    #[arg(short = 'W', long = "warmup-length")]
    pub warmup_length: u64,

    /// Where stats.json is written.
    #[arg(long)]
    pub outdir: PathBuf,
}
