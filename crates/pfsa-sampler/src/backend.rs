//! How detailed jobs are started and observed.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::workload::WorkloadKey;

/// Files a process-backed job's stdout and stderr are redirected to, inside its output directory.
pub const JOB_STDOUT_FILE: &str = "simout";
pub const JOB_STDERR_FILE: &str = "simerr";

/// Everything a detailed job needs to consume one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInvocation {
    pub checkpoint: u64,
    pub checkpoint_path: PathBuf,
    pub workload: WorkloadKey,
    pub unit_length: u64,
    pub warmup_length: u64,
    pub outdir: PathBuf,
}

impl JobInvocation {
    /// Arguments of the `detail` subcommand, excluding the subcommand itself.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(16);
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };
        push("--benchmark", self.workload.benchmark.clone().into());
        push("--size", self.workload.size.clone().into());
        push("--input-id", self.workload.input_id.clone().into());
        push("--checkpoint", self.checkpoint_path.clone().into());
        push("-U", self.unit_length.to_string().into());
        push("-W", self.warmup_length.to_string().into());
        push("--outdir", self.outdir.clone().into());
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobExit {
    pub success: bool,
    /// `None` when the job was terminated by a signal.
    pub code: Option<i32>,
}

pub trait JobHandle {
    /// Non-blocking completion check.
    fn try_wait(&mut self) -> io::Result<Option<JobExit>>;

    /// Terminates the job and reaps it.
    fn kill(&mut self) -> io::Result<()>;
}

pub struct Launched<H> {
    pub handle: H,
    pub pid: u32,
    /// Exact command line, program first.
    pub command: Vec<String>,
}

pub trait JobBackend {
    type Handle: JobHandle;

    fn launch(&mut self, job: &JobInvocation) -> io::Result<Launched<Self::Handle>>;

    /// Blocks the caller between completion polls.
    fn idle(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Runs every detailed job as a child process.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Re-invokes the running executable as `<exe> detail ...`.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["detail".into()]))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, job: &JobInvocation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).args(job.args());
        cmd
    }
}

impl JobBackend for ProcessBackend {
    type Handle = ProcessHandle;

    fn launch(&mut self, job: &JobInvocation) -> io::Result<Launched<ProcessHandle>> {
        fs::create_dir_all(&job.outdir)?;
        let stdout = File::create(job.outdir.join(JOB_STDOUT_FILE))?;
        let stderr = File::create(job.outdir.join(JOB_STDERR_FILE))?;

        let mut cmd = self.command(job);
        let command = std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect();

        let child = cmd
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => io::Error::new(
                    err.kind(),
                    format!("missing job program: {}", self.program.display()),
                ),
                _ => err,
            })?;

        Ok(Launched {
            pid: child.id(),
            handle: ProcessHandle(child),
            command,
        })
    }
}

pub struct ProcessHandle(Child);

impl JobHandle for ProcessHandle {
    fn try_wait(&mut self) -> io::Result<Option<JobExit>> {
        Ok(self.0.try_wait()?.map(|status| JobExit {
            success: status.success(),
            code: status.code(),
        }))
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.0.kill() {
            Ok(()) => {}
            // Already exited; still reap below.
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(err),
        }
        self.0.wait().map(|_| ())
    }
}
