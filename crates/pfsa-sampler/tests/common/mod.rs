#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pfsa_engine::{EngineError, ExecMode, ReferenceEngine, RunExit, SimEngine, SimStats};
use pfsa_sampler::{
    DetailedJob, DriverConfig, JobBackend, JobExit, JobHandle, JobInvocation, Launched,
    SamplerConfig, WorkloadKey, WorkloadRun, WorkloadSpec,
};

/// Runs each detailed job in-process on its own thread.
#[derive(Default)]
pub struct ThreadBackend {
    next_pid: u32,
}

pub struct ThreadHandle {
    thread: Option<JoinHandle<bool>>,
    exit: Option<JobExit>,
}

impl JobHandle for ThreadHandle {
    fn try_wait(&mut self) -> io::Result<Option<JobExit>> {
        if self.exit.is_none() && self.thread.as_ref().is_some_and(|t| t.is_finished()) {
            let ok = self.thread.take().is_some_and(|t| t.join().unwrap_or(false));
            self.exit = Some(JobExit {
                success: ok,
                code: Some(if ok { 0 } else { 1 }),
            });
        }
        Ok(self.exit)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.thread = None;
        Ok(())
    }
}

impl JobBackend for ThreadBackend {
    type Handle = ThreadHandle;

    fn launch(&mut self, inv: &JobInvocation) -> io::Result<Launched<ThreadHandle>> {
        self.next_pid += 1;
        let job = DetailedJob {
            checkpoint: inv.checkpoint_path.clone(),
            warmup_length: inv.warmup_length,
            unit_length: inv.unit_length,
            outdir: inv.outdir.clone(),
        };
        let workload = inv.workload.to_string();
        let thread = thread::spawn(move || {
            job.run(|dir| ReferenceEngine::restore_for(dir, &workload, ExecMode::Detailed))
                .is_ok()
        });
        Ok(Launched {
            handle: ThreadHandle {
                thread: Some(thread),
                exit: None,
            },
            pid: self.next_pid,
            command: vec!["detail".into(), inv.checkpoint.to_string()],
        })
    }

    fn idle(&mut self, interval: Duration) {
        thread::sleep(interval);
    }
}

pub fn fast_config() -> SamplerConfig {
    SamplerConfig {
        proc_limit: 3,
        proc_over_allowance: 2,
        poll_interval: Duration::from_millis(2),
        job_timeout: Some(Duration::from_secs(60)),
    }
}

pub fn driver_config(output_root: &Path) -> DriverConfig {
    DriverConfig {
        output_root: output_root.to_path_buf(),
        unit_length: 1000,
        target_samples: 10,
        sampler: fast_config(),
    }
}

pub fn workload_run(bench: &str, total_insts: u64) -> WorkloadRun {
    WorkloadRun {
        key: WorkloadKey::new(bench, "test", "0"),
        spec: WorkloadSpec {
            binary: PathBuf::from(format!("/bench/{bench}/exe/{bench}")),
            arguments: vec!["input.txt".into()],
            stdin: None,
            stdout: None,
            stderr: None,
        },
        total_insts,
    }
}

pub fn boot_reference(run: &WorkloadRun) -> Result<ReferenceEngine, EngineError> {
    Ok(ReferenceEngine::boot(run.program(), ExecMode::Functional))
}

/// A reference engine whose `n`-th checkpoint write fails.
pub struct FlakyEngine {
    pub inner: ReferenceEngine,
    pub fail_checkpoint: Option<u64>,
    pub taken: u64,
}

impl SimEngine for FlakyEngine {
    fn run(&mut self, max_insts: u64) -> Result<RunExit, EngineError> {
        self.inner.run(max_insts)
    }

    fn committed_insts(&self) -> u64 {
        self.inner.committed_insts()
    }

    fn cur_tick(&self) -> u64 {
        self.inner.cur_tick()
    }

    fn checkpoint(&mut self, dir: &Path) -> Result<(), EngineError> {
        let n = self.taken;
        self.taken += 1;
        if self.fail_checkpoint == Some(n) {
            std::fs::write(dir.join("partial"), b"truncated")
                .map_err(|e| EngineError::Fault(e.to_string()))?;
            return Err(EngineError::Fault("checkpoint device full".into()));
        }
        self.inner.checkpoint(dir)
    }

    fn stats(&self) -> SimStats {
        self.inner.stats()
    }

    fn reset_stats(&mut self) {
        self.inner.reset_stats()
    }
}
