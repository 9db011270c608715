//! Bounded-concurrency dispatch of detailed jobs.
//!
//! Capacity is counted through the store's outstanding-checkpoint counter: a checkpoint holds a
//! slot from creation until its job has exited successfully and its directory is gone. Checkpoints
//! that do not fit are waitlisted and dispatched most-recent-first. When too many checkpoints are
//! waitlisted the submitting controller is held until jobs finish.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::{JobBackend, JobHandle, JobInvocation};
use crate::config::SamplerConfig;
use crate::error::{JobFailure, Result, SamplerError};
use crate::store::{Checkpoint, CheckpointState, CheckpointStore};
use crate::workload::WorkloadKey;

/// One launched job. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    /// Simulated tick of the fast-forward engine when the job was launched.
    pub tick: u64,
    pub pid: u32,
    pub command: Vec<String>,
}

/// Parameters shared by every job of one workload run.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub workload: WorkloadKey,
    pub unit_length: u64,
    pub warmup_length: u64,
    /// Each job writes into `<output_root>/<checkpoint id>`.
    pub output_root: PathBuf,
}

impl JobTemplate {
    pub fn invocation(&self, checkpoint: &Checkpoint) -> JobInvocation {
        JobInvocation {
            checkpoint: checkpoint.id,
            checkpoint_path: checkpoint.path.clone(),
            workload: self.workload.clone(),
            unit_length: self.unit_length,
            warmup_length: self.warmup_length,
            outdir: self.output_root.join(checkpoint.id.to_string()),
        }
    }
}

struct Running<H> {
    checkpoint: Checkpoint,
    handle: H,
    pid: u32,
    started: Instant,
}

/// Bookkeeping handed to the driver once the dispatcher has drained.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub records: BTreeMap<u64, DispatchRecord>,
    pub states: BTreeMap<u64, CheckpointState>,
    pub failures: Vec<JobFailure>,
    /// Checkpoints that were never run: left on the waitlist or whose launch failed.
    pub abandoned: Vec<u64>,
}

pub struct CheckpointDispatcher<B: JobBackend> {
    config: SamplerConfig,
    backend: B,
    store: Arc<CheckpointStore>,
    template: JobTemplate,
    waitlist: Vec<Checkpoint>,
    running: Vec<Running<B::Handle>>,
    records: BTreeMap<u64, DispatchRecord>,
    states: BTreeMap<u64, CheckpointState>,
    failures: Vec<JobFailure>,
    abandoned: Vec<u64>,
    launch_failed: bool,
}

impl<B: JobBackend> CheckpointDispatcher<B> {
    /// Fails when `config` cannot keep the outstanding-checkpoint bound.
    pub fn new(
        config: SamplerConfig,
        backend: B,
        store: Arc<CheckpointStore>,
        template: JobTemplate,
    ) -> Result<Self> {
        config.validate()?;
        debug!(
            proc_limit = config.proc_limit,
            max_outstanding = config.max_outstanding(),
            "dispatcher ready"
        );
        Ok(Self {
            config,
            backend,
            store,
            template,
            waitlist: Vec::new(),
            running: Vec::new(),
            records: BTreeMap::new(),
            states: BTreeMap::new(),
            failures: Vec::new(),
            abandoned: Vec::new(),
            launch_failed: false,
        })
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    pub fn waiting(&self) -> usize {
        self.waitlist.len()
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn state(&self, id: u64) -> Option<CheckpointState> {
        self.states.get(&id).copied()
    }

    pub fn records(&self) -> &BTreeMap<u64, DispatchRecord> {
        &self.records
    }

    pub fn failures(&self) -> &[JobFailure] {
        &self.failures
    }

    /// Slots held by checkpoints that have left the waitlist and not yet been acknowledged.
    fn in_use(&self) -> usize {
        self.store.outstanding().saturating_sub(self.waitlist.len())
    }

    /// Hands a freshly created checkpoint to the dispatcher.
    ///
    /// Returns once the checkpoint is either running or waitlisted and the number of checkpoints
    /// on disk is within `proc_limit + proc_over_allowance`. `tick` is the engine's current tick,
    /// recorded for every job launched during this call.
    pub fn submit(&mut self, checkpoint: Checkpoint, tick: u64) -> Result<()> {
        debug!(id = checkpoint.id, "checkpoint submitted");
        self.states.insert(checkpoint.id, CheckpointState::Waiting);
        self.waitlist.push(checkpoint);

        self.reap()?;
        self.dispatch_ready(tick)?;

        while self.store.outstanding() > self.config.proc_limit {
            if self.waitlist.len() < self.config.proc_over_allowance {
                break;
            }
            if self.running.is_empty() {
                return Err(SamplerError::Stalled {
                    outstanding: self.store.outstanding(),
                    waiting: self.waitlist.len(),
                });
            }
            debug!(
                outstanding = self.store.outstanding(),
                waiting = self.waitlist.len(),
                running = self.running.len(),
                "waiting for detailed jobs to free capacity"
            );
            self.backend.idle(self.config.poll_interval);
            self.reap()?;
            self.dispatch_ready(tick)?;
        }
        debug_assert!(self.store.outstanding() < self.config.max_outstanding());
        Ok(())
    }

    /// Waits for every in-flight job, dispatching waitlisted checkpoints as capacity frees up.
    ///
    /// Failures seen while draining are recorded, not returned. Checkpoints that can no longer
    /// run are reported as abandoned.
    pub fn drain(&mut self, tick: u64) {
        loop {
            if let Err(err) = self.reap() {
                warn!(%err, "detailed job failed while draining");
            }
            if let Err(err) = self.dispatch_ready(tick) {
                warn!(%err, "dispatch failed while draining");
            }
            if self.running.is_empty() {
                break;
            }
            self.backend.idle(self.config.poll_interval);
        }

        if !self.waitlist.is_empty() {
            warn!(
                count = self.waitlist.len(),
                "abandoning waitlisted checkpoints"
            );
            self.abandoned
                .extend(self.waitlist.drain(..).map(|cp| cp.id));
        }
    }

    pub fn into_report(self) -> DispatchReport {
        DispatchReport {
            records: self.records,
            states: self.states,
            failures: self.failures,
            abandoned: self.abandoned,
        }
    }

    fn dispatch_ready(&mut self, tick: u64) -> Result<()> {
        if self.launch_failed {
            return Ok(());
        }
        while self.in_use() < self.config.proc_limit {
            let Some(checkpoint) = self.waitlist.pop() else {
                break;
            };
            self.launch(checkpoint, tick)?;
        }
        Ok(())
    }

    fn launch(&mut self, checkpoint: Checkpoint, tick: u64) -> Result<()> {
        let job = self.template.invocation(&checkpoint);
        match self.backend.launch(&job) {
            Ok(launched) => {
                info!(
                    id = checkpoint.id,
                    pid = launched.pid,
                    tick,
                    "detailed job launched"
                );
                self.records.insert(
                    checkpoint.id,
                    DispatchRecord {
                        tick,
                        pid: launched.pid,
                        command: launched.command,
                    },
                );
                self.states
                    .insert(checkpoint.id, CheckpointState::Dispatched);
                self.running.push(Running {
                    checkpoint,
                    handle: launched.handle,
                    pid: launched.pid,
                    started: Instant::now(),
                });
                Ok(())
            }
            Err(err) => {
                // The slot stays consumed: the checkpoint is still on disk and nobody will
                // delete it.
                error!(id = checkpoint.id, %err, "failed to launch detailed job");
                self.launch_failed = true;
                self.abandoned.push(checkpoint.id);
                let failure = JobFailure::Dispatch {
                    checkpoint: checkpoint.id,
                    error: err.to_string(),
                };
                self.failures.push(failure.clone());
                Err(failure.into())
            }
        }
    }

    /// Collects finished and overdue jobs. Returns the first failure seen, after recording all.
    fn reap(&mut self) -> Result<()> {
        let mut first = None;
        let mut i = 0;
        while i < self.running.len() {
            let job = &mut self.running[i];
            let exit = match job.handle.try_wait() {
                Ok(exit) => exit,
                Err(err) => {
                    warn!(id = job.checkpoint.id, pid = job.pid, %err, "failed to poll detailed job");
                    None
                }
            };
            // A job that cannot be polled still counts against the liveness timeout.
            let outcome = match (exit, self.config.job_timeout) {
                (Some(exit), _) => Some(Ok(exit)),
                (None, Some(limit)) if job.started.elapsed() > limit => Some(Err(limit)),
                (None, _) => None,
            };
            let Some(outcome) = outcome else {
                i += 1;
                continue;
            };

            let job = self.running.swap_remove(i);
            let id = job.checkpoint.id;
            let failure = match outcome {
                Ok(exit) if exit.success && self.store.acknowledge(&job.checkpoint) => {
                    debug!(id, pid = job.pid, "detailed job completed");
                    self.states.insert(id, CheckpointState::Completed);
                    continue;
                }
                Ok(exit) => JobFailure::Crash {
                    checkpoint: id,
                    pid: job.pid,
                    code: exit.code,
                    checkpoint_left: job.checkpoint.path.exists(),
                },
                Err(limit) => {
                    let mut handle = job.handle;
                    if let Err(err) = handle.kill() {
                        warn!(id, pid = job.pid, %err, "failed to kill overdue detailed job");
                    }
                    JobFailure::Timeout {
                        checkpoint: id,
                        pid: job.pid,
                        after_secs: limit.as_secs(),
                    }
                }
            };
            error!(%failure, "detailed job failed");
            self.failures.push(failure.clone());
            first.get_or_insert(failure);
        }
        match first {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::rc::Rc;
    use std::time::Duration;

    use pfsa_engine::EngineError;

    use crate::backend::{JobExit, Launched};
    use crate::config::ConfigError;
    use crate::store::discard;

    #[derive(Default)]
    struct Jobs {
        /// checkpoint id -> (checkpoint path, exit once finished)
        slots: BTreeMap<u64, (PathBuf, Option<JobExit>)>,
        launched: Vec<u64>,
        idles: usize,
        fail_launch: bool,
        fail_poll: bool,
    }

    impl Jobs {
        fn finish(&mut self, id: u64, delete: bool, code: i32) {
            let (path, exit) = self.slots.get_mut(&id).unwrap();
            if delete {
                discard(path).unwrap();
            }
            *exit = Some(JobExit {
                success: code == 0,
                code: Some(code),
            });
        }
    }

    #[derive(Clone, Default)]
    struct ManualBackend {
        jobs: Rc<RefCell<Jobs>>,
    }

    struct ManualHandle {
        id: u64,
        jobs: Rc<RefCell<Jobs>>,
    }

    impl JobHandle for ManualHandle {
        fn try_wait(&mut self) -> io::Result<Option<JobExit>> {
            let jobs = self.jobs.borrow();
            if jobs.fail_poll {
                return Err(io::Error::new(io::ErrorKind::Other, "wait failed"));
            }
            Ok(jobs.slots[&self.id].1)
        }

        fn kill(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl JobBackend for ManualBackend {
        type Handle = ManualHandle;

        fn launch(&mut self, job: &JobInvocation) -> io::Result<Launched<ManualHandle>> {
            let mut jobs = self.jobs.borrow_mut();
            if jobs.fail_launch {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no job program"));
            }
            jobs.slots
                .insert(job.checkpoint, (job.checkpoint_path.clone(), None));
            jobs.launched.push(job.checkpoint);
            Ok(Launched {
                handle: ManualHandle {
                    id: job.checkpoint,
                    jobs: self.jobs.clone(),
                },
                pid: 1000 + job.checkpoint as u32,
                command: vec!["pfsa".into(), "detail".into()],
            })
        }

        fn idle(&mut self, _interval: Duration) {
            let mut jobs = self.jobs.borrow_mut();
            jobs.idles += 1;
            // Blocked with nothing able to finish: the oldest running job completes.
            let next = jobs
                .slots
                .iter()
                .find(|(_, (_, exit))| exit.is_none())
                .map(|(id, _)| *id);
            if let Some(id) = next {
                jobs.finish(id, true, 0);
            }
        }
    }

    fn write_marker(dir: &Path) -> std::result::Result<(), EngineError> {
        fs::write(dir.join("state"), b"x").map_err(|e| EngineError::Fault(e.to_string()))
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: Arc<CheckpointStore>,
        dispatcher: CheckpointDispatcher<ManualBackend>,
        jobs: Rc<RefCell<Jobs>>,
        next_id: u64,
    }

    impl Fixture {
        fn new(proc_limit: usize, proc_over_allowance: usize) -> Self {
            Self::with_timeout(proc_limit, proc_over_allowance, None)
        }

        fn with_timeout(
            proc_limit: usize,
            proc_over_allowance: usize,
            job_timeout: Option<Duration>,
        ) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let store = Arc::new(CheckpointStore::open(tmp.path().join("cpt")).unwrap());
            let backend = ManualBackend::default();
            let jobs = backend.jobs.clone();
            let config = SamplerConfig {
                proc_limit,
                proc_over_allowance,
                poll_interval: Duration::from_millis(1),
                job_timeout,
            };
            let template = JobTemplate {
                workload: WorkloadKey::new("mcf", "ref", "0"),
                unit_length: 10,
                warmup_length: 10,
                output_root: tmp.path().join("restore"),
            };
            let dispatcher =
                CheckpointDispatcher::new(config, backend, store.clone(), template).unwrap();
            Self {
                _tmp: tmp,
                store,
                dispatcher,
                jobs,
                next_id: 0,
            }
        }

        fn create(&mut self) -> Checkpoint {
            let id = self.next_id;
            self.next_id += 1;
            self.store.create(id, id * 100, id * 10, write_marker).unwrap()
        }

        fn submit(&mut self) -> Result<()> {
            let cp = self.create();
            let tick = cp.tick;
            self.dispatcher.submit(cp, tick)
        }
    }

    #[test]
    fn third_submit_blocks_until_a_job_finishes() {
        let mut fx = Fixture::new(2, 1);

        fx.submit().unwrap();
        fx.submit().unwrap();
        assert_eq!(fx.dispatcher.running(), 2);
        assert_eq!(fx.dispatcher.waiting(), 0);
        assert_eq!(fx.jobs.borrow().idles, 0);

        // Checkpoint 2 has no free slot, and one waiting checkpoint reaches the allowance, so
        // submit only returns after a job has finished and the waiting one was launched.
        fx.submit().unwrap();
        assert_eq!(fx.jobs.borrow().idles, 1);
        assert_eq!(fx.dispatcher.state(0), Some(CheckpointState::Completed));
        assert_eq!(fx.dispatcher.state(1), Some(CheckpointState::Dispatched));
        assert_eq!(fx.dispatcher.state(2), Some(CheckpointState::Dispatched));
        assert_eq!(fx.store.outstanding(), 2);
    }

    #[test]
    fn waitlist_is_lifo() {
        let mut fx = Fixture::new(1, 3);
        for _ in 0..3 {
            fx.submit().unwrap();
        }
        assert_eq!(fx.dispatcher.running(), 1);
        assert_eq!(fx.dispatcher.waiting(), 2);
        assert_eq!(fx.jobs.borrow().idles, 0);

        // The fourth reaches the allowance: job 0 finishes, then the newest checkpoint runs.
        fx.submit().unwrap();
        assert_eq!(fx.dispatcher.state(0), Some(CheckpointState::Completed));
        assert_eq!(fx.dispatcher.state(3), Some(CheckpointState::Dispatched));
        assert_eq!(fx.dispatcher.state(1), Some(CheckpointState::Waiting));
        assert_eq!(fx.dispatcher.state(2), Some(CheckpointState::Waiting));

        fx.dispatcher.drain(0);
        assert_eq!(fx.jobs.borrow().launched, vec![0, 3, 2, 1]);
        let report = fx.dispatcher.into_report();
        assert_eq!(report.records.len(), 4);
        assert!(report.failures.is_empty());
        assert!(report.abandoned.is_empty());
        assert!(report
            .states
            .values()
            .all(|s| *s == CheckpointState::Completed));
        assert_eq!(fx.store.outstanding(), 0);
    }

    #[test]
    fn nonzero_exit_is_a_crash() {
        let mut fx = Fixture::new(4, 4);
        fx.submit().unwrap();
        fx.jobs.borrow_mut().finish(0, false, 2);

        let err = fx.submit().unwrap_err();
        assert!(matches!(
            err,
            SamplerError::Job(JobFailure::Crash {
                checkpoint: 0,
                code: Some(2),
                checkpoint_left: true,
                ..
            })
        ));
        // The crashed job's checkpoint keeps its slot.
        assert_eq!(fx.store.outstanding(), 2);
    }

    #[test]
    fn clean_exit_without_deleting_is_a_crash() {
        let mut fx = Fixture::new(4, 4);
        fx.submit().unwrap();
        fx.jobs.borrow_mut().finish(0, false, 0);
        fx.dispatcher.drain(0);
        let report = fx.dispatcher.into_report();
        assert_eq!(
            report.failures,
            vec![JobFailure::Crash {
                checkpoint: 0,
                pid: 1000,
                code: Some(0),
                checkpoint_left: true,
            }]
        );
        assert_eq!(report.states[&0], CheckpointState::Dispatched);
    }

    #[test]
    fn overdue_job_is_killed() {
        let mut fx = Fixture::with_timeout(4, 4, Some(Duration::ZERO));
        fx.submit().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        fx.dispatcher.drain(0);
        let report = fx.dispatcher.into_report();
        assert!(matches!(
            report.failures.as_slice(),
            [JobFailure::Timeout { checkpoint: 0, .. }]
        ));
    }

    #[test]
    fn unpollable_job_still_times_out() {
        let mut fx = Fixture::with_timeout(4, 4, Some(Duration::ZERO));
        fx.submit().unwrap();
        fx.jobs.borrow_mut().fail_poll = true;
        std::thread::sleep(Duration::from_millis(2));
        fx.dispatcher.drain(0);
        let report = fx.dispatcher.into_report();
        assert!(matches!(
            report.failures.as_slice(),
            [JobFailure::Timeout { checkpoint: 0, pid: 1000, .. }]
        ));
        assert_eq!(report.states[&0], CheckpointState::Dispatched);
    }

    #[test]
    fn zero_allowance_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::open(tmp.path().join("cpt")).unwrap());
        let config = SamplerConfig {
            proc_limit: 2,
            proc_over_allowance: 0,
            ..SamplerConfig::default()
        };
        let template = JobTemplate {
            workload: WorkloadKey::new("mcf", "ref", "0"),
            unit_length: 10,
            warmup_length: 10,
            output_root: tmp.path().join("restore"),
        };
        let err = CheckpointDispatcher::new(config, ManualBackend::default(), store, template)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SamplerError::Config(ConfigError::ZeroProcOverAllowance)
        ));
    }

    #[test]
    fn launch_failure_is_fatal_and_keeps_capacity() {
        let mut fx = Fixture::new(1, 1);
        fx.jobs.borrow_mut().fail_launch = true;

        let err = fx.submit().unwrap_err();
        assert!(matches!(
            err,
            SamplerError::Job(JobFailure::Dispatch { checkpoint: 0, .. })
        ));
        assert_eq!(fx.store.outstanding(), 1);

        // Later checkpoints are neither launched nor retried, and nothing is left to free a slot.
        fx.jobs.borrow_mut().fail_launch = false;
        let err = fx.submit().unwrap_err();
        assert!(matches!(
            err,
            SamplerError::Stalled {
                outstanding: 2,
                waiting: 1
            }
        ));
        fx.dispatcher.drain(0);
        let report = fx.dispatcher.into_report();
        assert!(report.records.is_empty());
        assert_eq!(report.abandoned, vec![0, 1]);
        assert_eq!(report.failures.len(), 1);
    }
}
