//! Whole-pipeline checks across randomly drawn sampling plans.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use pfsa::engine::{EngineError, ExecMode, ReferenceEngine};
use pfsa::plan::PlanError;
use pfsa::sampler::job::SAMPLE_FILE_NAME;
use pfsa::sampler::{
    run_workload, DetailedJob, DriverConfig, JobBackend, JobExit, JobHandle, JobInvocation,
    Launched, RunLayout, RunStatus, SamplerConfig, StatsSample, Truncation, WorkloadKey,
    WorkloadRun, WorkloadSpec,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Runs each detailed job to completion inside `launch`.
#[derive(Default)]
struct InlineBackend {
    launched: u32,
}

struct Finished(JobExit);

impl JobHandle for Finished {
    fn try_wait(&mut self) -> io::Result<Option<JobExit>> {
        Ok(Some(self.0))
    }

    fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl JobBackend for InlineBackend {
    type Handle = Finished;

    fn launch(&mut self, inv: &JobInvocation) -> io::Result<Launched<Finished>> {
        self.launched += 1;
        let job = DetailedJob {
            checkpoint: inv.checkpoint_path.clone(),
            warmup_length: inv.warmup_length,
            unit_length: inv.unit_length,
            outdir: inv.outdir.clone(),
        };
        let workload = inv.workload.to_string();
        let ok = job
            .run(|dir| ReferenceEngine::restore_for(dir, &workload, ExecMode::Detailed))
            .is_ok();
        Ok(Launched {
            handle: Finished(JobExit {
                success: ok,
                code: Some(i32::from(!ok)),
            }),
            pid: self.launched,
            command: Vec::new(),
        })
    }

    fn idle(&mut self, _interval: Duration) {}
}

fn boot(run: &WorkloadRun) -> Result<ReferenceEngine, EngineError> {
    Ok(ReferenceEngine::boot(run.program(), ExecMode::Functional))
}

#[test]
fn samples_match_plan_across_random_programs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut rng = StdRng::seed_from_u64(0x9f5a);
    let tmp = tempfile::tempdir().unwrap();
    let mut completed = 0;

    for case in 0..12 {
        let total = rng.gen_range(20_000..150_000u64);
        let unit_length = [100u64, 250, 1000][rng.gen_range(0..3)];
        let target_samples = rng.gen_range(3..25u64);
        let run = WorkloadRun {
            key: WorkloadKey::new(format!("prog{case}"), "rand", "0"),
            spec: WorkloadSpec {
                binary: PathBuf::from(format!("prog{case}")),
                arguments: Vec::new(),
                stdin: None,
                stdout: None,
                stderr: None,
            },
            total_insts: total,
        };
        let config = DriverConfig {
            output_root: tmp.path().to_path_buf(),
            unit_length,
            target_samples,
            sampler: SamplerConfig {
                proc_limit: rng.gen_range(1..4),
                proc_over_allowance: rng.gen_range(1..3),
                poll_interval: Duration::from_millis(1),
                job_timeout: None,
            },
        };

        let summary = run_workload(&run, &config, boot, InlineBackend::default());
        let plan = match run.plan(unit_length, target_samples) {
            Ok(plan) => plan,
            Err(err) => {
                assert!(matches!(err, PlanError::NegativeWarmupStart { stride: 1, .. }));
                assert_eq!(summary.status, RunStatus::Failed);
                continue;
            }
        };
        completed += 1;

        assert!(summary.is_success(), "case {case}: {:?}", summary.error);
        assert_eq!(summary.checkpoints_taken, plan.expected_checkpoints());
        assert_eq!(summary.leftover_checkpoints, Some(0));

        let layout = RunLayout::new(tmp.path(), &run.key);
        for id in 0..plan.expected_checkpoints() {
            let path = layout.restore.join(id.to_string()).join(SAMPLE_FILE_NAME);
            let sample = StatsSample::load(&path).unwrap();
            let start = plan.warmup_start + id * plan.detailed_end;
            assert_eq!(sample.start_insts, start);

            let warm_end = start + plan.warmup_length;
            let expected = if warm_end > total {
                Some(Truncation::Warmup)
            } else if warm_end + plan.unit_length > total {
                Some(Truncation::Measurement)
            } else {
                None
            };
            assert_eq!(sample.truncated, expected, "case {case} checkpoint {id}");
            if expected.is_none() {
                assert_eq!(sample.stats.instructions, plan.unit_length);
            }
        }
    }
    assert!(completed > 0);
}
