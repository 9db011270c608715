//! Couples the controller, the engine and the dispatcher for one fast-forward pass.

use std::sync::Arc;

use pfsa_engine::{RunExit, SimEngine};
use tracing::{debug, info};

use crate::backend::JobBackend;
use crate::controller::{FastForwardController, Request};
use crate::dispatcher::CheckpointDispatcher;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastForwardOutcome {
    pub checkpoints: u64,
    pub committed_insts: u64,
    pub exit_code: i32,
}

/// Fast-forwards `engine` to program exit, checkpointing and submitting at every scheduled point.
///
/// Stops at the first error; the caller still owns the dispatcher and is expected to drain it.
pub fn run<E, B>(
    engine: &mut E,
    controller: &mut FastForwardController,
    dispatcher: &mut CheckpointDispatcher<B>,
) -> Result<FastForwardOutcome>
where
    E: SimEngine + ?Sized,
    B: JobBackend,
{
    let store = Arc::clone(dispatcher.store());
    let mut request = controller.start()?;
    loop {
        if let Request::Checkpoint { index, .. } = request {
            let tick = engine.cur_tick();
            let committed = engine.committed_insts();
            let checkpoint = store.create(index, tick, committed, |dir| engine.checkpoint(dir))?;
            info!(id = index, tick, committed, "checkpoint taken");
            dispatcher.submit(checkpoint, tick)?;
        }

        match engine.run(request.advance())? {
            RunExit::Paused { .. } => {
                debug!(committed = engine.committed_insts(), "engine paused");
                request = controller.resume(engine.committed_insts())?;
            }
            RunExit::Exited { code, .. } => {
                controller.program_exited();
                let outcome = FastForwardOutcome {
                    checkpoints: controller.checkpoints_requested(),
                    committed_insts: engine.committed_insts(),
                    exit_code: code,
                };
                info!(
                    checkpoints = outcome.checkpoints,
                    committed = outcome.committed_insts,
                    code,
                    "program exited"
                );
                return Ok(outcome);
            }
        }
    }
}
