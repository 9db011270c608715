//! Fast-forward control as an explicit state machine.
//!
//! The engine runs in functional mode and hands control back at instruction boundaries the
//! controller scheduled. Each stride period is covered by two advances: `U + W` instructions
//! through the window a detailed job will re-simulate, then `warmup_start` instructions to the next
//! checkpoint location.

use pfsa_plan::SamplingPlan;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    AwaitingFirstWarmupStart,
    TakeCheckpointAndAdvanceThroughWindow,
    AdvanceToNextWarmupStart,
    Draining,
}

/// What the engine should do before handing control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Checkpoint the current state as checkpoint `index`, submit it, then run `advance`
    /// instructions.
    Checkpoint { index: u64, advance: u64 },
    /// Run `advance` instructions.
    Advance(u64),
}

impl Request {
    pub fn advance(&self) -> u64 {
        match *self {
            Request::Checkpoint { advance, .. } | Request::Advance(advance) => advance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("controller resumed at {actual} committed instructions, expected {expected}")]
    UnexpectedResume { expected: u64, actual: u64 },

    #[error("controller resumed before start()")]
    NotStarted,

    #[error("controller already started")]
    AlreadyStarted,

    #[error("controller resumed after the program exited")]
    Drained,
}

#[derive(Debug, Clone)]
pub struct FastForwardController {
    plan: SamplingPlan,
    phase: Phase,
    next_index: u64,
    expected_pause: u64,
}

impl FastForwardController {
    pub fn new(plan: SamplingPlan) -> Self {
        Self {
            plan,
            phase: Phase::Initializing,
            next_index: 0,
            expected_pause: 0,
        }
    }

    pub fn plan(&self) -> &SamplingPlan {
        &self.plan
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Checkpoints requested so far.
    pub fn checkpoints_requested(&self) -> u64 {
        self.next_index
    }

    /// Committed-instruction count at which the engine must next hand back control.
    pub fn expected_pause(&self) -> Option<u64> {
        match self.phase {
            Phase::Initializing | Phase::Draining => None,
            _ => Some(self.expected_pause),
        }
    }

    /// First request of the run, issued with the engine at instruction 0.
    pub fn start(&mut self) -> Result<Request, ControllerError> {
        if self.phase != Phase::Initializing {
            return Err(ControllerError::AlreadyStarted);
        }
        if self.plan.warmup_start == 0 {
            return Ok(self.begin_window(0));
        }
        self.phase = Phase::AwaitingFirstWarmupStart;
        self.expected_pause = self.plan.warmup_start;
        Ok(Request::Advance(self.plan.warmup_start))
    }

    /// Called whenever the engine pauses; `current` is its committed-instruction count.
    pub fn resume(&mut self, current: u64) -> Result<Request, ControllerError> {
        match self.phase {
            Phase::Initializing => return Err(ControllerError::NotStarted),
            Phase::Draining => return Err(ControllerError::Drained),
            _ => {}
        }
        if current != self.expected_pause {
            return Err(ControllerError::UnexpectedResume {
                expected: self.expected_pause,
                actual: current,
            });
        }
        match self.phase {
            Phase::TakeCheckpointAndAdvanceThroughWindow if self.plan.warmup_start != 0 => {
                self.phase = Phase::AdvanceToNextWarmupStart;
                self.expected_pause = current + self.plan.warmup_start;
                Ok(Request::Advance(self.plan.warmup_start))
            }
            _ => Ok(self.begin_window(current)),
        }
    }

    /// The program exited; no further checkpoints are requested.
    pub fn program_exited(&mut self) {
        self.phase = Phase::Draining;
    }

    fn begin_window(&mut self, current: u64) -> Request {
        let index = self.next_index;
        self.next_index += 1;
        self.phase = Phase::TakeCheckpointAndAdvanceThroughWindow;
        self.expected_pause = current + self.plan.window_length();
        Request::Checkpoint {
            index,
            advance: self.plan.window_length(),
        }
    }
}
