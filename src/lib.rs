//! Parallel fast-forward sampled simulation.
//!
//! Re-exports the workspace crates under one roof:
//!
//! - [`plan`]: sampling-plan arithmetic.
//! - [`snapshot`]: the on-disk checkpoint format.
//! - [`engine`]: the simulation-engine boundary and the reference engine.
//! - [`sampler`]: fast-forward control, checkpoint dispatch, detailed jobs and the batch driver.
//!
//! The `pfsa` binary lives in `crates/pfsa-cli`.

#![forbid(unsafe_code)]

pub use pfsa_engine as engine;
pub use pfsa_plan as plan;
pub use pfsa_sampler as sampler;
pub use pfsa_snapshot as snapshot;
