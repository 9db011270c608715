//! Sampling-plan computation for periodic (SMARTS-style) sampled simulation.
//!
//! A program of `total` dynamic instructions is cut into `N` measurement units of `U`
//! instructions. Every `k`-th unit is measured in detail, preceded by `W` instructions of warmup.
//! All arithmetic is exact integer ceiling division; nothing is rounded towards zero.

#![forbid(unsafe_code)]

use serde::Serialize;
use thiserror::Error;

/// Upper bound on the warmup window, in measurement units.
pub const MAX_WARMUP_UNITS: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("unit length must be non-zero")]
    ZeroUnitLength,

    #[error("target sample count must be non-zero")]
    ZeroSampleCount,

    #[error("program has no dynamic instructions")]
    EmptyProgram,

    #[error(
        "stride of {stride} units leaves no room for a {warmup}-instruction warmup \
         (warmup start would be {stride_span_minus_unit} - {warmup} < 0)"
    )]
    NegativeWarmupStart {
        stride: u64,
        warmup: u64,
        stride_span_minus_unit: u64,
    },

    #[error("sampling parameters overflow u64")]
    Overflow,
}

/// Immutable per-workload sampling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplingPlan {
    /// `U`: instructions per measurement unit.
    pub unit_length: u64,
    pub total_dynamic_instructions: u64,
    /// `n`: requested number of samples.
    pub target_sample_count: u64,
    /// `N = ceil(total / U)`.
    pub unit_count: u64,
    /// `k = ceil(N / n)`.
    pub stride: u64,
    /// `W = min(ceil(k/2) * U, MAX_WARMUP_UNITS * U)`.
    pub warmup_length: u64,
    /// `(k-1)*U - W`, relative to the start of a stride period.
    pub warmup_start: u64,
    /// `k*U`, relative to the start of a stride period.
    pub detailed_end: u64,
}

fn div_ceil(a: u64, b: u64) -> u64 {
    a / b + u64::from(a % b != 0)
}

/// Computes the schedule for a program of `total` instructions.
pub fn compute_plan(
    total: u64,
    unit_length: u64,
    target_samples: u64,
) -> Result<SamplingPlan, PlanError> {
    if unit_length == 0 {
        return Err(PlanError::ZeroUnitLength);
    }
    if target_samples == 0 {
        return Err(PlanError::ZeroSampleCount);
    }
    if total == 0 {
        return Err(PlanError::EmptyProgram);
    }

    let unit_count = div_ceil(total, unit_length);
    let stride = div_ceil(unit_count, target_samples);

    let half_stride = div_ceil(stride, 2);
    let warmup_length = half_stride
        .min(MAX_WARMUP_UNITS)
        .checked_mul(unit_length)
        .ok_or(PlanError::Overflow)?;

    let detailed_end = stride.checked_mul(unit_length).ok_or(PlanError::Overflow)?;
    // stride >= 1 because total >= 1, so this cannot underflow.
    let stride_span_minus_unit = detailed_end - unit_length;
    let warmup_start = stride_span_minus_unit.checked_sub(warmup_length).ok_or(
        PlanError::NegativeWarmupStart {
            stride,
            warmup: warmup_length,
            stride_span_minus_unit,
        },
    )?;

    // The window plus the remainder of the period must fit in u64 for the controller.
    unit_length
        .checked_add(warmup_length)
        .ok_or(PlanError::Overflow)?;

    Ok(SamplingPlan {
        unit_length,
        total_dynamic_instructions: total,
        target_sample_count: target_samples,
        unit_count,
        stride,
        warmup_length,
        warmup_start,
        detailed_end,
    })
}

impl SamplingPlan {
    /// Instructions the fast-forward controller skips after each checkpoint: the span the
    /// detailed job re-simulates itself.
    pub fn window_length(&self) -> u64 {
        self.unit_length + self.warmup_length
    }

    /// Instructions in one full stride period (`k*U`).
    pub fn period_length(&self) -> u64 {
        self.detailed_end
    }

    /// Number of checkpoints a run of `total_dynamic_instructions` will produce.
    ///
    /// A checkpoint is taken at `warmup_start + i * k*U` for every `i` where that point is
    /// reached, including a point that coincides with the program's last instruction.
    pub fn expected_checkpoints(&self) -> u64 {
        if self.warmup_start > self.total_dynamic_instructions {
            return 0;
        }
        (self.total_dynamic_instructions - self.warmup_start) / self.detailed_end + 1
    }
}
