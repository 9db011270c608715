use std::io::{Read, Write};

use crate::error::Result;
use crate::io::{WireRead, WireWrite};

pub const CORE_REGISTER_COUNT: usize = 16;

/// Identity and progress of the program captured by a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckpointMeta {
    /// `<benchmark>-<size>-<input>` of the workload that produced the checkpoint.
    pub workload: String,
    pub program_seed: u64,
    /// Dynamic instruction count at which the program exits.
    pub program_length: u64,
    pub committed_insts: u64,
    pub tick: u64,
}

impl CheckpointMeta {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.put_str(&self.workload)?;
        w.put_u64(self.program_seed)?;
        w.put_u64(self.program_length)?;
        w.put_u64(self.committed_insts)?;
        w.put_u64(self.tick)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            workload: r.get_str()?,
            program_seed: r.get_u64()?,
            program_length: r.get_u64()?,
            committed_insts: r.get_u64()?,
            tick: r.get_u64()?,
        })
    }
}

/// Architectural core state: everything a restored core needs to continue bit-identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreState {
    pub pc: u64,
    pub regs: [u64; CORE_REGISTER_COUNT],
}

impl CoreState {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.put_u64(self.pc)?;
        for reg in self.regs {
            w.put_u64(reg)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let pc = r.get_u64()?;
        let mut regs = [0u64; CORE_REGISTER_COUNT];
        for reg in regs.iter_mut() {
            *reg = r.get_u64()?;
        }
        Ok(Self { pc, regs })
    }
}
