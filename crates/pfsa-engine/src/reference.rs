use std::path::Path;

use pfsa_snapshot::{
    read_checkpoint_dir, read_checkpoint_dir_meta, write_checkpoint_dir, CheckpointMeta,
    CheckpointSource, CheckpointTarget, CoreState, SaveOptions, CORE_REGISTER_COUNT,
};
use xxhash_rust::xxh3::xxh3_64;

use crate::{EngineError, ExecMode, RunExit, SimEngine, SimStats};

/// Size of the synthetic program's data memory.
pub const MEMORY_SIZE: usize = 64 * 1024;

/// Instructions in the synthetic code region; the program counter wraps inside it.
const CODE_SPAN: u64 = 4096;

const CACHE_LINES: usize = 256;
const CACHE_LINE_SHIFT: u32 = 6;
const PREDICTOR_ENTRIES: usize = 1024;

const CACHE_HIT_CYCLES: u64 = 1;
const CACHE_MISS_CYCLES: u64 = 20;
const MISPREDICT_CYCLES: u64 = 8;

/// The program the reference engine executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// `<benchmark>-<size>-<input>`.
    pub workload: String,
    pub seed: u64,
    /// Dynamic instruction count at which the program exits.
    pub length: u64,
}

impl Program {
    /// Derives the instruction stream from the binary path, its arguments and the file fed to
    /// its stdin, so the same workload always executes the same instructions.
    pub fn from_binary(
        workload: &str,
        binary: &Path,
        args: &[String],
        stdin: Option<&Path>,
        length: u64,
    ) -> Self {
        let mut key = binary.to_string_lossy().into_owned().into_bytes();
        for arg in args {
            key.push(0);
            key.extend_from_slice(arg.as_bytes());
        }
        if let Some(stdin) = stdin {
            key.push(1);
            key.extend_from_slice(stdin.to_string_lossy().as_bytes());
        }
        Self {
            workload: workload.to_string(),
            seed: xxh3_64(&key),
            length,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Alu { rd: usize, rs: usize },
    Load { rd: usize, rs: usize },
    Store { rd: usize, rs: usize },
    Branch { rs: usize },
}

/// Microarchitectural state; exists only in detailed mode and always starts cold.
struct Microarch {
    cache_tags: Vec<Option<u64>>,
    predictor: Vec<u8>,
}

impl Microarch {
    fn cold() -> Self {
        Self {
            cache_tags: vec![None; CACHE_LINES],
            // Weakly not-taken.
            predictor: vec![1; PREDICTOR_ENTRIES],
        }
    }

    /// Returns whether the access hit.
    fn access(&mut self, addr: u64) -> bool {
        let line = addr >> CACHE_LINE_SHIFT;
        let set = (line as usize) % CACHE_LINES;
        let hit = self.cache_tags[set] == Some(line);
        self.cache_tags[set] = Some(line);
        hit
    }

    /// Returns whether the prediction was correct.
    fn predict(&mut self, pc: u64, taken: bool) -> bool {
        let counter = &mut self.predictor[(pc as usize) % PREDICTOR_ENTRIES];
        let correct = (*counter >= 2) == taken;
        *counter = if taken {
            (*counter + 1).min(3)
        } else {
            counter.saturating_sub(1)
        };
        correct
    }
}

/// Deterministic single-core engine driving a synthetic instruction stream.
///
/// It stands in for a full simulator: architectural state is small but real (restoring a
/// checkpoint and continuing is bit-identical to never having stopped), and detailed mode has
/// enough microarchitectural state for warmup to change the measured statistics.
pub struct ReferenceEngine {
    program: Program,
    mode: ExecMode,
    core: CoreState,
    memory: Vec<u8>,
    committed: u64,
    tick: u64,
    micro: Option<Microarch>,
    stats: SimStats,
    exit_code: Option<i32>,
}

impl ReferenceEngine {
    pub fn boot(program: Program, mode: ExecMode) -> Self {
        let mut core = CoreState::default();
        for (i, reg) in core.regs.iter_mut().enumerate() {
            *reg = mix(program.seed ^ i as u64);
        }
        Self {
            micro: (mode == ExecMode::Detailed).then(Microarch::cold),
            program,
            mode,
            core,
            memory: vec![0u8; MEMORY_SIZE],
            committed: 0,
            tick: 0,
            stats: SimStats::default(),
            exit_code: None,
        }
    }

    /// Restores architectural state from a checkpoint directory written by
    /// [`SimEngine::checkpoint`]. Microarchitectural state starts cold.
    pub fn restore(dir: &Path, mode: ExecMode) -> Result<Self, EngineError> {
        let mut engine = Self::boot(
            Program {
                workload: String::new(),
                seed: 0,
                length: 0,
            },
            mode,
        );
        read_checkpoint_dir(dir, &mut engine)?;
        tracing::debug!(
            dir = %dir.display(),
            workload = %engine.program.workload,
            committed = engine.committed,
            "restored checkpoint"
        );
        Ok(engine)
    }

    /// Like [`ReferenceEngine::restore`], but refuses checkpoints taken from another workload.
    pub fn restore_for(dir: &Path, workload: &str, mode: ExecMode) -> Result<Self, EngineError> {
        let meta = read_checkpoint_dir_meta(dir)?;
        if meta.workload != workload {
            return Err(EngineError::WorkloadMismatch {
                expected: workload.to_string(),
                found: meta.workload,
            });
        }
        Self::restore(dir, mode)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn core_state(&self) -> CoreState {
        self.core
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn decode(&self, pc: u64) -> (Op, u64) {
        let h = mix(self.program.seed ^ pc.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let rd = ((h >> 8) as usize) % CORE_REGISTER_COUNT;
        let rs = ((h >> 12) as usize) % CORE_REGISTER_COUNT;
        let op = match h % 8 {
            0..=3 => Op::Alu { rd, rs },
            4 | 5 => Op::Load { rd, rs },
            6 => Op::Store { rd, rs },
            _ => Op::Branch { rs },
        };
        (op, h)
    }

    fn data_addr(&self, rs: usize, h: u64) -> usize {
        let addr = self.core.regs[rs].wrapping_add((h >> 16) & 0x3ff0);
        (addr as usize % MEMORY_SIZE) & !7
    }

    fn step(&mut self) {
        let pc = self.core.pc;
        let (op, h) = self.decode(pc);
        let mut cycles = 1;
        let mut next_pc = (pc + 1) % CODE_SPAN;

        match op {
            Op::Alu { rd, rs } => {
                self.core.regs[rd] = self.core.regs[rd]
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(self.core.regs[rs] ^ h);
            }
            Op::Load { rd, rs } => {
                let addr = self.data_addr(rs, h);
                let mut word = [0u8; 8];
                word.copy_from_slice(&self.memory[addr..addr + 8]);
                self.core.regs[rd] ^= u64::from_le_bytes(word);
                self.stats.loads += 1;
                cycles += self.memory_access(addr as u64);
            }
            Op::Store { rd, rs } => {
                let addr = self.data_addr(rs, h);
                self.memory[addr..addr + 8].copy_from_slice(&self.core.regs[rd].to_le_bytes());
                self.stats.stores += 1;
                cycles += self.memory_access(addr as u64);
            }
            Op::Branch { rs } => {
                // Mostly static per branch site, occasionally data dependent.
                let biased = (h >> 20) & 3 != 0;
                let taken = biased ^ (self.core.regs[rs] & 0x3f == 0);
                if taken {
                    next_pc = (pc + CODE_SPAN - ((h >> 24) & 0x3f) - 1) % CODE_SPAN;
                }
                self.stats.branches += 1;
                if let Some(micro) = self.micro.as_mut() {
                    if !micro.predict(pc, taken) {
                        self.stats.branch_mispredicts += 1;
                        cycles += MISPREDICT_CYCLES;
                    }
                }
            }
        }

        self.core.pc = next_pc;
        self.committed += 1;
        self.tick += cycles;
        self.stats.instructions += 1;
        self.stats.cycles += cycles;
    }

    fn memory_access(&mut self, addr: u64) -> u64 {
        let Some(micro) = self.micro.as_mut() else {
            return 0;
        };
        if micro.access(addr) {
            self.stats.cache_hits += 1;
            CACHE_HIT_CYCLES
        } else {
            self.stats.cache_misses += 1;
            CACHE_MISS_CYCLES
        }
    }
}

impl SimEngine for ReferenceEngine {
    fn run(&mut self, max_insts: u64) -> Result<RunExit, EngineError> {
        if let Some(code) = self.exit_code {
            return Ok(RunExit::Exited { executed: 0, code });
        }

        let mut executed = 0;
        while executed < max_insts {
            if self.committed >= self.program.length {
                self.exit_code = Some(0);
                return Ok(RunExit::Exited { executed, code: 0 });
            }
            self.step();
            executed += 1;
        }
        Ok(RunExit::Paused { executed })
    }

    fn committed_insts(&self) -> u64 {
        self.committed
    }

    fn cur_tick(&self) -> u64 {
        self.tick
    }

    fn checkpoint(&mut self, dir: &Path) -> Result<(), EngineError> {
        write_checkpoint_dir(dir, self, SaveOptions::default())?;
        tracing::debug!(dir = %dir.display(), committed = self.committed, "wrote checkpoint");
        Ok(())
    }

    fn stats(&self) -> SimStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = SimStats::default();
    }
}

impl CheckpointSource for ReferenceEngine {
    fn checkpoint_meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            workload: self.program.workload.clone(),
            program_seed: self.program.seed,
            program_length: self.program.length,
            committed_insts: self.committed,
            tick: self.tick,
        }
    }

    fn core_state(&self) -> CoreState {
        self.core
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }
}

impl CheckpointTarget for ReferenceEngine {
    fn restore_meta(&mut self, meta: CheckpointMeta) {
        self.program = Program {
            workload: meta.workload,
            seed: meta.program_seed,
            length: meta.program_length,
        };
        self.committed = meta.committed_insts;
        self.tick = meta.tick;
    }

    fn restore_core_state(&mut self, state: CoreState) {
        self.core = state;
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn post_restore(&mut self) -> pfsa_snapshot::Result<()> {
        if self.core.pc >= CODE_SPAN {
            return Err(pfsa_snapshot::SnapshotError::Corrupt("pc outside code region"));
        }
        self.exit_code = None;
        self.stats = SimStats::default();
        Ok(())
    }
}

/// splitmix64 finalizer.
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
