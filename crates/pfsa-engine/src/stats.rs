use serde::{Deserialize, Serialize};

/// Counters accumulated by an engine since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStats {
    pub instructions: u64,
    pub cycles: u64,
    pub loads: u64,
    pub stores: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub branches: u64,
    pub branch_mispredicts: u64,
}

impl SimStats {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn ipc(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        self.instructions as f64 / self.cycles as f64
    }

    /// Cache misses per thousand instructions.
    pub fn cache_mpki(&self) -> f64 {
        per_kilo(self.cache_misses, self.instructions)
    }

    /// Branch mispredictions per thousand instructions.
    pub fn branch_mpki(&self) -> f64 {
        per_kilo(self.branch_mispredicts, self.instructions)
    }
}

fn per_kilo(events: u64, instructions: u64) -> f64 {
    if instructions == 0 {
        return 0.0;
    }
    events as f64 * 1000.0 / instructions as f64
}
