//! Deterministic synthetic workloads.
//!
//! Each [`Challenge`] draws request sizes from a fixed range and runs in
//! epochs: an epoch allocates a batch of objects, then frees every live
//! object with probability one half. Survivors carry over, so the live set
//! churns while slowly growing. The same seed always yields the same
//! operation list.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Small deterministic PRNG (xorshift64*).
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// A zero seed is remapped; xorshift would stay at zero forever.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }

    pub fn coin(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }
}

/// One heap operation. Ids name objects within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Op {
    Alloc { id: u64, size: usize },
    Free { id: u64 },
}

/// Built-in workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Challenge {
    /// Every request is 128 bytes.
    FixedSmall,
    /// Every request is 16 bytes.
    FixedTiny,
    /// 16 to 128 bytes.
    RandomSmall,
    /// 256 to 4000 bytes.
    RandomLarge,
    /// 8 to 4000 bytes.
    RandomMixed,
}

impl Challenge {
    pub const ALL: [Challenge; 5] = [
        Challenge::FixedSmall,
        Challenge::FixedTiny,
        Challenge::RandomSmall,
        Challenge::RandomLarge,
        Challenge::RandomMixed,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Challenge::FixedSmall => "fixed-small",
            Challenge::FixedTiny => "fixed-tiny",
            Challenge::RandomSmall => "random-small",
            Challenge::RandomLarge => "random-large",
            Challenge::RandomMixed => "random-mixed",
        }
    }

    /// Inclusive request size range.
    #[must_use]
    pub const fn size_range(self) -> (usize, usize) {
        match self {
            Challenge::FixedSmall => (128, 128),
            Challenge::FixedTiny => (16, 16),
            Challenge::RandomSmall => (16, 128),
            Challenge::RandomLarge => (256, 4000),
            Challenge::RandomMixed => (8, 4000),
        }
    }

    /// Expands the challenge into its operation list.
    #[must_use]
    pub fn ops(self, spec: &WorkloadSpec) -> Vec<Op> {
        let (low, high) = self.size_range();
        let mut rng = XorShift64::new(spec.seed);
        let mut ops = Vec::with_capacity(spec.epochs * spec.allocs_per_epoch * 2);
        let mut live: Vec<u64> = Vec::new();
        let mut next_id = 0u64;

        for _ in 0..spec.epochs {
            for _ in 0..spec.allocs_per_epoch {
                let size = rng.gen_range(low, high);
                ops.push(Op::Alloc { id: next_id, size });
                live.push(next_id);
                next_id += 1;
            }
            live.retain(|&id| {
                if rng.coin() {
                    ops.push(Op::Free { id });
                    false
                } else {
                    true
                }
            });
        }
        ops
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Challenge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Challenge::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| format!("unknown challenge '{s}'"))
    }
}

/// Shape of a generated workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub epochs: usize,
    pub allocs_per_epoch: usize,
    pub seed: u64,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            epochs: 10,
            allocs_per_epoch: 1000,
            seed: 0x5E6_4EA9,
        }
    }
}
