//! Heap configuration.
//!
//! Defaults can be overridden from the environment:
//! - `SEGHEAP_COALESCE`: `immediate` (default) merges a freed block with its
//!   free physical neighbours before filing it; `never` files it as-is.
//! - `SEGHEAP_MAX_PAGES`: upper bound on pages the heap may claim.
//! - `SEGHEAP_LOG_CAPACITY`: lifecycle records kept in memory (0 disables).

use serde::{Deserialize, Serialize};

/// Environment variable selecting the coalescing policy.
pub const ENV_COALESCE: &str = "SEGHEAP_COALESCE";
/// Environment variable bounding page growth.
pub const ENV_MAX_PAGES: &str = "SEGHEAP_MAX_PAGES";
/// Environment variable sizing the lifecycle log ring.
pub const ENV_LOG_CAPACITY: &str = "SEGHEAP_LOG_CAPACITY";

/// Default number of lifecycle records retained.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// What happens to physical neighbours when a block is freed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoalescePolicy {
    /// Merge with every adjacent free block, transitively, before filing.
    /// Costs a scan over all free blocks per free.
    #[default]
    Immediate,
    /// File the block unchanged; O(1) free, more fragmentation.
    Never,
}

impl CoalescePolicy {
    /// Parse from string (case-insensitive). Unknown values select the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" | "on" | "merge" | "coalesce" | "true" | "1" => Self::Immediate,
            "never" | "off" | "none" | "false" | "0" => Self::Never,
            _ => Self::default(),
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Never => "never",
        }
    }

    #[must_use]
    pub const fn merges(self) -> bool {
        matches!(self, Self::Immediate)
    }
}

/// Tunables for one [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapConfig {
    pub coalesce: CoalescePolicy,
    /// Pages the heap may claim before growth fails; `None` is unbounded.
    pub max_pages: Option<usize>,
    /// Lifecycle records kept in the ring; 0 turns recording off.
    pub log_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            coalesce: CoalescePolicy::default(),
            max_pages: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl HeapConfig {
    #[must_use]
    pub fn with_coalesce(mut self, coalesce: CoalescePolicy) -> Self {
        self.coalesce = coalesce;
        self
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, log_capacity: usize) -> Self {
        self.log_capacity = log_capacity;
        self
    }

    /// Reads overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unparsable values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_COALESCE) {
            config.coalesce = CoalescePolicy::from_str_loose(&raw);
        }
        if let Some(pages) = lookup(ENV_MAX_PAGES).and_then(|raw| raw.trim().parse().ok()) {
            config.max_pages = Some(pages);
        }
        if let Some(cap) = lookup(ENV_LOG_CAPACITY).and_then(|raw| raw.trim().parse().ok()) {
            config.log_capacity = cap;
        }
        config
    }
}
