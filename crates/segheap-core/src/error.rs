//! Allocation errors.

use thiserror::Error;

use crate::page::PageError;

/// Why an allocation request could not be served.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("zero-size allocation request")]
    ZeroSize,

    #[error("request of {requested} bytes exceeds page payload capacity of {capacity} bytes")]
    TooLarge { requested: usize, capacity: usize },

    #[error("page growth failed: {0}")]
    PageMap(#[from] PageError),

    /// The request still did not fit after one fresh page; growth is not
    /// attempted twice for the same request.
    ///
    /// A fresh page always holds any accepted size, so this only bounds the
    /// allocation loop and is not expected in practice.
    #[error("no block fits {requested} bytes after page growth")]
    GrowthExhausted { requested: usize },
}

impl HeapError {
    /// Machine-readable label used in lifecycle records.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ZeroSize => "zero_size",
            Self::TooLarge { .. } => "too_large",
            Self::PageMap(_) => "page_map_failed",
            Self::GrowthExhausted { .. } => "growth_exhausted",
        }
    }
}
