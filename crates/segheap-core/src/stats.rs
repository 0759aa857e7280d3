//! Aggregate heap statistics and the finalize report.

use std::fmt;

use serde::Serialize;

use crate::size_class::{BIN_COUNT, bin_label, bin_of};

/// Counters accumulated over the lifetime of a heap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Allocation requests received, including rejected ones.
    pub requests: u64,
    /// Requests rejected or failed.
    pub failed_requests: u64,
    pub frees: u64,
    /// Accepted requests per size class of the rounded request size.
    pub class_requests: [u64; BIN_COUNT],
    /// Bytes obtained from the page source.
    pub bytes_mapped: usize,
    /// Page-growth events (system requests).
    pub page_growths: u64,
    pub splits: u64,
    pub merges: u64,
    /// Free blocks listed at the time of the snapshot.
    pub free_blocks: usize,
    /// Payload bytes held by those free blocks.
    pub free_bytes: usize,
}

impl HeapStats {
    pub(crate) fn note_request(&mut self, rounded: usize) {
        self.class_requests[bin_of(rounded)] += 1;
    }

    /// Accepted requests, i.e. the sum of the class histogram.
    #[must_use]
    pub fn classified_requests(&self) -> u64 {
        self.class_requests.iter().sum()
    }

    /// Non-empty classes as `(label, count)`, smallest class first.
    #[must_use]
    pub fn histogram(&self) -> Vec<(&'static str, u64)> {
        self.class_requests
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(bin, count)| (bin_label(bin), *count))
            .collect()
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "heap statistics")?;
        writeln!(f, "  bytes mapped:     {}", self.bytes_mapped)?;
        writeln!(f, "  page growths:     {}", self.page_growths)?;
        writeln!(f, "  requests:         {}", self.requests)?;
        writeln!(f, "  failed requests:  {}", self.failed_requests)?;
        writeln!(f, "  frees:            {}", self.frees)?;
        writeln!(f, "  splits:           {}", self.splits)?;
        writeln!(f, "  merges:           {}", self.merges)?;
        writeln!(
            f,
            "  free blocks:      {} ({} bytes)",
            self.free_blocks, self.free_bytes
        )?;

        let total = self.classified_requests();
        if total == 0 {
            return Ok(());
        }
        writeln!(f, "request sizes")?;
        for (label, count) in self.histogram() {
            let pct = count as f64 * 100.0 / total as f64;
            writeln!(f, "  {label:>4} bytes: {count:>7} ({pct:5.1}%)")?;
        }
        Ok(())
    }
}
