//! Allocation/deallocation engine.
//!
//! [`Heap`] owns the bins, the list of claimed pages and the counters. It is
//! an explicit object rather than process-wide state; the C-ABI crate wraps a
//! single instance for callers that need a global heap.
//!
//! Allocation is a bounded loop: search the bins, grow by one page on a miss,
//! search once more, then give up. Searching starts at the request's own size
//! class and picks the smallest sufficient block of the first bin that has
//! any, without looking at larger classes.

use std::fmt;
use std::ptr::NonNull;

use crate::block::{ALIGNMENT, AllocatedBlock, FreeBlock, align_up};
use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::free_list::{FreeLists, Predecessor};
use crate::lifecycle::{CounterSnapshot, HeapLogLevel, HeapLogRecord, LifecycleLog, LogEvent};
use crate::page::{MmapPages, PAGE_PAYLOAD_CAPACITY, PAGE_SIZE, PageError, PageSource};
use crate::size_class::{BIN_COUNT, bin_of};
use crate::stats::HeapStats;
use crate::verify::BlockInfo;

/// Segregated free-list heap growing one page at a time from `P`.
///
/// Dropping the heap returns every page to `P`; payload pointers must not
/// outlive it.
pub struct Heap<P: PageSource = MmapPages> {
    source: P,
    config: HeapConfig,
    lists: FreeLists,
    /// Every page claimed so far, in mapping order.
    pages: Vec<NonNull<u8>>,
    stats: HeapStats,
    log: LifecycleLog,
}

// SAFETY: the heap exclusively owns every page it maps and every header
// inside them; the only pointers leaving it are payload pointers, whose use is
// governed by `deallocate`'s contract. Moving the whole heap to another thread
// moves that ownership with it.
unsafe impl<P: PageSource + Send> Send for Heap<P> {}

impl Heap<MmapPages> {
    /// Empty heap backed by anonymous kernel mappings.
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        Self::with_source(config, MmapPages::new())
    }
}

impl Default for Heap<MmapPages> {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl<P: PageSource> Heap<P> {
    /// Empty heap drawing pages from `source`. No page is mapped until the
    /// first allocation misses.
    pub fn with_source(config: HeapConfig, source: P) -> Self {
        Self {
            source,
            config,
            lists: FreeLists::new(),
            pages: Vec::new(),
            stats: HeapStats::default(),
            log: LifecycleLog::new(config.log_capacity),
        }
    }

    /// Returns every bin to a known state and clears the request counters.
    ///
    /// Pages already claimed are kept: each is re-carved as one free block
    /// (merged with adjacent pages under [`crate::CoalescePolicy::Immediate`]).
    /// Every pointer handed out before the call is invalidated.
    pub fn initialize(&mut self) {
        self.lists.reset();
        self.stats = HeapStats {
            bytes_mapped: self.stats.bytes_mapped,
            page_growths: self.stats.page_growths,
            ..HeapStats::default()
        };
        for i in 0..self.pages.len() {
            // SAFETY: the page is mapped, owned by this heap, page-aligned and
            // PAGE_SIZE bytes long; no block in it is live after the reset.
            let block = unsafe { FreeBlock::format(self.pages[i], PAGE_PAYLOAD_CAPACITY) };
            self.file_free(block, "initialize");
        }
        self.record(
            LogEvent::new(HeapLogLevel::Info, "initialize", "initialize", "reset")
                .details(format!("pages_retained={}", self.pages.len())),
        );
    }

    /// Allocates at least `size` bytes and returns the payload pointer.
    ///
    /// `size` is rounded up to a multiple of [`ALIGNMENT`]; the payload is
    /// [`ALIGNMENT`]-aligned. Requests of zero bytes or above
    /// [`PAGE_PAYLOAD_CAPACITY`] are rejected.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.stats.requests += 1;
        let rounded = match Self::check_request(size) {
            Ok(rounded) => rounded,
            Err(err) => {
                self.stats.failed_requests += 1;
                self.record(
                    LogEvent::new(HeapLogLevel::Warn, "allocate", "request_rejected", err.label())
                        .size(size)
                        .details(err.to_string()),
                );
                return Err(err);
            }
        };
        self.stats.note_request(rounded);

        let mut grown = false;
        loop {
            if let Some((block, prev, bin)) = self.find_fit(rounded) {
                return Ok(self.take(block, prev, bin, rounded));
            }
            if grown {
                let err = HeapError::GrowthExhausted { requested: size };
                self.stats.failed_requests += 1;
                self.record(
                    LogEvent::new(HeapLogLevel::Error, "allocate", "growth_exhausted", err.label())
                        .size(size)
                        .details(err.to_string()),
                );
                return Err(err);
            }
            if let Err(err) = self.grow() {
                self.stats.failed_requests += 1;
                self.record(
                    LogEvent::new(HeapLogLevel::Error, "allocate", "page_map_failed", "failed")
                        .size(size)
                        .details(err.to_string()),
                );
                return Err(err.into());
            }
            grown = true;
        }
    }

    /// Returns the block behind `ptr` to the free lists.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Heap::allocate`] on this heap, must
    /// not have been passed to `deallocate` since, and the heap must not have
    /// been re-initialized in between. Foreign pointers and double frees are
    /// not detected.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        // SAFETY: the caller guarantees `ptr` is a live payload of this heap.
        let block = unsafe { AllocatedBlock::from_payload(ptr) };
        let size = block.size();
        self.stats.frees += 1;
        let (bin, merges) = self.file_free(block.into_free(), "deallocate");
        self.record(
            LogEvent::new(HeapLogLevel::Trace, "deallocate", "free", "filed")
                .ptr(ptr.as_ptr() as usize)
                .size(size)
                .bin(bin)
                .details(format!("merges={merges}")),
        );
    }

    /// Reporting hook: records a summary and returns the counters. Releases
    /// nothing.
    pub fn finalize(&mut self) -> HeapStats {
        let stats = self.stats();
        self.record(
            LogEvent::new(HeapLogLevel::Info, "finalize", "finalize", "reported").details(
                format!(
                    "bytes_mapped={};page_growths={};requests={};frees={}",
                    stats.bytes_mapped, stats.page_growths, stats.requests, stats.frees
                ),
            ),
        );
        stats
    }

    /// Counter snapshot including the current free-list population.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = self.stats.clone();
        stats.free_blocks = self.lists.len();
        stats.free_bytes = self.lists.iter().map(|(_, block)| block.size()).sum();
        stats
    }

    /// Every listed free block, grouped by ascending bin and in list order
    /// within a bin.
    #[must_use]
    pub fn free_blocks(&self) -> Vec<BlockInfo> {
        self.lists
            .iter()
            .map(|(bin, block)| BlockInfo {
                addr: block.addr(),
                size: block.size(),
                bin,
            })
            .collect()
    }

    #[must_use]
    pub fn pages_mapped(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn bytes_mapped(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn source(&self) -> &P {
        &self.source
    }

    /// Lifecycle records currently held, oldest first.
    #[must_use]
    pub fn lifecycle_logs(&self) -> &LifecycleLog {
        &self.log
    }

    /// Drains lifecycle records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<HeapLogRecord> {
        self.log.drain()
    }

    pub(crate) fn page_bases(&self) -> &[NonNull<u8>] {
        &self.pages
    }

    pub(crate) fn free_lists(&self) -> &FreeLists {
        &self.lists
    }

    #[cfg(test)]
    pub(crate) fn config_mut(&mut self) -> &mut HeapConfig {
        &mut self.config
    }

    fn check_request(size: usize) -> Result<usize, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        match align_up(size) {
            Some(rounded) if rounded <= PAGE_PAYLOAD_CAPACITY => Ok(rounded),
            _ => Err(HeapError::TooLarge {
                requested: size,
                capacity: PAGE_PAYLOAD_CAPACITY,
            }),
        }
    }

    /// Smallest block of at least `size` bytes in the first bin, from
    /// `bin_of(size)` upward, that has any.
    fn find_fit(&self, size: usize) -> Option<(FreeBlock, Predecessor, usize)> {
        (bin_of(size)..BIN_COUNT).find_map(|bin| {
            self.lists
                .iter_bin(bin)
                .filter(|(_, block)| block.size() >= size)
                .min_by_key(|(_, block)| block.size())
                .map(|(prev, block)| (block, prev, bin))
        })
    }

    fn take(&mut self, block: FreeBlock, prev: Predecessor, bin: usize, size: usize) -> NonNull<u8> {
        self.lists.remove_free(block, prev, bin);
        let mut allocated = block.into_allocated();
        if let Some(tail) = allocated.split(size) {
            self.stats.splits += 1;
            let tail_bin = self.lists.add_free(tail);
            self.record(
                LogEvent::new(HeapLogLevel::Trace, "allocate", "split", "remainder_filed")
                    .ptr(tail.addr())
                    .size(tail.size())
                    .bin(tail_bin),
            );
        }
        let payload = allocated.payload();
        self.record(
            LogEvent::new(HeapLogLevel::Trace, "allocate", "alloc", "served")
                .ptr(payload.as_ptr() as usize)
                .size(allocated.size())
                .bin(bin),
        );
        payload
    }

    /// Claims one page and files it as a single free block.
    fn grow(&mut self) -> Result<(), PageError> {
        if self
            .config
            .max_pages
            .is_some_and(|max| self.pages.len() >= max)
        {
            return Err(PageError::Exhausted {
                pages: self.pages.len(),
            });
        }
        let base = self.source.map_pages(PAGE_SIZE)?;
        debug_assert_eq!(base.as_ptr() as usize % ALIGNMENT, 0);
        // SAFETY: `base` is a fresh, writable, page-aligned mapping of
        // PAGE_SIZE bytes that nothing else references.
        let block = unsafe { FreeBlock::format(base, PAGE_PAYLOAD_CAPACITY) };
        self.pages.push(base);
        self.stats.bytes_mapped += PAGE_SIZE;
        self.stats.page_growths += 1;
        let (bin, merges) = self.file_free(block, "allocate");
        self.record(
            LogEvent::new(HeapLogLevel::Info, "allocate", "page_growth", "mapped")
                .ptr(base.as_ptr() as usize)
                .size(PAGE_SIZE)
                .bin(bin)
                .details(format!("pages={};merges={merges}", self.pages.len())),
        );
        Ok(())
    }

    /// Files a free block according to the coalescing policy, returning its
    /// final bin and the number of neighbours absorbed.
    fn file_free(&mut self, block: FreeBlock, symbol: &'static str) -> (usize, usize) {
        if !self.config.coalesce.merges() {
            return (self.lists.add_free(block), 0);
        }
        // Pages are page-aligned, so a seam on a page multiple is a page boundary.
        let contiguous = self.source.contiguous();
        let merged = self
            .lists
            .coalesce_on_free(block, |seam| contiguous || seam % PAGE_SIZE != 0);
        if merged.merges > 0 {
            self.stats.merges += merged.merges as u64;
            self.record(
                LogEvent::new(HeapLogLevel::Debug, symbol, "coalesce", "merged")
                    .ptr(merged.block.addr())
                    .size(merged.block.size())
                    .bin(merged.bin)
                    .details(format!("neighbours={}", merged.merges)),
            );
        }
        (merged.bin, merged.merges)
    }

    fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.stats.requests,
            frees: self.stats.frees,
            pages_mapped: self.pages.len(),
            free_blocks: self.lists.len(),
        }
    }

    fn record(&mut self, event: LogEvent) {
        if self.log.enabled() {
            let counters = self.counters();
            self.log.record(event, counters);
        }
    }
}

impl<P: PageSource> Drop for Heap<P> {
    fn drop(&mut self) {
        self.lists.reset();
        for page in std::mem::take(&mut self.pages) {
            // SAFETY: every base in `pages` came from `map_pages` on this source
            // with length PAGE_SIZE, and the heap is going away with all its
            // blocks.
            let _ = unsafe { self.source.unmap_pages(page, PAGE_SIZE) };
        }
    }
}

impl<P: PageSource> fmt::Debug for Heap<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("pages", &self.pages.len())
            .field("free_blocks", &self.lists.len())
            .field("requests", &self.stats.requests)
            .finish()
    }
}
