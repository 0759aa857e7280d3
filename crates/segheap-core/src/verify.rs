//! Integrity walker.
//!
//! [`Heap::verify`] walks every claimed page header by header and
//! cross-checks the result against the free lists. It is meant for tests,
//! fuzzing and the harness; nothing on the allocate/free path calls it.

use std::collections::{BTreeMap, HashSet};
use std::ptr::NonNull;

use serde::Serialize;
use thiserror::Error;

use crate::block::{ALIGNMENT, HEADER_SIZE, peek_size};
use crate::heap::Heap;
use crate::page::{PAGE_SIZE, PageSource};
use crate::size_class::{BIN_COUNT, bin_of};

/// One free block as reported by [`Heap::free_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Header address.
    pub addr: usize,
    /// Payload size.
    pub size: usize,
    pub bin: usize,
}

/// Summary of a successful walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapWalk {
    /// Runs walked: maximal stretches of touching pages from one allocation,
    /// otherwise one per page.
    pub regions: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub header_bytes: usize,
    pub bytes_mapped: usize,
}

impl HeapWalk {
    /// Total blocks walked.
    #[must_use]
    pub fn blocks(&self) -> usize {
        self.allocated_blocks + self.free_blocks
    }
}

/// First inconsistency found by [`Heap::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("block at {addr:#x} (size {size}) does not tile region ending at {region_end:#x}")]
    BadTiling {
        addr: usize,
        size: usize,
        region_end: usize,
    },

    #[error("free list {bin} references {addr:#x}, which is not a block header")]
    UnknownFreeBlock { bin: usize, addr: usize },

    #[error("free block at {addr:#x} listed more than once")]
    DuplicateFree { addr: usize },

    #[error("free block at {addr:#x} of size {size} sits in bin {bin}, expected {expected}")]
    WrongBin {
        addr: usize,
        size: usize,
        bin: usize,
        expected: usize,
    },

    #[error("free blocks at {left:#x} and {right:#x} are adjacent but not merged")]
    AdjacentFree { left: usize, right: usize },

    #[error("free lists hold {walked} blocks but record {recorded}")]
    CountMismatch { walked: usize, recorded: usize },

    #[error("accounted {accounted} bytes but {mapped} are mapped")]
    Conservation { accounted: usize, mapped: usize },
}

/// Sorts page bases into `(start, end)` runs.
///
/// Touching pages join one run only when `joined` is set, i.e. when they share
/// one allocation; a run is walked from its first page's pointer.
fn regions(pages: &[NonNull<u8>], joined: bool) -> Vec<(NonNull<u8>, usize)> {
    let mut sorted: Vec<NonNull<u8>> = pages.to_vec();
    sorted.sort_by_key(|page| page.as_ptr() as usize);
    let mut runs: Vec<(NonNull<u8>, usize)> = Vec::new();
    for page in sorted {
        let start = page.as_ptr() as usize;
        match runs.last_mut() {
            Some((_, end)) if joined && *end == start => *end += PAGE_SIZE,
            _ => runs.push((page, start + PAGE_SIZE)),
        }
    }
    runs
}

impl<P: PageSource> Heap<P> {
    /// Walks all claimed memory and checks the layout invariants:
    ///
    /// - headers tile every contiguous region exactly, with aligned sizes;
    /// - every free-list entry is a walked header, filed under `bin_of(size)`,
    ///   and listed once;
    /// - with merging enabled, no two physically adjacent blocks are both free;
    /// - payload plus header bytes add up to the bytes mapped.
    pub fn verify(&self) -> Result<HeapWalk, IntegrityError> {
        let runs = regions(self.page_bases(), self.source().contiguous());
        // Header address -> payload size, in address order.
        let mut walked: BTreeMap<usize, usize> = BTreeMap::new();
        // End address of every run; a block ending there has no physical successor.
        let mut run_ends: HashSet<usize> = HashSet::new();

        for &(base, end) in &runs {
            let start = base.as_ptr() as usize;
            let mut offset = 0;
            while start + offset < end {
                let addr = start + offset;
                if end - addr < HEADER_SIZE {
                    return Err(IntegrityError::BadTiling {
                        addr,
                        size: 0,
                        region_end: end,
                    });
                }
                // SAFETY: `addr` is ALIGNMENT-aligned (all sizes checked so far
                // are) and `[addr, addr + HEADER_SIZE)` lies inside a mapped run.
                let size = unsafe { peek_size(NonNull::new_unchecked(base.as_ptr().add(offset))) };
                let fits = addr
                    .checked_add(HEADER_SIZE)
                    .and_then(|payload| payload.checked_add(size))
                    .is_some_and(|block_end| block_end <= end);
                if size == 0 || size % ALIGNMENT != 0 || !fits {
                    return Err(IntegrityError::BadTiling {
                        addr,
                        size,
                        region_end: end,
                    });
                }
                walked.insert(addr, size);
                offset += HEADER_SIZE + size;
            }
            run_ends.insert(end);
        }

        let lists = self.free_lists();
        let mut free: HashSet<usize> = HashSet::new();
        for bin in 0..BIN_COUNT {
            let mut cur = lists.head(bin);
            while let Some(block) = cur {
                let addr = block.addr();
                let Some(&size) = walked.get(&addr) else {
                    return Err(IntegrityError::UnknownFreeBlock { bin, addr });
                };
                if !free.insert(addr) {
                    return Err(IntegrityError::DuplicateFree { addr });
                }
                let expected = bin_of(size);
                if expected != bin {
                    return Err(IntegrityError::WrongBin {
                        addr,
                        size,
                        bin,
                        expected,
                    });
                }
                cur = block.next();
            }
        }
        if free.len() != lists.len() {
            return Err(IntegrityError::CountMismatch {
                walked: free.len(),
                recorded: lists.len(),
            });
        }

        let mut walk = HeapWalk {
            regions: runs.len(),
            bytes_mapped: self.bytes_mapped(),
            ..HeapWalk::default()
        };
        let mut prev_free: Option<usize> = None;
        for (&addr, &size) in &walked {
            let is_free = free.contains(&addr);
            if is_free {
                walk.free_blocks += 1;
                walk.free_bytes += size;
            } else {
                walk.allocated_blocks += 1;
                walk.allocated_bytes += size;
            }
            walk.header_bytes += HEADER_SIZE;

            if self.config().coalesce.merges() {
                if let (Some(left), true) = (prev_free, is_free) {
                    return Err(IntegrityError::AdjacentFree { left, right: addr });
                }
            }
            let block_end = addr + HEADER_SIZE + size;
            prev_free = (is_free && !run_ends.contains(&block_end)).then_some(addr);
        }

        let accounted = walk.free_bytes + walk.allocated_bytes + walk.header_bytes;
        if accounted != walk.bytes_mapped {
            return Err(IntegrityError::Conservation {
                accounted,
                mapped: walk.bytes_mapped,
            });
        }
        Ok(walk)
    }
}
