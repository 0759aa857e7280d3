//! Per-bin free lists.
//!
//! Each bin owns a singly linked list threaded through the headers of its
//! free blocks. Insertion pushes at the head. Removal is O(1) given the
//! predecessor found during the caller's scan; the manager never searches on
//! its own behalf so the allocation path stays single-pass.
//!
//! Coalescing is not bin-indexed: finding a physical neighbour means visiting
//! every free block in every bin. That linear scan is the price of keeping
//! no boundary tags or address index.

use crate::block::FreeBlock;
use crate::size_class::{BIN_COUNT, bin_of};

/// Position preceding a block inside its bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predecessor {
    /// The block is the first entry; the bin's sentinel head precedes it.
    Head,
    Block(FreeBlock),
}

/// Which side of the freed block a neighbour sat on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Neighbour ends where the freed block starts.
    Left,
    /// Neighbour starts where the freed block ends.
    Right,
}

/// Result of [`FreeLists::coalesce_on_free`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coalesced {
    /// The block finally filed (the leftmost participant).
    pub block: FreeBlock,
    /// Bin it was filed under.
    pub bin: usize,
    /// Neighbours absorbed on the way.
    pub merges: usize,
}

/// Heads of all bins.
#[derive(Debug)]
pub struct FreeLists {
    heads: [Option<FreeBlock>; BIN_COUNT],
    len: usize,
}

impl FreeLists {
    /// All bins empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heads: [None; BIN_COUNT],
            len: 0,
        }
    }

    /// Empties every bin. Blocks that were listed are forgotten, not released.
    pub fn reset(&mut self) {
        self.heads = [None; BIN_COUNT];
        self.len = 0;
    }

    /// Number of listed free blocks across all bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Files `block` under `bin_of(block.size())`, returning that bin.
    pub fn add_free(&mut self, block: FreeBlock) -> usize {
        let bin = bin_of(block.size());
        block.set_next(self.heads[bin]);
        self.heads[bin] = Some(block);
        self.len += 1;
        bin
    }

    /// Unlinks `block` from `bin` given the predecessor located by a scan.
    pub fn remove_free(&mut self, block: FreeBlock, prev: Predecessor, bin: usize) {
        match prev {
            Predecessor::Head => {
                debug_assert_eq!(self.heads[bin], Some(block), "head mismatch in bin {bin}");
                self.heads[bin] = block.next();
            }
            Predecessor::Block(prev) => {
                debug_assert_eq!(prev.next(), Some(block), "stale predecessor in bin {bin}");
                prev.set_next(block.next());
            }
        }
        block.set_next(None);
        self.len -= 1;
    }

    /// First block of `bin`, if any.
    #[must_use]
    pub fn head(&self, bin: usize) -> Option<FreeBlock> {
        self.heads[bin]
    }

    /// Walks one bin, yielding each block with its predecessor.
    #[must_use]
    pub fn iter_bin(&self, bin: usize) -> BinIter {
        BinIter {
            prev: Predecessor::Head,
            cur: self.heads[bin],
        }
    }

    /// Walks every bin in ascending order, yielding `(bin, block)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, FreeBlock)> + '_ {
        (0..BIN_COUNT).flat_map(move |bin| self.iter_bin(bin).map(move |(_, block)| (bin, block)))
    }

    /// Merges `block` with every physically adjacent free block, then files
    /// the result.
    ///
    /// Each round unlinks one neighbour and grows the survivor; rounds repeat
    /// until no neighbour remains, so a run of contiguous free blocks always
    /// collapses into one entry. The survivor's bin is derived from its final
    /// size.
    ///
    /// `joinable(seam)` is asked for the address where two candidates meet;
    /// neighbours across a refused seam are left alone.
    pub fn coalesce_on_free(
        &mut self,
        block: FreeBlock,
        joinable: impl Fn(usize) -> bool,
    ) -> Coalesced {
        let mut block = block;
        let mut merges = 0;
        while let Some((side, neighbor)) = self.unlink_neighbor(block, &joinable) {
            match side {
                Side::Left => {
                    neighbor.absorb(block);
                    block = neighbor;
                }
                Side::Right => block.absorb(neighbor),
            }
            merges += 1;
        }
        let bin = self.add_free(block);
        Coalesced { block, bin, merges }
    }

    /// Finds and unlinks one free block touching `block`, scanning all bins.
    fn unlink_neighbor(
        &mut self,
        block: FreeBlock,
        joinable: &impl Fn(usize) -> bool,
    ) -> Option<(Side, FreeBlock)> {
        let (start, end) = (block.addr(), block.end());
        let (left_ok, right_ok) = (joinable(start), joinable(end));
        for bin in 0..BIN_COUNT {
            let hit = self.iter_bin(bin).find_map(|(prev, cur)| {
                if left_ok && cur.end() == start {
                    Some((Side::Left, prev, cur))
                } else if right_ok && cur.addr() == end {
                    Some((Side::Right, prev, cur))
                } else {
                    None
                }
            });
            if let Some((side, prev, cur)) = hit {
                self.remove_free(cur, prev, bin);
                return Some((side, cur));
            }
        }
        None
    }
}

impl Default for FreeLists {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over one bin; see [`FreeLists::iter_bin`].
#[derive(Debug)]
pub struct BinIter {
    prev: Predecessor,
    cur: Option<FreeBlock>,
}

impl Iterator for BinIter {
    type Item = (Predecessor, FreeBlock);

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        let item = (self.prev, cur);
        self.prev = Predecessor::Block(cur);
        self.cur = cur.next();
        Some(item)
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::block::HEADER_SIZE;
    use std::ptr::NonNull;

    #[repr(C, align(16))]
    struct Scratch([u8; 4096]);

    /// Carves scratch memory into contiguous blocks of `sizes`, plus the
    /// remainder as a final block.
    fn carve(scratch: &mut Scratch, sizes: &[usize]) -> Vec<FreeBlock> {
        let base = NonNull::from(&mut scratch.0).cast::<u8>();
        // SAFETY: scratch is aligned, writable and exactly 4096 bytes.
        let mut cur = unsafe { FreeBlock::format(base, 4096 - HEADER_SIZE) }.into_allocated();
        let mut blocks = Vec::new();
        for &size in sizes {
            let tail = cur.split(size).expect("scratch large enough");
            blocks.push(cur.into_free());
            cur = tail.into_allocated();
        }
        blocks.push(cur.into_free());
        blocks
    }

    #[test]
    fn add_files_by_size_class() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64, 200]);
        let mut lists = FreeLists::new();

        assert_eq!(lists.add_free(blocks[0]), bin_of(64));
        assert_eq!(lists.add_free(blocks[1]), bin_of(200));
        assert_eq!(lists.len(), 2);
        assert_eq!(lists.iter_bin(bin_of(64)).count(), 1);
        assert_eq!(lists.iter_bin(bin_of(200)).count(), 1);
    }

    #[test]
    fn add_pushes_at_head() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64, 64, 64]);
        let mut lists = FreeLists::new();
        for &block in &blocks[..3] {
            lists.add_free(block);
        }

        let order: Vec<FreeBlock> = lists.iter_bin(bin_of(64)).map(|(_, b)| b).collect();
        assert_eq!(order, vec![blocks[2], blocks[1], blocks[0]]);
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64, 64, 64, 64]);
        let bin = bin_of(64);
        let mut lists = FreeLists::new();
        for &block in &blocks[..4] {
            lists.add_free(block);
        }
        // List order: 3, 2, 1, 0.

        let (prev, middle) = lists.iter_bin(bin).nth(1).expect("second entry");
        assert_eq!(middle, blocks[2]);
        lists.remove_free(middle, prev, bin);

        let (prev, head) = lists.iter_bin(bin).next().expect("head");
        assert_eq!(prev, Predecessor::Head);
        lists.remove_free(head, prev, bin);

        let (prev, tail) = lists.iter_bin(bin).last().expect("tail");
        assert_eq!(tail, blocks[0]);
        lists.remove_free(tail, prev, bin);

        let rest: Vec<FreeBlock> = lists.iter_bin(bin).map(|(_, b)| b).collect();
        assert_eq!(rest, vec![blocks[1]]);
        assert_eq!(lists.len(), 1);
    }

    #[test]
    fn coalesce_merges_left_neighbor() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64, 64, 64]);
        let mut lists = FreeLists::new();
        lists.add_free(blocks[0]);

        let out = lists.coalesce_on_free(blocks[1], |_| true);
        assert_eq!(out.block, blocks[0]);
        assert_eq!(out.merges, 1);
        assert_eq!(out.block.size(), 64 + HEADER_SIZE + 64);
        assert_eq!(out.bin, bin_of(144));
        assert_eq!(lists.len(), 1);
    }

    #[test]
    fn coalesce_merges_right_neighbor_and_rebins() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64, 64, 64]);
        let mut lists = FreeLists::new();
        lists.add_free(blocks[1]);

        let out = lists.coalesce_on_free(blocks[0], |_| true);
        assert_eq!(out.block, blocks[0]);
        assert_eq!(out.merges, 1);
        assert_eq!(lists.iter_bin(bin_of(64)).count(), 0, "neighbor unlinked");
        assert_eq!(lists.iter_bin(bin_of(144)).count(), 1);
    }

    #[test]
    fn coalesce_is_transitive_across_both_sides() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64, 64, 64]);
        let mut lists = FreeLists::new();
        lists.add_free(blocks[0]);
        lists.add_free(blocks[2]);
        lists.add_free(blocks[3]);

        let out = lists.coalesce_on_free(blocks[1], |_| true);
        assert_eq!(out.block, blocks[0]);
        assert_eq!(out.merges, 3);
        assert_eq!(out.block.size(), 4096 - HEADER_SIZE);
        assert_eq!(lists.len(), 1);
        assert_eq!(lists.iter().next(), Some((out.bin, blocks[0])));
    }

    #[test]
    fn coalesce_respects_refused_seams() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64, 64, 64]);
        let mut lists = FreeLists::new();
        lists.add_free(blocks[0]);
        lists.add_free(blocks[2]);

        let seam = blocks[1].addr();
        let out = lists.coalesce_on_free(blocks[1], |at| at != seam);
        assert_eq!(out.block, blocks[1], "left seam refused");
        assert_eq!(out.merges, 1, "right neighbour still absorbed");
        assert_eq!(out.block.size(), 64 + HEADER_SIZE + 64);
        assert_eq!(lists.len(), 2);
        assert!(lists.iter().any(|(_, b)| b == blocks[0]));
    }

    #[test]
    fn coalesce_without_neighbors_just_files() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64, 64, 64]);
        let mut lists = FreeLists::new();
        lists.add_free(blocks[2]);

        let out = lists.coalesce_on_free(blocks[0], |_| true);
        assert_eq!(out.merges, 0);
        assert_eq!(out.block, blocks[0]);
        assert_eq!(lists.len(), 2);
    }

    #[test]
    fn reset_forgets_everything() {
        let mut scratch = Scratch([0; 4096]);
        let blocks = carve(&mut scratch, &[64]);
        let mut lists = FreeLists::new();
        lists.add_free(blocks[0]);
        lists.add_free(blocks[1]);
        lists.reset();
        assert!(lists.is_empty());
        assert_eq!(lists.iter().count(), 0);
    }
}
