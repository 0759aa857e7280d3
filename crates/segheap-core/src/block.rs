//! In-band block headers and typed block handles.
//!
//! Every block is laid out as `| header | payload |`. The header records the
//! payload size (never including the header itself) and, while the block is
//! free, the link to the next free block in its bin:
//!
//! ```text
//! ... | size | link | payload ........ | size | link | payload ... |
//!     ^             ^
//!     header        header + HEADER_SIZE (pointer handed to the caller)
//! ```
//!
//! The same bytes back two handle types. [`FreeBlock`] exposes the link and
//! can sit in a free list; [`AllocatedBlock`] has no link accessors at all.
//! State changes are by-value conversions, so an allocated header cannot be
//! walked as a list node without first going back through
//! [`AllocatedBlock::into_free`].
//!
//! Handles are created only by the `unsafe` constructors here. Once created
//! they are trusted: the heap guarantees a handle always points at a header
//! inside a page it mapped, and the safe accessors rely on that.

use std::fmt;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

#[repr(C)]
struct Header {
    size: usize,
    link: Option<NonNull<Header>>,
}

/// Bytes occupied by a block header.
pub const HEADER_SIZE: usize = size_of::<Header>();

/// Granularity of payload sizes; also the alignment of every header.
pub const ALIGNMENT: usize = align_of::<Header>();

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub fn align_up(size: usize) -> Option<usize> {
    Some(size.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1))
}

/// Reads the recorded payload size of the header at `addr`.
///
/// # Safety
///
/// `addr` must point at a block header written by this module that lies
/// inside memory still mapped by the owning heap.
#[inline]
pub(crate) unsafe fn peek_size(addr: NonNull<u8>) -> usize {
    // SAFETY: caller guarantees `addr` is a live, aligned header.
    unsafe { (*addr.cast::<Header>().as_ptr()).size }
}

/// Handle to a block that is (or is about to be) on a free list.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock(NonNull<Header>);

impl FreeBlock {
    /// Writes a fresh free header at `addr` describing `size` payload bytes.
    ///
    /// # Safety
    ///
    /// `addr` must be [`ALIGNMENT`]-aligned and `[addr, addr + HEADER_SIZE +
    /// size)` must be writable memory owned by the heap and not part of any
    /// other live block.
    pub(crate) unsafe fn format(addr: NonNull<u8>, size: usize) -> Self {
        debug_assert_eq!(addr.as_ptr() as usize % ALIGNMENT, 0);
        let header = addr.cast::<Header>();
        // SAFETY: caller guarantees the range is writable, aligned and unaliased.
        unsafe { header.as_ptr().write(Header { size, link: None }) };
        Self(header)
    }

    /// Address of the header.
    #[inline]
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// One past the last payload byte.
    #[inline]
    #[must_use]
    pub fn end(self) -> usize {
        self.addr() + HEADER_SIZE + self.size()
    }

    /// Recorded payload size.
    #[inline]
    #[must_use]
    pub fn size(self) -> usize {
        // SAFETY: handles only exist for live headers (module invariant).
        unsafe { (*self.0.as_ptr()).size }
    }

    #[inline]
    pub(crate) fn next(self) -> Option<FreeBlock> {
        // SAFETY: handles only exist for live headers (module invariant).
        unsafe { (*self.0.as_ptr()).link.map(FreeBlock) }
    }

    #[inline]
    pub(crate) fn set_next(self, next: Option<FreeBlock>) {
        // SAFETY: handles only exist for live headers (module invariant).
        unsafe { (*self.0.as_ptr()).link = next.map(|b| b.0) };
    }

    /// Grows `self` over the physically following free block `right`.
    ///
    /// `right` must already be unlinked from its bin; its header stops being
    /// an independent record.
    pub(crate) fn absorb(self, right: FreeBlock) {
        debug_assert_eq!(self.end(), right.addr(), "absorb requires adjacency");
        let merged = self.size() + HEADER_SIZE + right.size();
        // SAFETY: handles only exist for live headers (module invariant).
        unsafe { (*self.0.as_ptr()).size = merged };
    }

    /// Converts an unlinked free block into an allocated one.
    pub(crate) fn into_allocated(self) -> AllocatedBlock {
        self.set_next(None);
        AllocatedBlock(self.0)
    }
}

impl fmt::Debug for FreeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeBlock")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("size", &self.size())
            .finish()
    }
}

/// Handle to a block whose payload belongs to a caller.
#[derive(PartialEq, Eq)]
pub struct AllocatedBlock(NonNull<Header>);

impl AllocatedBlock {
    /// Recovers the block from a payload pointer (`header = payload -
    /// HEADER_SIZE`).
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by [`AllocatedBlock::payload`] for a
    /// block of the same heap that has not been released since.
    #[inline]
    pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        // SAFETY: the header immediately precedes every payload this module hands out.
        let header = unsafe { payload.as_ptr().sub(HEADER_SIZE) };
        // SAFETY: `header` derives from a non-null payload minus a positive in-bounds offset.
        Self(unsafe { NonNull::new_unchecked(header.cast::<Header>()) })
    }

    /// Address of the header.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Recorded payload size (may exceed the request by an unsplittable tail).
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        // SAFETY: handles only exist for live headers (module invariant).
        unsafe { (*self.0.as_ptr()).size }
    }

    /// Pointer handed to the caller: always `header + HEADER_SIZE`.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> NonNull<u8> {
        // SAFETY: the payload starts right after the header, inside the same block.
        unsafe { NonNull::new_unchecked(self.0.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    /// Trims this block to `size` payload bytes when the tail can host a
    /// header of its own, returning the tail as a new free block.
    ///
    /// Tails of `HEADER_SIZE` bytes or less stay inside this block as
    /// internal fragmentation.
    pub(crate) fn split(&mut self, size: usize) -> Option<FreeBlock> {
        let remaining = self.size().checked_sub(size)?;
        if remaining <= HEADER_SIZE {
            return None;
        }
        // SAFETY: handles only exist for live headers (module invariant).
        unsafe { (*self.0.as_ptr()).size = size };
        // SAFETY: `size` is a multiple of ALIGNMENT, so the tail header is aligned
        // and `[payload + size, payload + old_size)` lies inside this block.
        let tail = unsafe {
            let at = NonNull::new_unchecked(self.payload().as_ptr().add(size));
            FreeBlock::format(at, remaining - HEADER_SIZE)
        };
        Some(tail)
    }

    /// Converts back into a free block with an empty link.
    pub(crate) fn into_free(self) -> FreeBlock {
        let block = FreeBlock(self.0);
        block.set_next(None);
        block
    }
}

impl fmt::Debug for AllocatedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatedBlock")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("size", &self.size())
            .finish()
    }
}
