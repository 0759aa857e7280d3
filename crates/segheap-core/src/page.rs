//! Page sources.
//!
//! The heap grows one fixed-size page at a time through a [`PageSource`].
//! [`MmapPages`] asks the kernel for fresh anonymous mappings;
//! [`RegionPages`] hands out consecutive pages of one up-front reservation,
//! which makes page placement (and therefore cross-page adjacency)
//! deterministic. Only the latter lets blocks span a page boundary.

use std::ptr::NonNull;

use thiserror::Error;

use crate::block::HEADER_SIZE;

/// Size of every page claimed by the heap.
pub const PAGE_SIZE: usize = 4096;

/// Largest payload a single request may ask for: one page minus one header.
pub const PAGE_PAYLOAD_CAPACITY: usize = PAGE_SIZE - HEADER_SIZE;

/// Page mapping failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("mmap of {size} bytes failed (errno {errno})")]
    MapFailed { size: usize, errno: i32 },

    #[error("munmap of {size} bytes at {addr:#x} failed (errno {errno})")]
    UnmapFailed { addr: usize, size: usize, errno: i32 },

    #[error("page budget exhausted after {pages} pages")]
    Exhausted { pages: usize },

    #[error("mapping size {size} is not a positive multiple of the page size")]
    BadLength { size: usize },
}

/// Host primitive that supplies page-aligned, writable memory.
pub trait PageSource {
    /// Maps `size` bytes (a multiple of [`PAGE_SIZE`]) of fresh memory.
    fn map_pages(&mut self, size: usize) -> Result<NonNull<u8>, PageError>;

    /// Returns a mapping to the host.
    ///
    /// The heap calls this only when it is dropped: pages stay claimed for
    /// as long as the heap lives.
    ///
    /// # Safety
    ///
    /// `ptr`/`size` must describe a mapping previously returned by
    /// [`PageSource::map_pages`] on this source, and nothing may reference
    /// that memory afterwards.
    unsafe fn unmap_pages(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), PageError>;

    /// Whether every page handed out belongs to one allocation.
    ///
    /// Only then may the heap treat neighbouring pages as one run: merge
    /// blocks across their boundary and walk them from a single base. Separate
    /// mappings can land next to each other but stay distinct allocations.
    fn contiguous(&self) -> bool {
        false
    }
}

fn check_length(size: usize) -> Result<(), PageError> {
    if size == 0 || size % PAGE_SIZE != 0 {
        return Err(PageError::BadLength { size });
    }
    Ok(())
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Anonymous private mappings straight from the kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapPages;

impl MmapPages {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PageSource for MmapPages {
    fn map_pages(&mut self, size: usize) -> Result<NonNull<u8>, PageError> {
        check_length(size)?;
        // SAFETY: anonymous mapping with no fd and no fixed address.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PageError::MapFailed {
                size,
                errno: last_errno(),
            });
        }
        NonNull::new(ptr.cast::<u8>()).ok_or(PageError::MapFailed { size, errno: 0 })
    }

    unsafe fn unmap_pages(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), PageError> {
        // SAFETY: caller guarantees `ptr`/`size` came from `map_pages`.
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), size) };
        if rc != 0 {
            return Err(PageError::UnmapFailed {
                addr: ptr.as_ptr() as usize,
                size,
                errno: last_errno(),
            });
        }
        Ok(())
    }
}

/// Consecutive pages carved from one reservation, lowest address first.
///
/// Successive grants are physically adjacent. The reservation is released
/// when the source is dropped.
#[derive(Debug)]
pub struct RegionPages {
    base: NonNull<u8>,
    capacity: usize,
    used: usize,
}

impl RegionPages {
    /// Reserves room for `pages` pages.
    pub fn reserve(pages: usize) -> Result<Self, PageError> {
        let capacity = pages
            .checked_mul(PAGE_SIZE)
            .ok_or(PageError::BadLength { size: usize::MAX })?;
        let base = MmapPages.map_pages(capacity)?;
        Ok(Self {
            base,
            capacity,
            used: 0,
        })
    }

    /// Pages handed out so far.
    #[must_use]
    pub fn pages_used(&self) -> usize {
        self.used / PAGE_SIZE
    }

    /// Base address of the reservation.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }
}

impl PageSource for RegionPages {
    fn map_pages(&mut self, size: usize) -> Result<NonNull<u8>, PageError> {
        check_length(size)?;
        if self.capacity - self.used < size {
            return Err(PageError::Exhausted {
                pages: self.pages_used(),
            });
        }
        // SAFETY: `used + size <= capacity`, so the offset stays inside the reservation.
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.used)) };
        self.used += size;
        Ok(ptr)
    }

    unsafe fn unmap_pages(&mut self, _ptr: NonNull<u8>, _size: usize) -> Result<(), PageError> {
        // Individual grants are released together with the reservation.
        Ok(())
    }

    fn contiguous(&self) -> bool {
        true
    }
}

impl Drop for RegionPages {
    fn drop(&mut self) {
        // SAFETY: `base`/`capacity` is exactly the mapping made in `reserve`.
        let _ = unsafe { MmapPages.unmap_pages(self.base, self.capacity) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_capacity_leaves_room_for_one_header() {
        assert_eq!(PAGE_PAYLOAD_CAPACITY + HEADER_SIZE, PAGE_SIZE);
    }

    #[test]
    fn mmap_roundtrip_is_writable_and_page_aligned() {
        let mut source = MmapPages::new();
        let ptr = source.map_pages(PAGE_SIZE).expect("mmap should succeed");
        assert_eq!(ptr.as_ptr() as usize % PAGE_SIZE, 0);

        // SAFETY: the mapping is PAGE_SIZE bytes of writable memory.
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0x5A, PAGE_SIZE);
            assert_eq!(*ptr.as_ptr().add(PAGE_SIZE - 1), 0x5A);
        }

        // SAFETY: mapping came from this source and is no longer used.
        let unmap = unsafe { source.unmap_pages(ptr, PAGE_SIZE) };
        assert!(unmap.is_ok(), "munmap should succeed, got {unmap:?}");
    }

    #[test]
    fn mmap_rejects_partial_pages() {
        let mut source = MmapPages::new();
        assert_eq!(
            source.map_pages(100),
            Err(PageError::BadLength { size: 100 })
        );
        assert_eq!(source.map_pages(0), Err(PageError::BadLength { size: 0 }));
    }

    #[test]
    fn region_grants_are_adjacent_and_bounded() {
        let mut region = RegionPages::reserve(2).expect("reserve");
        let first = region.map_pages(PAGE_SIZE).expect("first page");
        let second = region.map_pages(PAGE_SIZE).expect("second page");

        assert_eq!(first.as_ptr() as usize, region.base());
        assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + PAGE_SIZE);
        assert_eq!(region.pages_used(), 2);
        assert!(region.contiguous());
        assert!(!MmapPages::new().contiguous());
        assert_eq!(
            region.map_pages(PAGE_SIZE),
            Err(PageError::Exhausted { pages: 2 })
        );
    }
}
