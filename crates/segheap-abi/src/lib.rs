// Callers pass raw pointers across the boundary; the contracts live on the
// core `Heap` methods each entry point forwards to.
#![allow(clippy::missing_safety_doc)]
//! # segheap-abi
//!
//! `extern "C"` entry points over a single process-wide [`Heap`]:
//!
//! ```text
//! C caller -> segheap_* (this crate) -> lock -> Heap (segheap-core) -> return
//! ```
//!
//! The heap itself is single-threaded; the lock here only serializes callers.
//! Configuration is read from the environment (`SEGHEAP_COALESCE`,
//! `SEGHEAP_MAX_PAGES`, `SEGHEAP_LOG_CAPACITY`) when the heap is first built.

use std::ffi::{c_int, c_void};
use std::io::Write;
use std::ptr::{self, NonNull};

use parking_lot::Mutex;
use segheap_core::{Heap, HeapConfig, HeapStats};

static HEAP: Mutex<Option<Heap>> = Mutex::new(None);

fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
    let mut guard = HEAP.lock();
    let heap = guard.get_or_insert_with(|| Heap::new(HeapConfig::from_env()));
    f(heap)
}

/// Counters of the process-wide heap, or `None` before first use.
pub fn heap_stats() -> Option<HeapStats> {
    HEAP.lock().as_ref().map(Heap::stats)
}

/// Builds the process-wide heap, or resets its bins if it already exists.
///
/// A reset re-carves every claimed page; pointers handed out earlier become
/// invalid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn segheap_initialize() {
    let mut guard = HEAP.lock();
    match guard.as_mut() {
        Some(heap) => heap.initialize(),
        None => *guard = Some(Heap::new(HeapConfig::from_env())),
    }
}

/// Allocates `size` bytes; null on zero, oversized or unserviceable requests.
///
/// Builds the heap on first use if [`segheap_initialize`] was not called.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn segheap_malloc(size: usize) -> *mut c_void {
    with_heap(|heap| match heap.allocate(size) {
        Ok(ptr) => ptr.as_ptr().cast::<c_void>(),
        Err(_) => ptr::null_mut(),
    })
}

/// Releases a pointer from [`segheap_malloc`]. Null is ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn segheap_free(ptr: *mut c_void) {
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        return;
    };
    let mut guard = HEAP.lock();
    if let Some(heap) = guard.as_mut() {
        // SAFETY: the caller passes a live pointer obtained from segheap_malloc.
        unsafe { heap.deallocate(ptr) };
    }
}

/// Writes the statistics report to stderr. Memory is not released.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn segheap_finalize() {
    let Some(stats) = HEAP.lock().as_mut().map(Heap::finalize) else {
        return;
    };
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "{stats}");
}

/// Runs the integrity walker: 0 when consistent (or not yet built), -1 otherwise.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn segheap_verify() -> c_int {
    match HEAP.lock().as_ref().map(Heap::verify) {
        Some(Err(_)) => -1,
        _ => 0,
    }
}

/// Bytes obtained from the operating system so far.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn segheap_bytes_mapped() -> usize {
    HEAP.lock().as_ref().map_or(0, Heap::bytes_mapped)
}
