//! Contract tests for the extern "C" heap entry points.

use std::ffi::c_void;
use std::ptr;
use std::sync::Mutex;

use segheap_abi::{
    heap_stats, segheap_bytes_mapped, segheap_finalize, segheap_free, segheap_initialize,
    segheap_malloc, segheap_verify,
};

// The heap is process-wide; tests take turns.
static TEST_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn out_of_range_requests_return_null() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: entry points are called with in-contract arguments.
    unsafe {
        segheap_initialize();
        assert!(segheap_malloc(0).is_null());
        assert!(segheap_malloc(4081).is_null());
        assert!(segheap_malloc(usize::MAX).is_null());
        segheap_free(ptr::null_mut());
        assert_eq!(segheap_verify(), 0);
    }
    let stats = heap_stats().expect("heap built by initialize");
    assert_eq!(stats.failed_requests, 3);
}

#[test]
fn freed_block_is_handed_out_again() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: every pointer passed to segheap_free came from segheap_malloc.
    unsafe {
        segheap_initialize();
        let p1 = segheap_malloc(64);
        let p2 = segheap_malloc(64);
        let p3 = segheap_malloc(64);
        assert!(!p1.is_null() && !p2.is_null() && !p3.is_null());

        segheap_free(p2);
        let again = segheap_malloc(64);
        assert_eq!(again, p2);

        for p in [p1, again, p3] {
            segheap_free(p);
        }
        assert_eq!(segheap_verify(), 0);
    }
}

#[test]
fn payloads_are_writable_and_page_backed() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: payloads are written within their requested sizes and freed once.
    unsafe {
        segheap_initialize();
        let sizes = [8usize, 100, 1000, 4000];
        let ptrs: Vec<*mut c_void> = sizes.iter().map(|&n| segheap_malloc(n)).collect();
        for (&p, &n) in ptrs.iter().zip(&sizes) {
            assert!(!p.is_null());
            assert_eq!(p as usize % 8, 0, "payload alignment");
            ptr::write_bytes(p.cast::<u8>(), 0xA5, n);
        }
        assert!(segheap_bytes_mapped() >= 2 * 4096);
        assert_eq!(segheap_verify(), 0);
        for p in ptrs {
            segheap_free(p);
        }
        segheap_finalize();
    }
    let stats = heap_stats().expect("heap exists");
    assert_eq!(stats.frees, 4);
}
