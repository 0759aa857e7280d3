#![no_main]
use std::ptr::NonNull;

use libfuzzer_sys::fuzz_target;
use segheap_core::{CoalescePolicy, Heap, HeapConfig, RegionPages};

const REGION_PAGES: usize = 32;

fuzz_target!(|data: &[u8]| {
    // Byte 0 picks the policy; then 3-byte ops: [kind, size_lo, size_hi].
    let Some((&mode, ops)) = data.split_first() else {
        return;
    };
    let policy = if mode & 1 == 0 {
        CoalescePolicy::Immediate
    } else {
        CoalescePolicy::Never
    };
    let Ok(source) = RegionPages::reserve(REGION_PAGES) else {
        return;
    };
    let config = HeapConfig::default()
        .with_coalesce(policy)
        .with_log_capacity(16);
    let mut heap = Heap::with_source(config, source);
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for (step, chunk) in ops.chunks_exact(3).enumerate() {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        match chunk[0] % 4 {
            0 | 1 => {
                if let Ok(ptr) = heap.allocate(size) {
                    let tag = step as u8;
                    // SAFETY: the heap granted at least `size` writable bytes.
                    unsafe { std::ptr::write_bytes(ptr.as_ptr(), tag, size) };
                    live.push((ptr, size, tag));
                }
            }
            2 => {
                if live.is_empty() {
                    continue;
                }
                let (ptr, size, tag) = live.swap_remove(size % live.len());
                // SAFETY: `ptr` is live with `size` initialized bytes.
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                assert!(bytes.iter().all(|&b| b == tag), "payload overwritten");
                // SAFETY: `ptr` came from this heap and leaves `live` here.
                unsafe { heap.deallocate(ptr) };
            }
            _ => {
                if let Err(err) = heap.verify() {
                    panic!("integrity: {err}");
                }
            }
        }
    }

    if let Err(err) = heap.verify() {
        panic!("integrity: {err}");
    }
    let stats = heap.finalize();
    assert!(stats.page_growths as usize <= REGION_PAGES);
});
