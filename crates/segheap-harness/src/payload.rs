//! Byte patterns written into payloads to catch overlapping blocks.

use std::ptr::NonNull;

fn pattern_byte(tag: u64, offset: usize) -> u8 {
    (tag as u8) ^ (offset as u8).rotate_left(3)
}

/// Fills `len` bytes at `ptr` with the pattern for `tag`.
///
/// # Safety
///
/// `ptr` must be valid for writes of `len` bytes.
pub unsafe fn fill(ptr: NonNull<u8>, len: usize, tag: u64) {
    // SAFETY: caller guarantees `len` writable bytes.
    let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
    for (offset, byte) in bytes.iter_mut().enumerate() {
        *byte = pattern_byte(tag, offset);
    }
}

/// Offset of the first byte that no longer matches the pattern for `tag`.
///
/// # Safety
///
/// `ptr` must be valid for reads of `len` initialized bytes.
pub unsafe fn first_mismatch(ptr: NonNull<u8>, len: usize, tag: u64) -> Option<usize> {
    // SAFETY: caller guarantees `len` readable bytes.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
    bytes
        .iter()
        .enumerate()
        .position(|(offset, &byte)| byte != pattern_byte(tag, offset))
}
