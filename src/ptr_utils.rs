//! Generic utilities for pointer handling and sizing.

use crate::ALIGN;

/// Rounds `n` up to the next multiple of `ALIGN`, expressed over a byte
/// count instead of a pointer, since that's what
/// `allocate`/`resize`/`zero_allocate` work with (a requested payload size,
/// not yet a block address).
#[inline]
pub(crate) const fn round_up_align(n: usize) -> usize {
    (n + (ALIGN - 1)) & !(ALIGN - 1)
}

/// Computes the block size needed to store `n` payload bytes: header and
/// footer overhead, rounded up to `ALIGN`, and never smaller than
/// `crate::MIN_BLOCK`.
#[inline]
pub(crate) const fn block_size_for_payload(n: usize) -> usize {
    let with_tags = round_up_align(n + crate::TAG_OVERHEAD);

    if with_tags < crate::MIN_BLOCK {
        crate::MIN_BLOCK
    } else {
        with_tags
    }
}

#[inline]
pub(crate) fn is_aligned(ptr: *mut u8) -> bool {
    ptr as usize % ALIGN == 0
}
