//! The `check()` diagnostic: an always-compiled, read-only traversal that
//! validates every invariant of the public contract and aborts via
//! [`FatalError`] on the first violation it finds. Tabular per-block
//! logging only actually renders when the configured `log` level permits
//! it: the checks themselves always run, the expensive printing doesn't.

use crate::llist::FreeListNode;
use crate::{tag, FatalError, Heap, Policy, SegmentSource};

impl<S: SegmentSource> Heap<S> {
    /// Traverses every block from `heap_start` to the end sentinel,
    /// checking (I1)-(I4) of the public contract, then (I5) for the
    /// explicit policy. Logs a per-block table at `debug` level. Aborts
    /// the process on the first inconsistency found.
    pub fn check(&self) {
        self.require_initialized();

        let mut cur = self.heap_start;
        let mut total = 0usize;
        let mut prev_was_free = false;
        let mut free_count = 0usize;

        // SAFETY: every header visited is either a real block or the
        // size-0 end sentinel, which terminates the loop.
        unsafe {
            loop {
                let header_tag = tag::read_tag(cur);
                let size = header_tag.size();

                if size == 0 {
                    break;
                }

                if size % crate::ALIGN != 0 {
                    crate::fatal(FatalError::SizeNotMultipleOf32);
                }

                let footer = tag::footer_of(cur, size);
                if tag::read_tag(footer) != header_tag {
                    crate::fatal(FatalError::HeaderFooterMismatch);
                }

                log::debug!(
                    "{cur:p}: size {size:>6} {}",
                    if header_tag.is_allocated() { "alloc" } else { "free" }
                );

                let is_free = !header_tag.is_allocated();
                if is_free {
                    if prev_was_free {
                        crate::fatal(FatalError::TraversalOverrun);
                    }
                    free_count += 1;
                }
                prev_was_free = is_free;

                total += size;

                let next = cur.add(size);
                if next <= cur {
                    crate::fatal(FatalError::TraversalOverrun);
                }
                cur = next;
            }
        }

        let usable = self.heap_end as usize - self.heap_start as usize;
        if total != usable {
            crate::fatal(FatalError::TraversalOverrun);
        }

        if self.policy == Policy::Explicit {
            self.check_free_list(free_count);
        }

        log::debug!("check: {total} usable bytes scanned, {free_count} free blocks");
    }

    /// (I5): the free list contains exactly the free blocks found by the
    /// scan above, and both link directions agree.
    fn check_free_list(&self, expected_free_blocks: usize) {
        let mut count = 0usize;
        let mut prev: *mut FreeListNode = core::ptr::null_mut();

        // SAFETY: the free list only ever links free blocks of this heap.
        unsafe {
            if !self.free_list_head.is_null() && !(*self.free_list_head).prev_free.is_null() {
                crate::fatal(FatalError::TraversalOverrun);
            }

            for node in FreeListNode::iter(self.free_list_head) {
                if (*node).prev_free != prev {
                    crate::fatal(FatalError::TraversalOverrun);
                }

                let header = node.cast::<u8>();
                if tag::read_tag(header).is_allocated() {
                    crate::fatal(FatalError::TraversalOverrun);
                }

                count += 1;
                prev = node;
            }
        }

        if count != expected_free_blocks {
            crate::fatal(FatalError::TraversalOverrun);
        }
    }
}
