//! A single-threaded, boundary-tag dynamic memory allocator over one
//! contiguous segment supplied by a [`SegmentSource`] collaborator.
//!
//! Every block is framed by a header and footer boundary tag (see
//! [`tag`]), carved out of a region grown in fixed-size chunks from the
//! segment source. Two free-block search policies are offered: linear
//! scan of every block ([`Policy::Implicit`]) or a doubly-linked free list
//! threaded through free blocks' own payload bytes ([`Policy::Explicit`]).
//!
//! The allocator itself holds no lock and assumes a single logical thread
//! of control; [`Locked`] (behind the `allocator` feature) adds a
//! `lock_api`-backed mutex for callers that want a `GlobalAlloc`.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "allocator", feature(allocator_api))]

#[cfg(feature = "std")]
extern crate std;

mod diagnostics;
mod llist;
#[cfg(feature = "allocator")]
mod locked;
#[cfg(feature = "allocator")]
pub mod locking;
mod ptr_utils;
mod segment;
mod tag;

pub use segment::{SegmentError, SegmentSource};
#[cfg(feature = "std")]
pub use segment::SbrkSegment;
#[cfg(feature = "allocator")]
pub use locked::Locked;

use core::ptr::{self, NonNull};

use llist::FreeListNode;
use tag::Tag;

/// All block sizes and tags are word-sized; the data model pins the word
/// to 8 bytes regardless of target pointer width.
pub(crate) type Word = u64;
pub(crate) const WORD_SIZE: usize = core::mem::size_of::<Word>();

/// Every block is a multiple of this many bytes and begins at a multiple
/// of this offset relative to [`Heap`]'s first usable address.
pub const ALIGN: usize = 32;

/// Header + footer overhead charged against every block's total size.
pub(crate) const TAG_OVERHEAD: usize = 2 * WORD_SIZE;

/// The smallest possible block: header, footer, and nothing else.
pub const MIN_BLOCK: usize = ALIGN;

/// Growth unit requested from the [`SegmentSource`] on initialization and
/// on every subsequent extension.
pub const CHUNK: usize = 65536;

/// Trailing free space threshold above which [`Heap::shrink_to_fit`] will
/// hand whole chunks back, if the caller invokes it. Never triggered
/// automatically.
pub const SHRINK_THRESHOLD: usize = 16384;

/// Bytes reserved for each sentinel at the extremes of the segment, chosen
/// to preserve 32-byte block alignment of the first usable address
/// regardless of how the segment source aligns its own memory.
const SENTINEL_RESERVE: usize = ALIGN;

/// Chooses which free-block bookkeeping strategy a [`Heap`] uses. Set once
/// at [`Heap::initialize`] and fixed for the heap's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Best-fit search by linear scan of every block, free or allocated.
    /// Simpler, and sufficient for small heaps or few free blocks.
    Implicit,
    /// Best-fit search over a doubly-linked list of free blocks only.
    /// Search cost is proportional to free-block count, not block count.
    Explicit,
}

/// Transient resource exhaustion: the segment source refused to grow.
/// The heap remains valid after this is returned; callers may retry later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorError {
    OutOfMemory,
}

/// Programmer errors and invariant violations. Both categories are fatal:
/// a `FatalError` is never returned to a caller, it aborts the process via
/// [`fatal`] the moment it's detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// `free` called twice on the same pointer without an intervening
    /// `allocate` reusing that block.
    DoubleFree,
    /// Any operation besides `initialize` was called before `initialize`
    /// succeeded.
    NullHeapOnInit,
    /// `initialize` was called on a heap that already owns segment memory
    /// (the segment source's bounds were non-empty at entry).
    InvalidPolicy,
    /// A block's header and footer tags disagree.
    HeaderFooterMismatch,
    /// A block's size is not a positive multiple of [`ALIGN`].
    SizeNotMultipleOf32,
    /// A traversal (search or `check`) walked past where it should have
    /// stopped, or found the free-list and block-scan disagreeing.
    TraversalOverrun,
}

impl FatalError {
    fn message(self) -> &'static str {
        match self {
            FatalError::DoubleFree => "double free detected",
            FatalError::NullHeapOnInit => "heap used before initialize() succeeded",
            FatalError::InvalidPolicy => "initialize() called on a non-empty segment",
            FatalError::HeaderFooterMismatch => "header/footer tag mismatch",
            FatalError::SizeNotMultipleOf32 => "block size is not a multiple of 32",
            FatalError::TraversalOverrun => "heap traversal invariant violated",
        }
    }
}

/// Aborts the process. `FatalError` variants indicate client-side memory
/// corruption or a usage bug; per the allocator's error-handling contract
/// there is nothing safe left to do but stop.
pub(crate) fn fatal(e: FatalError) -> ! {
    panic!("{}", e.message());
}

/// The allocator itself: one [`SegmentSource`]-backed arena, carved into
/// boundary-tagged blocks, searched by whichever [`Policy`] was chosen at
/// [`initialize`](Heap::initialize) time.
///
/// Not `Sync`, not internally locked: concurrent access from multiple
/// threads must be serialized by the caller (see [`Locked`] for a ready
/// wrapper).
pub struct Heap<S: SegmentSource> {
    pub(crate) source: S,
    pub(crate) policy: Policy,
    pub(crate) initialized: bool,
    /// Address of the first real block's header, just past the initial
    /// footer-only sentinel.
    pub(crate) heap_start: *mut u8,
    /// Address of the end header-only sentinel.
    pub(crate) heap_end: *mut u8,
    pub(crate) free_list_head: *mut FreeListNode,
}

impl<S: SegmentSource> Heap<S> {
    /// Builds an uninitialized heap over `source`. Every method other than
    /// `initialize` aborts with [`FatalError::NullHeapOnInit`] until
    /// `initialize` has been called successfully.
    pub const fn new(source: S) -> Self {
        Self {
            source,
            policy: Policy::Implicit,
            initialized: false,
            heap_start: ptr::null_mut(),
            heap_end: ptr::null_mut(),
            free_list_head: ptr::null_mut(),
        }
    }

    #[inline]
    pub(crate) fn require_initialized(&self) {
        if !self.initialized {
            fatal(FatalError::NullHeapOnInit);
        }
    }

    /// Sets the allocator's diagnostic verbosity. This forwards to
    /// [`log::set_max_level`], which is process-global, matching the
    /// `log` facade's own design: there is one active log level, not one
    /// per allocator instance.
    pub fn set_log_level(&mut self, level: log::LevelFilter) {
        log::set_max_level(level);
    }

    /// Requests the first chunk from `source` and installs the initial and
    /// end sentinels plus one free block spanning the usable region.
    /// Must precede every other call. Fails with [`AllocatorError::OutOfMemory`]
    /// if the segment source refuses the first chunk; aborts with
    /// [`FatalError::InvalidPolicy`] if the segment source already reports
    /// non-empty bounds (re-initialization is not supported).
    pub fn initialize(&mut self, policy: Policy) -> Result<(), AllocatorError> {
        let (base, acme) = self.source.segment_bounds();
        if base != acme {
            fatal(FatalError::InvalidPolicy);
        }

        let page_size = self.source.page_size();
        debug_assert!(page_size > 0 && CHUNK % page_size == 0);

        let new_acme = self
            .source
            .extend(CHUNK)
            .map_err(|_| AllocatorError::OutOfMemory)?;

        let arena_base = base.as_ptr();
        let arena_acme = new_acme.as_ptr();

        let heap_start = arena_base.wrapping_add(SENTINEL_RESERVE);
        let heap_end = arena_acme.wrapping_sub(SENTINEL_RESERVE);
        let usable = heap_end as usize - heap_start as usize;

        // SAFETY: `source.extend` granted `[arena_base, arena_acme)` fresh,
        // and `usable` bytes sit strictly between the two sentinel reserves.
        unsafe {
            tag::write_tag(heap_start.wrapping_sub(WORD_SIZE), Tag::sentinel());
            tag::write_tag(heap_end, Tag::sentinel());

            tag::write_tag(heap_start, Tag::new(usable, false));
            tag::write_tag(tag::footer_of(heap_start, usable), Tag::new(usable, false));
        }

        self.heap_start = heap_start;
        self.heap_end = heap_end;
        self.policy = policy;
        self.initialized = true;
        self.free_list_head = ptr::null_mut();

        if policy == Policy::Explicit {
            unsafe {
                FreeListNode::push_front(&mut self.free_list_head, heap_start.cast());
            }
        }

        log::debug!(
            "initialize: {:p}..{:p} ({usable} usable bytes), policy {policy:?}",
            heap_start,
            heap_end
        );

        Ok(())
    }

    /// Allocates `n` payload bytes, or returns null on `n == 0` or
    /// [`AllocatorError::OutOfMemory`].
    pub fn allocate(&mut self, n: usize) -> *mut u8 {
        if n == 0 {
            return ptr::null_mut();
        }

        self.require_initialized();

        match self.allocate_inner(n) {
            Ok(p) => p.as_ptr(),
            Err(AllocatorError::OutOfMemory) => ptr::null_mut(),
        }
    }

    /// `calloc`: allocates room for `m * n` bytes and zeroes the payload.
    /// Returns null on overflow of `m * n`, `m * n == 0`, or OOM.
    pub fn zero_allocate(&mut self, m: usize, n: usize) -> *mut u8 {
        let total = match m.checked_mul(n) {
            Some(total) => total,
            None => return ptr::null_mut(),
        };

        let p = self.allocate(total);
        if !p.is_null() {
            // SAFETY: `allocate` guarantees `total` usable payload bytes at `p`.
            unsafe { ptr::write_bytes(p, 0, total) };
        }

        p
    }

    /// Shrinks, grows in place, or relocates the block backing `p` to hold
    /// `n` payload bytes. `p == null` behaves as `allocate(n)`; `n == 0`
    /// behaves as `free(p)` followed by returning null.
    pub fn resize(&mut self, p: *mut u8, n: usize) -> *mut u8 {
        if p.is_null() {
            return self.allocate(n);
        }
        if n == 0 {
            self.free(p);
            return ptr::null_mut();
        }

        self.require_initialized();

        // SAFETY: `p` is non-null, and by contract was returned by a prior
        // `allocate`/`resize`/`zero_allocate` call on this heap.
        unsafe { self.resize_inner(p, n) }
    }

    /// Frees the block backing `p`. `p == null` is a no-op. Aborts with
    /// [`FatalError::DoubleFree`] if `p`'s block is already free, or
    /// [`FatalError::HeaderFooterMismatch`] if its tags disagree.
    pub fn free(&mut self, p: *mut u8) {
        if p.is_null() {
            return;
        }

        self.require_initialized();

        // SAFETY: `p` is non-null and, by contract, backed by a live
        // allocation from this heap.
        unsafe { self.free_inner(p) };
    }

    fn allocate_inner(&mut self, n: usize) -> Result<NonNull<u8>, AllocatorError> {
        let asize = ptr_utils::block_size_for_payload(n);
        let header = self.find_fit(asize)?;

        // SAFETY: `header` was just returned by `find_fit`, which only
        // hands back headers of free blocks within the current heap.
        unsafe {
            if self.policy == Policy::Explicit {
                FreeListNode::unlink(&mut self.free_list_head, header.cast());
            }

            let total = tag::read_tag(header).size();
            if total - asize >= MIN_BLOCK {
                self.split_block(header, total, asize);
            } else {
                tag::write_tag(header, Tag::new(total, true));
                tag::write_tag(tag::footer_of(header, total), Tag::new(total, true));
            }

            log::trace!("allocate({n}) -> {:p}", tag::payload_ptr(header));

            Ok(NonNull::new_unchecked(tag::payload_ptr(header)))
        }
    }

    /// Finds a best-fit free block of at least `asize` bytes, extending
    /// the heap by one chunk and retrying once on a miss.
    fn find_fit(&mut self, asize: usize) -> Result<*mut u8, AllocatorError> {
        if let Some(header) = self.search(asize) {
            return Ok(header);
        }

        self.extend_heap()?;

        self.search(asize).ok_or(AllocatorError::OutOfMemory)
    }

    fn search(&self, asize: usize) -> Option<*mut u8> {
        match self.policy {
            Policy::Implicit => self.search_implicit(asize),
            Policy::Explicit => self.search_explicit(asize),
        }
    }

    /// Linear scan of every block from `heap_start` to the end sentinel.
    fn search_implicit(&self, asize: usize) -> Option<*mut u8> {
        let mut cur = self.heap_start;
        let mut best: Option<(*mut u8, usize)> = None;

        // SAFETY: every header visited is either a real block's header or
        // the size-0 end sentinel, which terminates the loop before it is
        // ever treated as a candidate.
        unsafe {
            loop {
                let tag = tag::read_tag(cur);
                let size = tag.size();
                if size == 0 {
                    break;
                }

                if !tag.is_allocated() && size >= asize {
                    if size == asize {
                        return Some(cur);
                    }
                    if best.map_or(true, |(_, b)| size < b) {
                        best = Some((cur, size));
                    }
                }

                cur = cur.add(size);
            }
        }

        best.map(|(header, _)| header)
    }

    /// Scan of the free list only; cost is proportional to the number of
    /// free blocks rather than total blocks.
    fn search_explicit(&self, asize: usize) -> Option<*mut u8> {
        let mut best: Option<(*mut u8, usize)> = None;

        // SAFETY: the free list only ever contains valid free-block headers.
        unsafe {
            for node in FreeListNode::iter(self.free_list_head) {
                let header = node.cast::<u8>();
                let size = tag::read_tag(header).size();

                if size == asize {
                    return Some(header);
                }
                if size > asize && best.map_or(true, |(_, b)| size < b) {
                    best = Some((header, size));
                }
            }
        }

        best.map(|(header, _)| header)
    }

    /// Splits a free block at `header` of `total_size` bytes into an
    /// allocated prefix of `asize` bytes and a free remainder, linking the
    /// remainder into the free list if applicable.
    ///
    /// ### Safety
    /// `header` must be a currently-free block of exactly `total_size`
    /// bytes, already unlinked from the free list if [`Policy::Explicit`].
    /// `total_size - asize` must be `>= MIN_BLOCK`.
    unsafe fn split_block(&mut self, header: *mut u8, total_size: usize, asize: usize) {
        debug_assert!(total_size - asize >= MIN_BLOCK);

        tag::write_tag(header, Tag::new(asize, true));
        tag::write_tag(tag::footer_of(header, asize), Tag::new(asize, true));

        let remainder = total_size - asize;
        let rem_header = header.add(asize);
        tag::write_tag(rem_header, Tag::new(remainder, false));
        tag::write_tag(tag::footer_of(rem_header, remainder), Tag::new(remainder, false));

        if self.policy == Policy::Explicit {
            FreeListNode::push_front(&mut self.free_list_head, rem_header.cast());
        }
    }

    /// Requests one more [`CHUNK`] from the segment source, fuses it with
    /// a free tail block if one exists, and installs a new end sentinel.
    fn extend_heap(&mut self) -> Result<(), AllocatorError> {
        let old_end = self.heap_end;

        let new_acme = self
            .source
            .extend(CHUNK)
            .map_err(|_| AllocatorError::OutOfMemory)?;

        let new_heap_end = new_acme.as_ptr().wrapping_sub(SENTINEL_RESERVE);

        // SAFETY: `old_end` was the previous, valid end sentinel; `source`
        // just granted the `CHUNK` bytes immediately following it.
        unsafe {
            let prev_footer = old_end.wrapping_sub(WORD_SIZE);
            let prev_tag = tag::read_tag(prev_footer);

            if !prev_tag.is_allocated() {
                let prev_size = prev_tag.size();
                let prev_header = old_end.wrapping_sub(prev_size);
                let new_size = prev_size + CHUNK;

                tag::write_tag(prev_header, Tag::new(new_size, false));
                tag::write_tag(tag::footer_of(prev_header, new_size), Tag::new(new_size, false));
            } else {
                tag::write_tag(old_end, Tag::new(CHUNK, false));
                tag::write_tag(tag::footer_of(old_end, CHUNK), Tag::new(CHUNK, false));

                if self.policy == Policy::Explicit {
                    FreeListNode::push_front(&mut self.free_list_head, old_end.cast());
                }
            }

            tag::write_tag(new_heap_end, Tag::sentinel());
        }

        self.heap_end = new_heap_end;
        log::debug!("extend_heap: +{CHUNK} bytes, new end {:p}", new_heap_end);

        Ok(())
    }

    /// Hands whole trailing chunks back to the segment source if the free
    /// space at the tail reaches [`SHRINK_THRESHOLD`]. Not called
    /// automatically by `free`/`resize`; callers opt in explicitly.
    ///
    /// Releases `(tail_free / CHUNK) * CHUNK` bytes — the largest
    /// whole-chunk amount the trailing free block can give up while the
    /// invariant that every block is a positive multiple of [`ALIGN`]
    /// continues to hold for whatever (possibly zero-sized, in which case
    /// the block disappears entirely) remainder is left behind. Returns
    /// the number of bytes actually released, always a multiple of
    /// [`CHUNK`]; returns 0 if there's nothing to release or the segment
    /// source refuses, leaving the heap untouched either way.
    pub fn shrink_to_fit(&mut self) -> usize {
        self.require_initialized();

        // SAFETY: `heap_end` is always a valid end sentinel, so its
        // preceding footer is always a valid tag.
        let (tail_header, tail_free) = unsafe {
            let prev_footer = self.heap_end.wrapping_sub(WORD_SIZE);
            let prev_tag = tag::read_tag(prev_footer);
            if prev_tag.is_allocated() {
                (ptr::null_mut(), 0)
            } else {
                let size = prev_tag.size();
                (self.heap_end.wrapping_sub(size), size)
            }
        };

        if tail_free < SHRINK_THRESHOLD {
            return 0;
        }

        let release_amount = (tail_free / CHUNK) * CHUNK;
        if release_amount == 0 {
            return 0;
        }

        let new_acme = match self.source.release(release_amount) {
            Ok(acme) => acme,
            Err(_) => return 0,
        };

        let remainder = tail_free - release_amount;
        let new_heap_end = new_acme.as_ptr().wrapping_sub(SENTINEL_RESERVE);

        // SAFETY: `tail_header` is the valid header of the free block just
        // measured above; `new_heap_end` sits within the segment the
        // source just confirmed it still owns after releasing `release_amount`.
        unsafe {
            if remainder == 0 {
                if self.policy == Policy::Explicit {
                    FreeListNode::unlink(&mut self.free_list_head, tail_header.cast());
                }
            } else {
                tag::write_tag(tail_header, Tag::new(remainder, false));
                tag::write_tag(tag::footer_of(tail_header, remainder), Tag::new(remainder, false));
            }

            tag::write_tag(new_heap_end, Tag::sentinel());
        }

        self.heap_end = new_heap_end;
        log::debug!("shrink_to_fit: released {release_amount} bytes, new end {:p}", new_heap_end);

        release_amount
    }

    // SAFETY (for both of the following): `p` must be a payload pointer
    // previously returned by `allocate`/`resize`/`zero_allocate` on this
    // heap, and must not have already been freed.
    unsafe fn free_inner(&mut self, p: *mut u8) {
        let header = tag::header_from_payload(p);
        let tag = tag::read_tag(header);

        if !tag.is_allocated() {
            fatal(FatalError::DoubleFree);
        }

        let size = tag.size();
        if tag::read_tag(tag::footer_of(header, size)) != tag {
            fatal(FatalError::HeaderFooterMismatch);
        }

        let prev_tag = tag::read_tag(header.wrapping_sub(WORD_SIZE));
        let prev_free = !prev_tag.is_allocated();

        let next_header = header.add(size);
        let next_tag = tag::read_tag(next_header);
        let next_free = !next_tag.is_allocated();

        if self.policy == Policy::Explicit {
            if next_free {
                FreeListNode::unlink(&mut self.free_list_head, next_header.cast());
            }
            if prev_free {
                let prev_header = header.wrapping_sub(prev_tag.size());
                FreeListNode::unlink(&mut self.free_list_head, prev_header.cast());
            }
        }

        let mut new_header = header;
        let mut new_size = size;

        if prev_free {
            new_header = header.wrapping_sub(prev_tag.size());
            new_size += prev_tag.size();
        }
        if next_free {
            new_size += next_tag.size();
        }

        tag::write_tag(new_header, Tag::new(new_size, false));
        tag::write_tag(tag::footer_of(new_header, new_size), Tag::new(new_size, false));

        if self.policy == Policy::Explicit {
            FreeListNode::push_front(&mut self.free_list_head, new_header.cast());
        }

        log::trace!("free({p:p}), merged block size {new_size}");
    }

    unsafe fn resize_inner(&mut self, p: *mut u8, n: usize) -> *mut u8 {
        let header = tag::header_from_payload(p);
        let old_tag = tag::read_tag(header);
        debug_assert!(old_tag.is_allocated());

        let old_size = old_tag.size();
        let asize = ptr_utils::block_size_for_payload(n);

        if asize <= old_size {
            return self.resize_shrink(header, old_size, asize, p);
        }

        if let Some(grown) = self.resize_grow_into_next(header, old_size, asize) {
            return grown;
        }

        // relocate
        let new_ptr = self.allocate(n);
        if new_ptr.is_null() {
            return ptr::null_mut();
        }

        let copy_len = old_size - TAG_OVERHEAD;
        ptr::copy_nonoverlapping(p, new_ptr, copy_len);
        self.free_inner(p);

        log::trace!("resize({p:p}, {n}) -> {new_ptr:p} (relocated)");

        new_ptr
    }

    unsafe fn resize_shrink(
        &mut self,
        header: *mut u8,
        old_size: usize,
        asize: usize,
        p: *mut u8,
    ) -> *mut u8 {
        let remainder = old_size - asize;
        if remainder < MIN_BLOCK {
            return p;
        }

        // Written before any coalesce is attempted: the remainder's tag
        // must already be in place so the next-block check below reads a
        // consistent pair of neighbors.
        tag::write_tag(header, Tag::new(asize, true));
        tag::write_tag(tag::footer_of(header, asize), Tag::new(asize, true));

        let rem_header = header.add(asize);
        tag::write_tag(rem_header, Tag::new(remainder, false));
        tag::write_tag(tag::footer_of(rem_header, remainder), Tag::new(remainder, false));

        let next_header = rem_header.add(remainder);
        let next_tag = tag::read_tag(next_header);

        let final_size = if !next_tag.is_allocated() {
            if self.policy == Policy::Explicit {
                FreeListNode::unlink(&mut self.free_list_head, next_header.cast());
            }

            let merged = remainder + next_tag.size();
            tag::write_tag(rem_header, Tag::new(merged, false));
            tag::write_tag(tag::footer_of(rem_header, merged), Tag::new(merged, false));
            merged
        } else {
            remainder
        };

        if self.policy == Policy::Explicit {
            FreeListNode::push_front(&mut self.free_list_head, rem_header.cast());
        }

        log::trace!("resize: shrank {p:p} to {asize} bytes, {final_size} byte remainder freed");

        p
    }

    /// Attempts to absorb a free right-hand neighbor in place. Returns
    /// `Some` with the unchanged pointer on success, `None` if the
    /// neighbor isn't free or isn't large enough.
    unsafe fn resize_grow_into_next(
        &mut self,
        header: *mut u8,
        old_size: usize,
        asize: usize,
    ) -> Option<*mut u8> {
        let next_header = header.add(old_size);
        let next_tag = tag::read_tag(next_header);

        if next_tag.is_allocated() {
            return None;
        }

        let combined = old_size + next_tag.size();
        if combined < asize {
            return None;
        }

        if self.policy == Policy::Explicit {
            FreeListNode::unlink(&mut self.free_list_head, next_header.cast());
        }

        if combined - asize >= MIN_BLOCK {
            self.split_block(header, combined, asize);
        } else {
            tag::write_tag(header, Tag::new(combined, true));
            tag::write_tag(tag::footer_of(header, combined), Tag::new(combined, true));
        }

        log::trace!("resize: grew in place to {asize} bytes by absorbing neighbor");

        Some(tag::payload_ptr(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SbrkSegment;

    fn new_heap(policy: Policy) -> Heap<SbrkSegment> {
        let mut heap = Heap::new(SbrkSegment::new(CHUNK * 8));
        heap.initialize(policy).unwrap();
        heap
    }

    fn assert_invariants<S: SegmentSource>(heap: &Heap<S>) {
        heap.check();
    }

    #[test]
    fn scenario_1_init_and_allocate_all() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let usable = CHUNK - 2 * SENTINEL_RESERVE;
            let p = heap.allocate(usable - TAG_OVERHEAD);
            assert!(!p.is_null());
            assert_invariants(&heap);

            // exact fit: no growth, one allocated block spans the region
            assert_eq!(heap.heap_end as usize - heap.heap_start as usize, usable);
        }
    }

    #[test]
    fn scenario_2_split_and_coalesce_round_trip() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let before_start = heap.heap_start;
            let before_end = heap.heap_end;

            let a = heap.allocate(16);
            let b = heap.allocate(16);
            let c = heap.allocate(16);
            assert!(!a.is_null() && !b.is_null() && !c.is_null());
            assert_invariants(&heap);

            heap.free(b);
            assert_invariants(&heap);
            heap.free(a);
            assert_invariants(&heap);
            heap.free(c);
            assert_invariants(&heap);

            assert_eq!(heap.heap_start, before_start);
            assert_eq!(heap.heap_end, before_end);

            unsafe {
                let tag = tag::read_tag(heap.heap_start);
                assert!(!tag.is_allocated());
                assert_eq!(tag.size(), before_end as usize - before_start as usize);
            }
        }
    }

    #[test]
    fn scenario_3_growth_triggers_extend_heap() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let initial_end = heap.heap_end;

            let a = heap.allocate(60000);
            assert!(!a.is_null());
            assert_invariants(&heap);
            assert_eq!(heap.heap_end, initial_end);

            let b = heap.allocate(60000);
            assert!(!b.is_null());
            assert_invariants(&heap);
            assert!(heap.heap_end as usize > initial_end as usize);
        }
    }

    #[test]
    fn scenario_4_resize_shrink_in_place() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let a = heap.allocate(256);
            assert!(!a.is_null());

            let shrunk = heap.resize(a, 64);
            assert_eq!(shrunk, a);
            assert_invariants(&heap);
        }
    }

    #[test]
    fn scenario_5_resize_grows_into_free_neighbor() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let a = heap.allocate(64);
            let b = heap.allocate(64);
            assert!(!a.is_null() && !b.is_null());

            heap.free(b);
            assert_invariants(&heap);

            let grown = heap.resize(a, 120);
            assert_eq!(grown, a);
            assert_invariants(&heap);
        }
    }

    #[test]
    fn scenario_6_resize_relocates_when_neighbor_unavailable() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let a = heap.allocate(64);
            assert!(!a.is_null());
            unsafe {
                ptr::write_bytes(a, 0xAB, 64);
            }

            // block an in-place grow by allocating the immediate neighbor
            let c = heap.allocate(64);
            assert!(!c.is_null());

            let relocated = heap.resize(a, 1024);
            assert!(!relocated.is_null());
            assert_ne!(relocated, a);
            assert_invariants(&heap);

            unsafe {
                for i in 0..64 {
                    assert_eq!(*relocated.add(i), 0xAB);
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn scenario_7_double_free_aborts() {
        let mut heap = new_heap(Policy::Implicit);
        let a = heap.allocate(64);
        heap.free(a);
        heap.free(a);
    }

    #[test]
    fn scenario_8_zero_allocate_zeroes_payload() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let p = heap.allocate(80);
            assert!(!p.is_null());
            unsafe { ptr::write_bytes(p, 0xFF, 80) };
            heap.free(p);

            let p = heap.zero_allocate(10, 8);
            assert!(!p.is_null());
            unsafe {
                for i in 0..80 {
                    assert_eq!(*p.add(i), 0);
                }
            }
            assert_invariants(&heap);
        }
    }

    #[test]
    fn law_1_free_allocate_round_trip_is_bit_identical() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let usable = heap.heap_end as usize - heap.heap_start as usize;

            let before: std::vec::Vec<u8> =
                unsafe { core::slice::from_raw_parts(heap.heap_start, usable).to_vec() };

            let p = heap.allocate(128);
            assert!(!p.is_null());
            heap.free(p);
            assert_invariants(&heap);

            let after: std::vec::Vec<u8> =
                unsafe { core::slice::from_raw_parts(heap.heap_start, usable).to_vec() };
            assert_eq!(before, after);
        }
    }

    #[test]
    fn law_3_allocate_returns_aligned_pointer_with_enough_room() {
        let mut heap = new_heap(Policy::Implicit);
        let p = heap.allocate(100);
        assert!(!p.is_null());
        assert_eq!(p as usize % WORD_SIZE, 0);
    }

    #[test]
    fn law_2_resize_preserves_leading_bytes() {
        let mut heap = new_heap(Policy::Implicit);
        let p = heap.allocate(128);
        unsafe {
            for i in 0..128u8 {
                *p.add(i as usize) = i;
            }
        }

        let p = heap.resize(p, 32);
        unsafe {
            for i in 0..32u8 {
                assert_eq!(*p.add(i as usize), i);
            }
        }
    }

    #[test]
    fn allocate_zero_returns_null() {
        let mut heap = new_heap(Policy::Implicit);
        assert!(heap.allocate(0).is_null());
    }

    #[test]
    fn resize_null_is_allocate() {
        let mut heap = new_heap(Policy::Implicit);
        let p = heap.resize(ptr::null_mut(), 32);
        assert!(!p.is_null());
        assert_invariants(&heap);
    }

    #[test]
    fn resize_to_zero_is_free() {
        let mut heap = new_heap(Policy::Implicit);
        let p = heap.allocate(32);
        let r = heap.resize(p, 0);
        assert!(r.is_null());
        assert_invariants(&heap);
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        let mut heap = new_heap(Policy::Implicit);
        heap.free(ptr::null_mut());
        assert_invariants(&heap);
    }

    #[test]
    fn shrink_to_fit_releases_whole_trailing_chunks() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);

            // the sole initial free block is one chunk minus sentinel
            // reserves: above SHRINK_THRESHOLD, but short of a whole CHUNK
            // to give back, so nothing is released yet.
            assert_eq!(heap.shrink_to_fit(), 0);
            assert_invariants(&heap);

            // force growth, then free everything so the tail is all free.
            let a = heap.allocate(60000);
            let b = heap.allocate(60000);
            assert!(!a.is_null() && !b.is_null());
            let grown_end = heap.heap_end;
            heap.free(a);
            heap.free(b);
            assert_invariants(&heap);

            let released = heap.shrink_to_fit();
            assert!(released > 0);
            assert_eq!(released % CHUNK, 0);
            assert!((heap.heap_end as usize) < grown_end as usize);
            assert_invariants(&heap);

            // idempotent: nothing releasable left below another full chunk.
            assert_eq!(heap.shrink_to_fit(), 0);
        }
    }

    /// Exercises the `log::trace!`/`log::debug!` call sites this crate's
    /// operations and `check()` go through, with an actual subscriber
    /// (`env_logger`) installed so that output would render if
    /// `RUST_LOG`/`set_log_level` allowed it through, rather than only
    /// ever running against the default no-op logger.
    #[test]
    fn logging_is_wired_to_a_real_subscriber() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut heap = new_heap(Policy::Explicit);
        heap.set_log_level(log::LevelFilter::Trace);

        let p = heap.allocate(128);
        assert!(!p.is_null());
        heap.check();

        let grown = heap.allocate(60000);
        assert!(!grown.is_null());

        heap.free(p);
        heap.free(grown);
        heap.shrink_to_fit();
        assert_invariants(&heap);
    }

    #[test]
    fn fuzz_random_operations_preserve_invariants() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let mut heap = new_heap(policy);
            let mut live: std::vec::Vec<(*mut u8, usize)> = std::vec::Vec::new();
            let rng = fastrand::Rng::with_seed(42);

            for _ in 0..2000 {
                match rng.usize(0..3) {
                    0 => {
                        let n = rng.usize(1..=512);
                        let p = heap.allocate(n);
                        if !p.is_null() {
                            live.push((p, n));
                        }
                    }
                    1 if !live.is_empty() => {
                        let idx = rng.usize(0..live.len());
                        let (p, _) = live.swap_remove(idx);
                        heap.free(p);
                    }
                    2 if !live.is_empty() => {
                        let idx = rng.usize(0..live.len());
                        let n = rng.usize(1..=512);
                        let (p, _) = live[idx];
                        let new_p = heap.resize(p, n);
                        if !new_p.is_null() {
                            live[idx] = (new_p, n);
                        } else {
                            live.swap_remove(idx);
                        }
                    }
                    _ => {}
                }

                assert_invariants(&heap);
            }
        }
    }
}
