//! Home of [`Locked`], a mutex-wrapped [`Heap`] implementing `GlobalAlloc`
//! (and, behind `allocator_api`, `Allocator`). This is pure ambient
//! plumbing on top of the single-threaded core: the lock only serializes
//! callers, it does not change any of `Heap`'s own invariants.

use crate::{Heap, SegmentSource};

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

#[cfg(feature = "allocator")]
use core::alloc::AllocError;

/// `GlobalAlloc`'s contract hands over layouts with arbitrary alignment,
/// but every payload pointer this allocator returns is only guaranteed
/// aligned to `WORD_SIZE` (8 bytes) — blocks are 32-byte aligned, not
/// their payloads. Anything requesting stricter alignment than that is
/// refused rather than silently mis-aligned.
const MAX_SUPPORTED_ALIGN: usize = crate::WORD_SIZE;

/// A mutex-locked wrapper of [`Heap`].
///
/// # Example
/// ```
/// # use bound_tag_alloc::*;
/// let heap = Heap::new(SbrkSegment::new(1 << 20));
/// let locked = heap.lock::<spin::Mutex<()>>();
/// ```
pub struct Locked<R: lock_api::RawMutex, S: SegmentSource> {
    mutex: lock_api::Mutex<R, Heap<S>>,
}

impl<R: lock_api::RawMutex, S: SegmentSource> Locked<R, S> {
    /// Wraps an already-initialized `Heap` in a mutex.
    pub const fn new(heap: Heap<S>) -> Self {
        Self { mutex: lock_api::Mutex::new(heap) }
    }

    /// Locks the mutex and accesses the inner `Heap`.
    pub fn lock(&self) -> lock_api::MutexGuard<R, Heap<S>> {
        self.mutex.lock()
    }

    /// Tries to lock the mutex and access the inner `Heap`.
    pub fn try_lock(&self) -> Option<lock_api::MutexGuard<R, Heap<S>>> {
        self.mutex.try_lock()
    }

    /// Unwraps the inner `Heap`, consuming the lock.
    pub fn into_inner(self) -> Heap<S> {
        self.mutex.into_inner()
    }
}

impl<S: SegmentSource> Heap<S> {
    /// Wraps `self` in a [`Locked`] using [`lock_api`].
    ///
    /// # Examples
    /// ```
    /// # use bound_tag_alloc::*;
    /// use spin::Mutex;
    /// let heap = Heap::new(SbrkSegment::new(1 << 20));
    /// let locked = heap.lock::<Mutex<()>>();
    /// ```
    pub const fn lock<R: lock_api::RawMutex>(self) -> Locked<R, S> {
        Locked::new(self)
    }
}

// SAFETY: `Heap<S>` is internally unsynchronized, but every access is now
// gated by `mutex`, which only grants one accessor at a time.
unsafe impl<R: lock_api::RawMutex + Send, S: SegmentSource + Send> Send for Locked<R, S> {}
unsafe impl<R: lock_api::RawMutex + Sync, S: SegmentSource + Send> Sync for Locked<R, S> {}

unsafe impl<R: lock_api::RawMutex, S: SegmentSource> GlobalAlloc for Locked<R, S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return ptr::null_mut();
        }

        self.lock().allocate(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.lock().free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return ptr::null_mut();
        }

        self.lock().resize(ptr, new_size)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return ptr::null_mut();
        }

        self.lock().zero_allocate(1, layout.size())
    }
}

#[cfg(feature = "allocator")]
unsafe impl<R: lock_api::RawMutex, S: SegmentSource> core::alloc::Allocator for Locked<R, S> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(NonNull::dangling(), 0));
        }
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return Err(AllocError);
        }

        let ptr = self.lock().allocate(layout.size());
        let ptr = NonNull::new(ptr).ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        self.lock().free(ptr.as_ptr());
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() >= old_layout.size());
        self.shrink_or_grow(ptr, new_layout)
    }

    unsafe fn grow_zeroed(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        let grown = self.grow(ptr, old_layout, new_layout)?;
        grown
            .as_ptr()
            .cast::<u8>()
            .add(old_layout.size())
            .write_bytes(0, new_layout.size() - old_layout.size());
        Ok(grown)
    }

    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() <= old_layout.size());
        self.shrink_or_grow(ptr, new_layout)
    }
}

#[cfg(feature = "allocator")]
impl<R: lock_api::RawMutex, S: SegmentSource> Locked<R, S> {
    unsafe fn shrink_or_grow(
        &self,
        ptr: NonNull<u8>,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        if new_layout.align() > MAX_SUPPORTED_ALIGN {
            return Err(AllocError);
        }

        let new_ptr = self.lock().resize(ptr.as_ptr(), new_layout.size());
        let new_ptr = NonNull::new(new_ptr).ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(new_ptr, new_layout.size()))
    }
}
