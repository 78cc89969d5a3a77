//! The lower interface: a collaborator that owns the actual backing memory
//! and can grow it on request. Narrower than a plain OOM callback: this
//! trait describes exactly the three operations the allocator core ever
//! needs from whatever actually owns the bytes.

use core::ptr::NonNull;

/// Returned by [`SegmentSource::extend`] when the provider cannot grant the
/// requested growth. The caller maps this to [`crate::AllocatorError::OutOfMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentError;

/// A collaborator owning one contiguous region of memory that the allocator
/// carves into blocks.
///
/// Implementors are not required to be thread-safe; `Heap<S>` itself has no
/// internal synchronization, so neither does this trait.
pub trait SegmentSource {
    /// The current `[base, acme)` bounds of the segment this provider backs.
    /// Before the first successful [`extend`](Self::extend) this may be an
    /// empty (`base == acme`) range.
    fn segment_bounds(&self) -> (NonNull<u8>, NonNull<u8>);

    /// Grows the segment by exactly `n` bytes, returning the new acme.
    /// `n` is always [`crate::CHUNK`] in this crate's own calls, but
    /// implementors should not rely on that.
    fn extend(&mut self, n: usize) -> Result<NonNull<u8>, SegmentError>;

    /// The inverse of [`extend`](Self::extend): shrinks the segment by
    /// exactly `n` bytes from the acme end, returning the new acme. Only
    /// ever called by [`crate::Heap::shrink_to_fit`] with whole multiples
    /// of [`crate::CHUNK`] that the caller has already confirmed are
    /// trailing free space. Implementors that cannot hand memory back
    /// (e.g. a provider over memory it doesn't own) may always return
    /// `Err`; the allocator treats that as "nothing released" and leaves
    /// the heap untouched.
    fn release(&mut self, n: usize) -> Result<NonNull<u8>, SegmentError>;

    /// Informational page size, used only as a sanity check at
    /// [`crate::Heap::initialize`](crate::Heap::initialize) time.
    fn page_size(&self) -> usize;
}

/// A concrete, testable [`SegmentSource`] standing in for a real `sbrk`-like
/// provider: it owns one fixed-capacity, heap-allocated (via `std`) byte
/// buffer up front and exposes `extend` as a bump of a logical acme within
/// it, rather than touching real OS memory.
#[cfg(feature = "std")]
pub struct SbrkSegment {
    storage: std::boxed::Box<[u8]>,
    base: NonNull<u8>,
    acme: NonNull<u8>,
    page_size: usize,
}

#[cfg(feature = "std")]
impl SbrkSegment {
    /// Creates a provider whose backing storage can never exceed `capacity`
    /// bytes and starts out ungrown (`segment_bounds()` is empty).
    pub fn new(capacity: usize) -> Self {
        let mut storage = std::vec![0u8; capacity].into_boxed_slice();
        let base = NonNull::new(storage.as_mut_ptr()).expect("capacity must be non-zero");

        Self { storage, base, acme: base, page_size: 4096 }
    }
}

#[cfg(feature = "std")]
impl SegmentSource for SbrkSegment {
    fn segment_bounds(&self) -> (NonNull<u8>, NonNull<u8>) {
        (self.base, self.acme)
    }

    fn extend(&mut self, n: usize) -> Result<NonNull<u8>, SegmentError> {
        let used = self.acme.as_ptr() as usize - self.base.as_ptr() as usize;
        let grown = used + n;

        if grown > self.storage.len() {
            return Err(SegmentError);
        }

        // SAFETY: `grown <= self.storage.len()`, so this stays within the
        // single allocation `self.storage` owns.
        self.acme = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(grown)) };
        Ok(self.acme)
    }

    fn release(&mut self, n: usize) -> Result<NonNull<u8>, SegmentError> {
        let used = self.acme.as_ptr() as usize - self.base.as_ptr() as usize;
        if n > used {
            return Err(SegmentError);
        }

        // SAFETY: `n <= used`, so the new acme stays within
        // `[self.base, self.acme)`, itself inside `self.storage`.
        self.acme = unsafe { NonNull::new_unchecked(self.acme.as_ptr().sub(n)) };
        Ok(self.acme)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
