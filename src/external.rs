//! External blocks (spec.md §3.5, §4.3 step 6).
//!
//! For a put whose size exceeds [`crate::config::Config::MAX_INLINE_SIZE`],
//! the element is heap-allocated outside any page and a small descriptor
//! `{ptr, size, alignment}` is placed in an `EXTERNAL`-tagged in-page slot
//! (spec.md §3.5, §9 "Re-architecture guidance ... model this as a tagged
//! variant of slot contents"). Grounded on
//! `density/detail/array_impl.h`'s over-aligned external allocation path
//! (see `SPEC_FULL.md` §5).

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

/// The out-of-line descriptor stored inline in an `EXTERNAL` slot.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct ExternalBlock {
    pub ptr: NonNull<u8>,
    pub size: usize,
    pub align: usize,
}

impl ExternalBlock {
    /// Heap-allocates `size` bytes aligned to at least `align.max(word
    /// size)`, matching the original's treatment of over-aligned external
    /// allocations (`SPEC_FULL.md` §5).
    pub fn allocate(size: usize, align: usize) -> Option<ExternalBlock> {
        let align = align.max(std::mem::size_of::<usize>());
        let layout = Layout::from_size_align(size, align).ok()?;
        let ptr = unsafe { alloc(layout) };
        let ptr = NonNull::new(ptr)?;
        Some(ExternalBlock { ptr, size, align })
    }

    fn layout(&self) -> Layout {
        Layout::from_size_align(self.size, self.align.max(std::mem::size_of::<usize>()))
            .unwrap_or_else(|_| handle_alloc_error(Layout::new::<u8>()))
    }

    /// Frees the heap block. Does not run the element's destructor; the
    /// caller (the head state machine) must destroy the element first, per
    /// spec.md §4.6 "If EXTERNAL, free the heap block first" (ordering
    /// is: element destroyed, *then* the block freed — this call is the
    /// second half).
    ///
    /// # Safety
    /// The element previously stored at `self.ptr` must already be
    /// destroyed (or never have been fully constructed), and this
    /// `ExternalBlock` must not be used again afterwards.
    pub unsafe fn free(&self) {
        dealloc(self.ptr.as_ptr(), self.layout());
    }
}
