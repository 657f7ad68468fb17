//! Transactional put/consume handles (spec.md §4.4, §4.6, §6.1, §6.2).
//!
//! Both [`PutTransaction`] and [`ConsumeOperation`] are move-only and
//! cancel themselves on drop unless explicitly committed, so a panic or an
//! early `return` during construction/inspection never corrupts the queue
//! (spec.md invariant 7, "cancellation idempotence").

use crate::config::Config;
use crate::descriptor::RuntimeType;
use crate::external::ExternalBlock;
use crate::head::{ClaimedSlot, HeadEngine};
use crate::pool::PagePool;
use crate::progress::ProgressGuarantee;
use crate::stats::QueueStats;
use crate::tail::{Reservation, TailEngine};

/// An in-flight put. Drop without calling [`commit`](Self::commit) cancels
/// it: the slot is marked `DEAD`, any already-constructed element is
/// destroyed first, and any external block is freed (spec.md §9's
/// destruction order: element, then descriptor).
pub struct PutTransaction<'q, C: Config> {
    tail: &'q TailEngine<C>,
    pool: &'q PagePool,
    stats: &'q QueueStats,
    control_block_addr: usize,
    end_addr: usize,
    user_addr: usize,
    external: Option<ExternalBlock>,
    descriptor: Option<&'static dyn RuntimeType>,
    constructed: bool,
    finished: bool,
}

impl<'q, C: Config> PutTransaction<'q, C> {
    pub(crate) fn from_reservation(
        tail: &'q TailEngine<C>,
        pool: &'q PagePool,
        stats: &'q QueueStats,
        reservation: Reservation,
        descriptor: Option<&'static dyn RuntimeType>,
    ) -> Self {
        PutTransaction {
            tail,
            pool,
            stats,
            control_block_addr: reservation.control_block_addr,
            end_addr: reservation.end_addr,
            user_addr: reservation.user_addr,
            external: None,
            descriptor,
            constructed: false,
            finished: false,
        }
    }

    pub(crate) fn from_external(
        tail: &'q TailEngine<C>,
        pool: &'q PagePool,
        stats: &'q QueueStats,
        reservation: Reservation,
        descriptor: Option<&'static dyn RuntimeType>,
        external: ExternalBlock,
    ) -> Self {
        PutTransaction {
            tail,
            pool,
            stats,
            control_block_addr: reservation.control_block_addr,
            end_addr: reservation.end_addr,
            user_addr: reservation.user_addr,
            external: Some(external),
            descriptor,
            constructed: false,
            finished: false,
        }
    }

    /// Pointer to the element's storage: either inline in the page, or the
    /// heap block for an external put.
    pub fn element_ptr(&self) -> *mut u8 {
        match &self.external {
            Some(block) => block.ptr.as_ptr(),
            None => self.user_addr as *mut u8,
        }
    }

    pub fn complete_type(&self) -> Option<&'static dyn RuntimeType> {
        self.descriptor
    }

    /// Marks the element as constructed, so a cancellation (explicit or via
    /// drop) destroys it instead of leaving uninitialized memory alone.
    pub fn mark_constructed(&mut self) {
        self.constructed = true;
    }

    /// Reserves an additional `DEAD`-from-birth slot, for payloads that
    /// need more than one contiguous region (spec.md §4.7 "Raw-allocate").
    ///
    /// The returned pointer is only valid until the hosting page can next be
    /// swept past and recycled — a `DEAD` slot holds no pin of its own once
    /// this transaction commits, so the page beneath it is free to return to
    /// the pool (and be zeroed for reuse) the moment every *other* slot in
    /// that page has also been consumed. Callers must copy the bytes out
    /// (e.g. into the element that owns this blob's pointer) before any
    /// further consume on the queue, never hold onto the raw pointer across
    /// one.
    pub fn raw_allocate(&self, size: usize, align: usize, guarantee: ProgressGuarantee) -> Option<*mut u8> {
        self.tail.raw_allocate(self.pool, size, align, guarantee)
    }

    /// Finalizes the put, making the element visible to consumers.
    pub fn commit(mut self) {
        if self.external.is_some() {
            self.tail.commit_external(&self.as_reservation());
            self.stats.external_blocks.increase(1);
        } else {
            self.tail.commit(&self.as_reservation());
        }
        self.stats.elements.increase(1);
        self.finished = true;
    }

    /// Explicitly cancels the put. Equivalent to dropping without
    /// committing; provided for callers that want the intent visible at
    /// the call site.
    pub fn cancel(self) {
        // Drop does the work.
    }

    fn as_reservation(&self) -> Reservation {
        Reservation {
            control_block_addr: self.control_block_addr,
            type_offset: None,
            user_addr: self.user_addr,
            end_addr: self.end_addr,
        }
    }
}

impl<'q, C: Config> Drop for PutTransaction<'q, C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.constructed {
            if let Some(descriptor) = self.descriptor {
                unsafe { descriptor.destroy(self.element_ptr()) };
            }
        }
        if let Some(external) = self.external.take() {
            unsafe { external.free() };
        }
        self.tail.cancel(&self.as_reservation());
    }
}

/// A claimed-but-not-yet-finalized consume. Drop without calling
/// [`commit`](Self::commit) or [`commit_without_destroy`](Self::commit_without_destroy)
/// restores the slot to live/unclaimed (spec.md §4.6 "Cancel consume").
pub struct ConsumeOperation<'q> {
    head: &'q HeadEngine,
    pool: &'q PagePool,
    stats: Option<&'q QueueStats>,
    claimed: Option<ClaimedSlot>,
    element_ptr: *mut u8,
    external: Option<ExternalBlock>,
    descriptor: Option<&'static dyn RuntimeType>,
}

impl<'q> ConsumeOperation<'q> {
    pub(crate) fn new(
        head: &'q HeadEngine,
        pool: &'q PagePool,
        stats: &'q QueueStats,
        claimed: ClaimedSlot,
        element_ptr: *mut u8,
        external: Option<ExternalBlock>,
        descriptor: Option<&'static dyn RuntimeType>,
    ) -> Self {
        ConsumeOperation {
            head,
            pool,
            stats: Some(stats),
            claimed: Some(claimed),
            element_ptr,
            external,
            descriptor,
        }
    }

    pub fn element_ptr(&self) -> *mut u8 {
        self.element_ptr
    }

    pub fn complete_type(&self) -> Option<&'static dyn RuntimeType> {
        self.descriptor
    }

    /// Destroys the element, frees any external block, and retires the
    /// slot, sweeping `head` forward (spec.md §4.6 "Commit consume").
    pub fn commit(mut self) {
        if let Some(descriptor) = self.descriptor {
            unsafe { descriptor.destroy(self.element_ptr) };
        }
        self.finish_commit();
    }

    /// Like [`commit`](Self::commit), but does not run the element's
    /// destructor — used when iteration only wants to inspect elements in
    /// place (spec.md §4.7 "commit-without-destroy").
    pub fn commit_without_destroy(mut self) {
        self.finish_commit();
    }

    fn finish_commit(&mut self) {
        if let Some(external) = self.external.take() {
            unsafe { external.free() };
        }
        let claimed = self.claimed.take().expect("consume operation finished twice");
        let flags = claimed.flags;
        // `head.commit` takes the claim by value and drops its `PinGuard`
        // before sweeping, so the sweep never sees this consume's own pin
        // still held against the page it may need to release.
        self.head.commit(self.pool, claimed);
        if let Some(stats) = self.stats.take() {
            stats.elements.decrease(1);
            if flags & crate::layout::EXTERNAL != 0 {
                stats.external_blocks.decrease(1);
            }
        }
    }

    /// Explicitly releases the claim without consuming. Equivalent to
    /// dropping without committing.
    pub fn cancel(self) {}
}

impl<'q> Drop for ConsumeOperation<'q> {
    fn drop(&mut self) {
        if let Some(claimed) = self.claimed.take() {
            self.head.cancel(claimed);
        }
    }
}
