//! The queue façade (spec.md §4.7, §6.1–§6.3, L4).
//!
//! Ties the tail engine, head engine, page pool, and descriptor registry
//! together into the heterogeneous FIFO the rest of the crate exists to
//! provide. This is the only module most callers need.

use std::marker::PhantomData;
use std::mem::ManuallyDrop;

use crate::config::{Config, DefaultConfig};
use crate::descriptor::{descriptor_of, descriptor_of_cloneable, RuntimeType, TypeHandle};
use crate::error::{PageQueueError, Result};
use crate::external::ExternalBlock;
use crate::head::HeadEngine;
use crate::layout;
use crate::pool::PagePool;
use crate::progress::ProgressGuarantee;
use crate::stats::QueueStats;
use crate::tail::{Reservation, TailEngine};
use crate::transaction::{ConsumeOperation, PutTransaction};

/// A heterogeneous, lock-free-capable FIFO queue (spec.md §2 "Overview").
///
/// `C` selects the build-time tuning (page size, producer/consumer
/// cardinality, memory-order profile); see [`crate::config::Config`] and
/// its provided markers. Most callers want [`Queue::new`], which defaults
/// to [`DefaultConfig`].
pub struct Queue<C: Config = DefaultConfig> {
    pool: PagePool,
    tail: TailEngine<C>,
    head: HeadEngine,
    stats: QueueStats,
    _cfg: PhantomData<C>,
}

impl<C: Config> Queue<C> {
    pub fn new() -> Self {
        log::debug!(
            "creating queue: page_size={}, max_inline_size={}",
            C::PAGE_SIZE,
            C::MAX_INLINE_SIZE
        );
        Queue {
            pool: PagePool::new(C::PAGE_SIZE),
            tail: TailEngine::new(),
            head: HeadEngine::new(),
            stats: QueueStats::new(),
            _cfg: PhantomData,
        }
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Number of pages currently checked out of this queue's page pool
    /// (linked into the chain or awaiting reclaim), for invariant checks
    /// (spec.md §8 invariant 4, "no leaks").
    pub fn pages_in_use(&self) -> i64 {
        self.pool.pages_in_use()
    }

    /// Pre-reserves page capacity ahead of a burst of puts (spec.md §4.1
    /// "reserve"), so later `blocking`/`lock_free` puts are less likely to
    /// need to reach the OS at all.
    pub fn reserve_capacity(&self, guarantee: ProgressGuarantee, bytes: usize) -> usize {
        self.pool_reserve(guarantee, bytes)
    }

    fn pool_reserve(&self, guarantee: ProgressGuarantee, bytes: usize) -> usize {
        // Delegated through the pool's own source so freshly reserved
        // pages are immediately available to `acquire`.
        let mut reserved = 0;
        while reserved < bytes {
            match self.pool.acquire(guarantee) {
                Some(page) => {
                    self.pool.release(page);
                    reserved += self.pool.page_size();
                }
                None => break,
            }
        }
        reserved
    }

    // ---------------------------------------------------------------
    // Producer operations
    // ---------------------------------------------------------------

    /// Moves `value` onto the queue, blocking (retrying / reaching the OS
    /// as needed) until it fits. Panics only if the operating system
    /// itself refuses to grow — the same contract as `Vec::push`.
    pub fn push<T: Send + Sync + 'static>(&self, value: T) {
        self.try_push(value, ProgressGuarantee::Blocking)
            .expect("blocking push observed an allocation failure")
            .then_some(())
            .expect("blocking push was unexpectedly declined");
    }

    /// Attempts to push `value` under the given progress guarantee.
    /// `Ok(true)` means the element is now visible to consumers; `Ok(false)`
    /// means the hint declined the operation (no OS call / no help
    /// permitted) without modifying the queue; `Err` is only possible under
    /// [`ProgressGuarantee::Throwing`].
    pub fn try_push<T: Send + Sync + 'static>(&self, value: T, guarantee: ProgressGuarantee) -> Result<bool> {
        let descriptor = descriptor_of::<T>();
        match self.start_push_for(descriptor, guarantee)? {
            Some(mut txn) => {
                unsafe { (txn.element_ptr() as *mut T).write(value) };
                txn.mark_constructed();
                txn.commit();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like [`try_push`](Self::try_push), but defers constructing the
    /// value until space has actually been reserved (spec.md §4.7
    /// "Emplace"), useful when building `T` is expensive and should not
    /// happen on a path that might be declined anyway.
    pub fn try_emplace<T: Send + Sync + 'static>(
        &self,
        guarantee: ProgressGuarantee,
        ctor: impl FnOnce() -> T,
    ) -> Result<bool> {
        let descriptor = descriptor_of::<T>();
        match self.start_push_for(descriptor, guarantee)? {
            Some(mut txn) => {
                unsafe { (txn.element_ptr() as *mut T).write(ctor()) };
                txn.mark_constructed();
                txn.commit();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pushes a copy of `*value` through the type-erased `copy_construct`
    /// primitive (spec.md §4.8), rather than cloning up front and moving
    /// the clone. Fails with [`PageQueueError::DescriptorFeatureMissing`]
    /// only if the descriptor registry entry for `T` somehow lacks
    /// copy-construction, which cannot happen via [`descriptor_of_cloneable`].
    pub fn dyn_push_copy<T: Clone + Send + Sync + 'static>(&self, value: &T, guarantee: ProgressGuarantee) -> Result<bool> {
        let descriptor = descriptor_of_cloneable::<T>();
        match self.start_push_for(descriptor, guarantee)? {
            Some(mut txn) => {
                let ok = unsafe { descriptor.copy_construct(txn.element_ptr(), value as *const T as *const u8) };
                if !ok {
                    return Err(PageQueueError::DescriptorFeatureMissing {
                        type_name: descriptor.type_name(),
                        operation: "copy_construct",
                    });
                }
                txn.mark_constructed();
                txn.commit();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pushes `value` by relocating its bytes via the type-erased
    /// `move_construct` primitive, leaving `value` logically moved-from
    /// (the caller must not use it again; it is the caller's
    /// responsibility to avoid a double-drop, typically by discarding the
    /// `ManuallyDrop` afterwards).
    pub fn dyn_push_move<T: Send + Sync + 'static>(
        &self,
        value: &mut ManuallyDrop<T>,
        guarantee: ProgressGuarantee,
    ) -> Result<bool> {
        let descriptor = descriptor_of::<T>();
        match self.start_push_for(descriptor, guarantee)? {
            Some(mut txn) => {
                unsafe { descriptor.move_construct(txn.element_ptr(), value as *mut ManuallyDrop<T> as *mut u8) };
                txn.mark_constructed();
                txn.commit();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Opens a manual put transaction for `T` without writing a value,
    /// for callers that want to construct the element in place (spec.md
    /// §6.1 "start_push" / "reentrant put"). The caller must call
    /// [`PutTransaction::mark_constructed`] once the element is written,
    /// then [`PutTransaction::commit`]; dropping without committing
    /// cancels cleanly.
    pub fn start_push<T: Send + Sync + 'static>(&self, guarantee: ProgressGuarantee) -> Result<Option<PutTransaction<'_, C>>> {
        self.start_push_for(descriptor_of::<T>(), guarantee)
    }

    fn start_push_for(&self, descriptor: &'static dyn RuntimeType, guarantee: ProgressGuarantee) -> Result<Option<PutTransaction<'_, C>>> {
        let size = descriptor.size();
        let align = descriptor.align();

        // An alignment this large can never be satisfied in-page: the page
        // header occupies the first few bytes of every page, so rounding up
        // to `align >= MAX_INLINE_SIZE` always lands past the end-of-page
        // sentinel on every page, not just the current one (it would retry
        // the page-overflow path forever). Route straight to the heap,
        // where the allocator can honor any alignment directly.
        if size > C::MAX_INLINE_SIZE || align > C::MAX_INLINE_SIZE {
            return self.start_push_external(descriptor, guarantee);
        }

        match self.tail.reserve(&self.pool, size, align, true, guarantee) {
            Some(reservation) => {
                self.write_type_handle(&reservation, descriptor);
                Ok(Some(PutTransaction::from_reservation(&self.tail, &self.pool, &self.stats, reservation, Some(descriptor))))
            }
            None => self.decline_or_fail(guarantee),
        }
    }

    fn start_push_external(&self, descriptor: &'static dyn RuntimeType, guarantee: ProgressGuarantee) -> Result<Option<PutTransaction<'_, C>>> {
        let external = match ExternalBlock::allocate(descriptor.size(), descriptor.align()) {
            Some(block) => block,
            None => return self.decline_or_fail(guarantee),
        };

        match self.tail.reserve_external(&self.pool, true, guarantee) {
            Some(reservation) => {
                self.write_type_handle(&reservation, descriptor);
                unsafe { (reservation.user_addr as *mut ExternalBlock).write(external) };
                Ok(Some(PutTransaction::from_external(&self.tail, &self.pool, &self.stats, reservation, Some(descriptor), external)))
            }
            None => {
                unsafe { external.free() };
                self.decline_or_fail(guarantee)
            }
        }
    }

    fn write_type_handle(&self, reservation: &Reservation, descriptor: &'static dyn RuntimeType) {
        if let Some(offset) = reservation.type_offset {
            unsafe { (offset as *mut TypeHandle).write(TypeHandle(descriptor)) };
        }
    }

    fn decline_or_fail<R>(&self, guarantee: ProgressGuarantee) -> Result<Option<R>> {
        if guarantee.reports_failure() {
            Err(PageQueueError::AllocationFailure)
        } else {
            Ok(None)
        }
    }

    // ---------------------------------------------------------------
    // Consumer operations
    // ---------------------------------------------------------------

    /// Claims the next element without destroying it, for inspection
    /// (spec.md §4.6 "Claim"). The caller must eventually call
    /// [`ConsumeOperation::commit`] or
    /// [`ConsumeOperation::commit_without_destroy`], or drop it to cancel.
    pub fn try_start_consume(&self, guarantee: ProgressGuarantee) -> Option<ConsumeOperation<'_>> {
        let claimed = self.head.try_claim(&self.pool, self.tail.first_slot(), guarantee)?;
        let is_external = HeadEngine::is_external(&claimed);

        let descriptor = {
            let addr = layout::type_handle_addr(claimed.control_block_addr);
            let handle = unsafe { *(addr as *const TypeHandle) };
            Some(handle.as_runtime_type())
        };

        if is_external {
            let storage_addr = layout::user_storage_addr(claimed.control_block_addr, std::mem::align_of::<ExternalBlock>());
            let external = unsafe { *(storage_addr as *const ExternalBlock) };
            Some(ConsumeOperation::new(&self.head, &self.pool, &self.stats, claimed, external.ptr.as_ptr(), Some(external), descriptor))
        } else {
            let align = descriptor.map(|d| d.align()).unwrap_or(1);
            let storage_addr = layout::user_storage_addr(claimed.control_block_addr, align);
            Some(ConsumeOperation::new(&self.head, &self.pool, &self.stats, claimed, storage_addr as *mut u8, None, descriptor))
        }
    }

    /// Pops and returns a `T`, blocking as needed. Returns `None` if the
    /// queue is empty, or if the next element is not a `T` (a mismatched
    /// pop never consumes the element — it is left in place for whoever
    /// asks for the right type, matching spec.md §6.2's non-destructive
    /// type check).
    pub fn try_pop<T: Send + Sync + 'static>(&self, guarantee: ProgressGuarantee) -> Option<T> {
        let op = self.try_start_consume(guarantee)?;
        let matches = op
            .complete_type()
            .map(|d| d.type_id() == std::any::TypeId::of::<T>())
            .unwrap_or(false);
        if !matches {
            op.cancel();
            return None;
        }
        let value = unsafe { std::ptr::read(op.element_ptr() as *const T) };
        op.commit_without_destroy();
        Some(value)
    }

    /// Returns true once no more elements are currently visible. Racy by
    /// nature in a concurrent queue: useful for diagnostics, not for
    /// synchronization.
    pub fn is_empty_hint(&self) -> bool {
        self.stats.elements.current() <= 0
    }
}

impl<C: Config> Default for Queue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> Drop for Queue<C> {
    /// Destroys every element still queued (invariant 4, "no leaks" —
    /// spec.md §8). At this point `&mut self` guarantees no other thread
    /// can be mid-`reserve`/mid-`claim`, so `head`/`tail` are quiescent and
    /// every slot between them is either `DEAD` or a live, fully committed
    /// element; pages themselves are never returned to the OS (spec.md §9
    /// "Global state"), only their element destructors run here.
    fn drop(&mut self) {
        let mut current = self.head.raw_head();
        if current == 0 {
            current = self.tail.first_slot();
        }
        let end = self.tail.raw_tail();

        while current != 0 && current != end {
            let cb = unsafe { crate::layout::ControlBlock::at(current) };
            let word = cb.load(std::sync::atomic::Ordering::Acquire);
            if word == 0 {
                break;
            }
            let next = crate::layout::next_addr(word);

            if !crate::layout::has_flag(word, crate::layout::DEAD) {
                let descriptor_addr = layout::type_handle_addr(current);
                let handle = unsafe { *(descriptor_addr as *const TypeHandle) };
                let descriptor = handle.as_runtime_type();

                if crate::layout::has_flag(word, crate::layout::EXTERNAL) {
                    let storage = layout::user_storage_addr(current, std::mem::align_of::<ExternalBlock>());
                    let external = unsafe { *(storage as *const ExternalBlock) };
                    unsafe {
                        descriptor.destroy(external.ptr.as_ptr());
                        external.free();
                    }
                } else {
                    let storage = layout::user_storage_addr(current, descriptor.align());
                    unsafe { descriptor.destroy(storage as *mut u8) };
                }
            }

            current = next;
        }
    }
}

unsafe impl<C: Config> Send for Queue<C> {}
unsafe impl<C: Config> Sync for Queue<C> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultConfig;

    #[test]
    fn single_threaded_fifo_roundtrip() {
        let queue: Queue<DefaultConfig> = Queue::new();
        queue.push(1i32);
        queue.push(2i32);
        queue.push(3i32);
        assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), Some(1));
        assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), Some(2));
        assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), Some(3));
        assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), None);
    }

    #[test]
    fn heterogeneous_elements_round_trip_in_order() {
        let queue: Queue<DefaultConfig> = Queue::new();
        queue.push(42i32);
        queue.push(String::from("hello"));
        queue.push(3.5f64);

        assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), Some(42));
        assert_eq!(queue.try_pop::<String>(ProgressGuarantee::Blocking), Some("hello".to_string()));
        assert_eq!(queue.try_pop::<f64>(ProgressGuarantee::Blocking), Some(3.5));
    }

    #[test]
    fn external_block_round_trips_byte_for_byte() {
        let queue: Queue<DefaultConfig> = Queue::new();
        let payload: Vec<u8> = (0..5000u32).map(|i| (i as u8).wrapping_mul(37)).collect();
        queue.push(payload.clone());
        let popped = queue.try_pop::<Vec<u8>>(ProgressGuarantee::Blocking).unwrap();
        assert_eq!(popped, payload);
    }

    #[test]
    fn cancelled_put_leaves_other_elements_intact() {
        let queue: Queue<DefaultConfig> = Queue::new();
        queue.push(1i32);
        {
            let txn = queue.start_push::<i32>(ProgressGuarantee::Blocking).unwrap().unwrap();
            drop(txn); // cancel without marking constructed
        }
        queue.push(2i32);
        assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), Some(1));
        assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), Some(2));
    }

    #[test]
    fn mismatched_pop_type_leaves_element_for_later() {
        let queue: Queue<DefaultConfig> = Queue::new();
        queue.push(7i64);
        assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), None);
        assert_eq!(queue.try_pop::<i64>(ProgressGuarantee::Blocking), Some(7));
    }

    #[test]
    fn page_overflow_preserves_order_across_many_elements() {
        let queue: Queue<DefaultConfig> = Queue::new();
        for i in 0..2000u32 {
            queue.push(i);
        }
        for i in 0..2000u32 {
            assert_eq!(queue.try_pop::<u32>(ProgressGuarantee::Blocking), Some(i));
        }
    }

    #[test]
    fn drop_runs_destructors_for_elements_still_in_queue() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        {
            let queue: Queue<DefaultConfig> = Queue::new();
            queue.push(DropCounter(count.clone()));
            queue.push(DropCounter(count.clone()));
            let popped = queue.try_pop::<DropCounter>(ProgressGuarantee::Blocking);
            assert_eq!(count.load(Ordering::SeqCst), 0);
            drop(popped); // the popped element's own drop
            assert_eq!(count.load(Ordering::SeqCst), 1);
            // `queue` drops here, destroying the one element still queued.
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
