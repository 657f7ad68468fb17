//! Tail state machine — producer side (spec.md §4.4, §4.5, L3).
//!
//! One engine serves every [`crate::config::ProducerCardinality`]: the
//! atomic protocol below is safe under concurrent producers, and a
//! single-producer queue is simply a degenerate case of it with no
//! contention (see `DESIGN.md` for why this crate does not duplicate a
//! separate non-atomic bump allocator for the single-producer
//! specialisation spec.md §4.5 describes).
//!
//! # The `tail` word
//!
//! `tail` holds one of:
//! - `0` — virgin, no page has ever been allocated.
//! - `addr` (granularity-aligned) — quiescent; `addr` is the next
//!   candidate control block.
//! - `addr | RESERVING` — a producer is between claiming slot `addr` and
//!   publishing its control block; the claiming producer (or a helper) is
//!   about to write `addr`'s control block and then finalize `tail`.
//!
//! This is a one-bit simplification of the spec's "residual unit count"
//! encoding (spec.md §4.4): rather than packing the reserved byte count
//! into `tail`'s low bits (which only works if every reservation is
//! smaller than the granularity, an assumption that does not hold for
//! realistic element sizes), a helper chases the real value by polling the
//! claimed control block's own `next` word until the claiming producer (or
//! another helper) publishes it. See `DESIGN.md` for the full rationale.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::Config;
use crate::layout::{self, next_addr, pack, reserve_slot, ControlBlock, SlotLayout, BUSY, DEAD, EXTERNAL};
use crate::pool::PagePool;
use crate::progress::ProgressGuarantee;

const RESERVING: usize = 1;

/// Bound on the helper/spin loop, so a `lock_free`/`blocking` caller never
/// spins on a genuinely stuck peer forever even though the algorithm is,
/// in principle, lock-free. See the module doc and `DESIGN.md`.
const HELP_SPIN_LIMIT: u32 = 100_000;

/// A slot reserved but not yet committed or cancelled.
pub struct Reservation {
    pub control_block_addr: usize,
    pub type_offset: Option<usize>,
    pub user_addr: usize,
    pub end_addr: usize,
}

pub struct TailEngine<C: Config> {
    tail: AtomicUsize,
    /// Address of the very first slot ever handed out, set once by
    /// whichever producer wins the virgin-queue race. Lets a consumer that
    /// arrives before `head` has been initialized know exactly where the
    /// chain begins, resolving spec.md §9's open question about the
    /// "initial page" window: until this is set, the queue is provably
    /// empty; once set, it names the unique correct starting point.
    first_slot: AtomicUsize,
    _cfg: std::marker::PhantomData<C>,
}

impl<C: Config> TailEngine<C> {
    pub fn new() -> Self {
        TailEngine {
            tail: AtomicUsize::new(0),
            first_slot: AtomicUsize::new(0),
            _cfg: std::marker::PhantomData,
        }
    }

    pub fn first_slot(&self) -> usize {
        self.first_slot.load(Ordering::Acquire)
    }

    /// The current tail address, for use only where exclusive access to
    /// the queue is already guaranteed (its `Drop` impl, which walks
    /// `first_slot..tail` to destroy any elements still queued).
    pub(crate) fn raw_tail(&self) -> usize {
        self.tail.load(Ordering::Acquire) & !RESERVING
    }

    /// Reserves space for a slot of `size`/`align`, optionally carrying an
    /// inline type handle. Returns `None` under a non-blocking hint that
    /// cannot be honored, or on genuine OS exhaustion.
    pub fn reserve(
        &self,
        pool: &PagePool,
        size: usize,
        align: usize,
        include_type: bool,
        guarantee: ProgressGuarantee,
    ) -> Option<Reservation> {
        loop {
            let t = self.tail.load(Ordering::Acquire);

            if t & RESERVING != 0 {
                self.help(pool, t, guarantee)?;
                continue;
            }

            if t == 0 {
                let new_base = self.get_or_link_next_page(pool, 0, guarantee)?;
                let _ = self.tail.compare_exchange(
                    0,
                    new_base,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }

            let page_base = layout::page_base_of(t, pool.page_size());
            let cursor_offset = t - page_base;
            let end_of_page_offset = C::END_OF_PAGE_OFFSET;

            if cursor_offset == end_of_page_offset {
                let new_base = self.get_or_link_next_page(pool, t, guarantee)?;
                let _ = self.tail.compare_exchange(t, new_base, Ordering::AcqRel, Ordering::Acquire);
                continue;
            }

            match reserve_slot(cursor_offset, end_of_page_offset, size, align, include_type) {
                Some(slot) => {
                    if self
                        .tail
                        .compare_exchange_weak(t, t | RESERVING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        continue;
                    }
                    return Some(self.publish_slot(page_base, t, slot, BUSY));
                }
                None => {
                    // Page overflow: pad the remainder of this page as DEAD
                    // and push tail to the end-of-page sentinel.
                    if self
                        .tail
                        .compare_exchange_weak(t, t | RESERVING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        continue;
                    }
                    let end_addr = page_base + end_of_page_offset;
                    let cb = unsafe { ControlBlock::at(t) };
                    cb.next.store(pack(end_addr, DEAD), Ordering::Release);
                    let _ = self.tail.compare_exchange(t | RESERVING, end_addr, Ordering::AcqRel, Ordering::Acquire);
                    continue;
                }
            }
        }
    }

    /// Finishes a claimed reservation: writes the control block (with
    /// `flags`, typically `BUSY`) and finalizes `tail`.
    fn publish_slot(&self, page_base: usize, claimed_at: usize, slot: SlotLayout, flags: usize) -> Reservation {
        let end_addr = page_base + slot.end_offset;
        let cb = unsafe { ControlBlock::at(claimed_at) };
        cb.next.store(pack(end_addr, flags), Ordering::Release);
        let _ = self.tail.compare_exchange(
            claimed_at | RESERVING,
            end_addr,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.first_slot.compare_exchange(0, claimed_at, Ordering::AcqRel, Ordering::Acquire);
        Reservation {
            control_block_addr: claimed_at,
            type_offset: slot.type_offset.map(|o| page_base + o),
            user_addr: page_base + slot.user_offset,
            end_addr,
        }
    }

    /// Reserves an in-page slot sized to hold an [`crate::external::ExternalBlock`]
    /// descriptor, for a put whose real payload is too large to live
    /// in-page (spec.md §4.3 step 6). The caller (the façade) decides when
    /// this path applies and owns the heap allocation itself; this only
    /// carves out the small in-page descriptor slot, exactly like
    /// [`Self::reserve`] would for any other fixed-size payload.
    pub fn reserve_external(&self, pool: &PagePool, include_type: bool, guarantee: ProgressGuarantee) -> Option<Reservation> {
        let descriptor_size = std::mem::size_of::<crate::external::ExternalBlock>();
        let descriptor_align = std::mem::align_of::<crate::external::ExternalBlock>();
        self.reserve(pool, descriptor_size, descriptor_align, include_type, guarantee)
    }

    /// Assists (or waits out) a producer whose reservation is in flight.
    /// Returns `Some(())` once the situation has changed (caller should
    /// reload `tail` and retry), or `None` if the hint forbids helping or
    /// the bounded spin gave up.
    fn help(&self, pool: &PagePool, t: usize, guarantee: ProgressGuarantee) -> Option<()> {
        if !guarantee.may_help() {
            return None;
        }
        let addr = next_addr(t);
        let _pin = pool.try_pin(addr, guarantee)?;
        if self.tail.load(Ordering::Acquire) != t {
            return Some(());
        }
        let cb = unsafe { ControlBlock::at(addr) };
        for _ in 0..HELP_SPIN_LIMIT {
            let word = cb.load(Ordering::Acquire);
            if word != 0 {
                let new_tail = next_addr(word);
                let _ = self.tail.compare_exchange(t, new_tail, Ordering::AcqRel, Ordering::Acquire);
                return Some(());
            }
            std::hint::spin_loop();
        }
        None
    }

    fn get_or_link_next_page(&self, pool: &PagePool, end_addr_or_zero: usize, guarantee: ProgressGuarantee) -> Option<usize> {
        if end_addr_or_zero == 0 {
            let page = pool.acquire(guarantee)?;
            return Some(page.as_ptr() as usize + PagePool::header_reserved());
        }

        let _pin = pool.try_pin(end_addr_or_zero, guarantee)?;
        let cb = unsafe { ControlBlock::at(end_addr_or_zero) };
        let word = cb.load(Ordering::Acquire);
        if word != 0 {
            return Some(next_addr(word));
        }

        let page: NonNull<u8> = pool.acquire(guarantee)?;
        let new_base = page.as_ptr() as usize + PagePool::header_reserved();
        match cb.next.compare_exchange(0, pack(new_base, DEAD), Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Some(new_base),
            Err(actual) => {
                pool.release(page);
                Some(next_addr(actual))
            }
        }
    }

    /// Commits a reservation: clears `BUSY`, making the element visible to
    /// consumers (spec.md §4.4 "Commit").
    pub fn commit(&self, reservation: &Reservation) {
        let cb = unsafe { ControlBlock::at(reservation.control_block_addr) };
        cb.next.store(pack(reservation.end_addr, 0), Ordering::Release);
    }

    /// Commits a reservation whose user storage holds an
    /// [`crate::external::ExternalBlock`] descriptor rather than the
    /// element itself: clears `BUSY` but keeps `EXTERNAL` set, so the
    /// consumer side knows to free the heap block after destroying the
    /// element (spec.md §4.6 "If `EXTERNAL`, free the heap block").
    pub fn commit_external(&self, reservation: &Reservation) {
        let cb = unsafe { ControlBlock::at(reservation.control_block_addr) };
        cb.next.store(pack(reservation.end_addr, EXTERNAL), Ordering::Release);
    }

    /// Cancels a reservation: marks the slot `DEAD`. The caller is
    /// responsible for destroying any partially-constructed element and
    /// type handle *before* calling this (spec.md §9's destruction order:
    /// element first, then descriptor).
    pub fn cancel(&self, reservation: &Reservation) {
        let cb = unsafe { ControlBlock::at(reservation.control_block_addr) };
        cb.next.store(pack(reservation.end_addr, DEAD), Ordering::Release);
    }

    /// Reserves and immediately finalizes a `DEAD` slot for a raw
    /// allocation appended to an in-flight transaction (spec.md §4.7
    /// "Raw-allocate"): the slot never carries a live element, so it can
    /// be marked terminal the instant it is reserved instead of waiting
    /// for the owning transaction's commit. Because it is `DEAD` from
    /// birth, it holds no pin of its own: the returned pointer is only
    /// good until its page is next swept past and recycled, so callers
    /// must copy its contents out before any further consume.
    pub fn raw_allocate(&self, pool: &PagePool, size: usize, align: usize, guarantee: ProgressGuarantee) -> Option<*mut u8> {
        let reservation = self.reserve(pool, size, align, false, guarantee)?;
        self.cancel(&reservation);
        Some(reservation.user_addr as *mut u8)
    }
}
