//! Head state machine — consumer side (spec.md §4.6, L3).
//!
//! Mirrors [`crate::tail`]: one engine serves every
//! [`crate::config::ConsumerCardinality`]. Walking, claiming, and the
//! page-reclaim sweep are all expressed as plain CAS loops over `head`;
//! the only other shared mutable state touched is the [`PagePool`] itself.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::layout::{self, flags_of, has_flag, next_addr, pack, ControlBlock, BUSY, DEAD, EXTERNAL};
use crate::pool::{PagePool, PinGuard};
use crate::progress::ProgressGuarantee;

/// A slot successfully claimed for consumption but not yet committed or
/// cancelled. Holds the page pin alive for as long as the caller may still
/// dereference the element.
pub struct ClaimedSlot {
    pub control_block_addr: usize,
    pub next_addr: usize,
    pub flags: usize,
    pub _pin: PinGuard,
}

pub struct HeadEngine {
    head: AtomicUsize,
}

impl HeadEngine {
    pub fn new() -> Self {
        HeadEngine {
            head: AtomicUsize::new(0),
        }
    }

    /// Attempts to claim the next live, uncommitted-consume slot. Returns
    /// `None` if the queue is empty, the next slot is still mid-put, or the
    /// hint forbids the work needed to find out (spec.md §4.6 "Claim").
    pub fn try_claim(&self, pool: &PagePool, first_slot: usize, guarantee: ProgressGuarantee) -> Option<ClaimedSlot> {
        loop {
            let mut h = self.head.load(Ordering::Acquire);

            if h == 0 {
                if first_slot == 0 {
                    return None;
                }
                match self.head.compare_exchange(0, first_slot, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => h = first_slot,
                    Err(actual) => h = actual,
                }
            }

            let pin = pool.try_pin(h, guarantee)?;
            if self.head.load(Ordering::Acquire) != h {
                continue;
            }

            let cb = unsafe { ControlBlock::at(h) };
            let word = cb.load(Ordering::Acquire);
            if word == 0 {
                // Reserved by a producer but not yet published: nothing to
                // consume yet.
                return None;
            }

            let next = next_addr(word);

            if has_flag(word, DEAD) {
                let _ = self.head.compare_exchange(h, next, Ordering::AcqRel, Ordering::Acquire);
                continue;
            }

            if has_flag(word, BUSY) {
                // Either still mid-put, or another consumer already claimed
                // it. Either way this consumer cannot skip ahead of it.
                return None;
            }

            let flags = flags_of(word);
            let claimed_word = pack(next, flags | BUSY);
            match cb.next.compare_exchange(word, claimed_word, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return Some(ClaimedSlot {
                        control_block_addr: h,
                        next_addr: next,
                        flags,
                        _pin: pin,
                    });
                }
                Err(_) => continue,
            }
        }
    }

    /// Finalizes a successful consume: marks the slot `DEAD` (clearing
    /// `BUSY`) and sweeps `head` forward over any now-trailing run of `DEAD`
    /// slots, releasing fully-passed pages back to the pool (spec.md §4.6
    /// "Commit consume"). Takes `claimed` by value and drops it — releasing
    /// its own `PinGuard` — before sweeping: the slot that triggered this
    /// commit may itself be the last live slot in its page, so the sweep
    /// must not see this consume's own pin still outstanding on the very
    /// page it is trying to release.
    pub fn commit(&self, pool: &PagePool, claimed: ClaimedSlot) {
        let cb = unsafe { ControlBlock::at(claimed.control_block_addr) };
        cb.next.store(pack(claimed.next_addr, DEAD), Ordering::Release);
        drop(claimed);
        self.sweep(pool);
    }

    /// Same as [`Self::commit`] but preserves the element's `EXTERNAL`
    /// flag semantics only insofar as the caller is responsible for *not*
    /// destroying the element (spec.md §4.7 "commit-without-destroy", used
    /// by iteration that inspects without consuming ownership). The slot
    /// is still retired to `DEAD`; only the destructor call is skipped by
    /// the caller before invoking this.
    pub fn commit_without_destroy(&self, pool: &PagePool, claimed: ClaimedSlot) {
        self.commit(pool, claimed);
    }

    /// Releases a claim without consuming: restores the slot to its
    /// original (non-`BUSY`) flags so it remains live and consumable
    /// (spec.md §4.6 "Cancel consume").
    pub fn cancel(&self, claimed: ClaimedSlot) {
        let cb = unsafe { ControlBlock::at(claimed.control_block_addr) };
        cb.next.store(pack(claimed.next_addr, claimed.flags), Ordering::Release);
    }

    pub fn is_external(claimed: &ClaimedSlot) -> bool {
        has_flag(claimed.flags, EXTERNAL)
    }

    /// The current head address, for use only where exclusive access to
    /// the queue is already guaranteed (its `Drop` impl).
    pub(crate) fn raw_head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    fn sweep(&self, pool: &PagePool) {
        loop {
            let h = self.head.load(Ordering::Acquire);
            if h == 0 {
                return;
            }
            let cb = unsafe { ControlBlock::at(h) };
            let word = cb.load(Ordering::Acquire);
            if word == 0 || !has_flag(word, DEAD) {
                return;
            }
            let next = next_addr(word);
            match self.head.compare_exchange(h, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    let page_size = pool.page_size();
                    if layout::page_base_of(h, page_size) != layout::page_base_of(next, page_size) {
                        if let Some(page) = std::ptr::NonNull::new(layout::page_base_of(h, page_size) as *mut u8) {
                            pool.release(page);
                        }
                    }
                }
                Err(_) => return,
            }
        }
    }
}
