//! Page layout and slot allocator (spec.md §3.2, §3.3, §4.3, L2).
//!
//! Pure, allocator-agnostic geometry: given a page base and a cursor
//! offset, compute where a slot's control block, optional type handle, and
//! element storage land, and whether the reservation fits before the
//! page's end-of-page sentinel. The tail/head state machines (`tail.rs`,
//! `head.rs`) are the only callers that touch atomics; everything here is
//! plain arithmetic so it can be unit-tested in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{FLAG_MASK, GRANULARITY};
use crate::descriptor::TypeHandle;

pub const BUSY: usize = 0b001;
pub const DEAD: usize = 0b010;
pub const EXTERNAL: usize = 0b100;

#[inline]
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[inline]
pub fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

#[inline]
pub fn page_base_of(addr: usize, page_size: usize) -> usize {
    align_down(addr, page_size)
}

/// Fixed-size slot header (spec.md §3.2). A single machine word: an
/// aligned pointer to the byte after this slot, OR'd with up to three
/// flag bits. `size_of::<ControlBlock>() == GRANULARITY` always, which is
/// what makes the end-of-page sentinel sit at exactly
/// `PAGE_SIZE - GRANULARITY` (`Config::END_OF_PAGE_OFFSET`).
#[repr(transparent)]
pub struct ControlBlock {
    pub next: AtomicUsize,
}

impl ControlBlock {
    #[inline]
    pub unsafe fn at(addr: usize) -> &'static ControlBlock {
        &*(addr as *const ControlBlock)
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> usize {
        self.next.load(order)
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self as *const _ as usize
    }
}

#[inline]
pub fn next_addr(word: usize) -> usize {
    word & !FLAG_MASK
}

#[inline]
pub fn flags_of(word: usize) -> usize {
    word & FLAG_MASK
}

#[inline]
pub fn has_flag(word: usize, flag: usize) -> bool {
    word & flag != 0
}

#[inline]
pub fn pack(addr: usize, flags: usize) -> usize {
    debug_assert_eq!(addr & FLAG_MASK, 0);
    addr | (flags & FLAG_MASK)
}

/// The geometry of one reserved slot, relative to a page whose base is
/// known only to the caller (tail/head strategies hold the actual
/// pointer); every field here is a byte offset from that page base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    /// Offset of this slot's control block (always `GRANULARITY`-aligned).
    pub control_block_offset: usize,
    /// Offset of the inline `TypeHandle`, if this slot carries one.
    pub type_offset: Option<usize>,
    /// Offset of the user-visible element/payload storage.
    pub user_offset: usize,
    /// Offset one-past the slot, already rounded up to `GRANULARITY`: the
    /// next slot's control block candidate.
    pub end_offset: usize,
}

/// Offset of the inline [`TypeHandle`] within a slot that was reserved
/// with `include_type: true`. Fixed regardless of the element's own size
/// or alignment, which is why the consumer side can locate it knowing only
/// a control block address (spec.md §4.6 "Claim").
#[inline]
pub fn type_handle_addr(control_block_addr: usize) -> usize {
    control_block_addr + GRANULARITY
}

/// Reconstructs the address of a slot's payload storage from only its
/// control block address and the alignment the payload was reserved with.
/// Mirrors the arithmetic in [`reserve_slot`] for the `include_type: true`
/// case; the consumer side (which never calls `reserve_slot` itself) uses
/// this once it has read the inline [`TypeHandle`] and knows which
/// alignment applies (the real element's, or
/// [`crate::external::ExternalBlock`]'s if the slot is `EXTERNAL`).
#[inline]
pub fn user_storage_addr(control_block_addr: usize, payload_align: usize) -> usize {
    let header_end = align_up(
        control_block_addr + GRANULARITY + std::mem::size_of::<TypeHandle>(),
        GRANULARITY,
    );
    align_up(header_end, payload_align.max(1))
}

/// Computes the layout of a slot to be carved out starting at
/// `cursor_offset` (spec.md §4.3 steps 1-4). Returns `None` if the slot
/// would not fit before `end_of_page_offset` (step 5/6: caller must then
/// run page overflow or go external).
pub fn reserve_slot(
    cursor_offset: usize,
    end_of_page_offset: usize,
    size: usize,
    align: usize,
    include_type: bool,
) -> Option<SlotLayout> {
    debug_assert_eq!(cursor_offset % GRANULARITY, 0);
    let header_end = if include_type {
        cursor_offset + GRANULARITY + std::mem::size_of::<TypeHandle>()
    } else {
        cursor_offset + GRANULARITY
    };
    let header_end = align_up(header_end, GRANULARITY);

    let user_offset = align_up(header_end, align.max(1));
    let user_end = user_offset.checked_add(size)?;
    if user_end > end_of_page_offset {
        return None;
    }

    let end_offset = align_up(user_end, GRANULARITY);
    Some(SlotLayout {
        control_block_offset: cursor_offset,
        type_offset: if include_type { Some(cursor_offset + GRANULARITY) } else { None },
        user_offset,
        end_offset,
    })
}
