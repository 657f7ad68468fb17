//! Build-time configuration (spec.md §6.3).
//!
//! The teacher crate hardcodes its tuning knobs as `const` items
//! (`MI_SEGMENT_SHIFT`, `MI_SMALL_PAGE_SIZE`, …) so the compiler can fold
//! alignment masks to constants. We generalize that into a trait so a
//! caller can parameterize a queue family, while keeping every derived
//! quantity a compile-time constant for the common case (`DefaultConfig`).

/// Allocation granularity: the width of a machine word, and therefore the
/// size of a [`ControlBlock`](crate::layout::ControlBlock) and the number
/// of low bits available for flags (`BUSY | DEAD | EXTERNAL`, 3 bits, needs
/// `G >= 8`).
pub const GRANULARITY: usize = std::mem::size_of::<usize>();

/// Low bits of a control block's `next` word reserved for flags.
pub const FLAG_BITS: usize = 3;
pub const FLAG_MASK: usize = (1 << FLAG_BITS) - 1;

/// Selects the producer-side synchronisation strategy for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerCardinality {
    /// Exactly one thread ever calls a producer operation on this queue.
    /// `tail` is not required to be an atomic CAS target; no helper path.
    Single,
    /// Any number of threads may call producer operations concurrently.
    Multiple,
}

/// Selects the consumer-side synchronisation strategy for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerCardinality {
    Single,
    Multiple,
}

/// Memory-order profile for the tail/head atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// Per-slot acquire/release only: a consume observing element X
    /// happens-after the commit of X, but commits of unrelated elements are
    /// not globally ordered relative to each other.
    Relaxed,
    /// All committing stores additionally participate in one global total
    /// order (`SeqCst`).
    SeqCst,
}

/// Build-time parameters for a queue family (spec.md §6.3).
///
/// Implementations are zero-sized marker types; every associated constant
/// is folded by the compiler exactly like the teacher's `MI_*` constants.
pub trait Config: 'static {
    /// Size and alignment of every page, in bytes. Must be a power of two
    /// larger than a handful of control blocks worth of slack.
    const PAGE_SIZE: usize;

    const PRODUCER_CARDINALITY: ProducerCardinality;
    const CONSUMER_CARDINALITY: ConsumerCardinality;
    const CONSISTENCY: Consistency;

    /// Offset, from the start of a page, of the end-of-page sentinel
    /// control block. Always `PAGE_SIZE - GRANULARITY`, since
    /// `size_of::<ControlBlock>() == GRANULARITY` and `PAGE_SIZE` is a
    /// power of two multiple of `GRANULARITY`.
    const END_OF_PAGE_OFFSET: usize = Self::PAGE_SIZE - GRANULARITY;

    /// Largest `(size, align)` that can still live in-page after a fresh
    /// page's header and worst-case padding; anything bigger takes the
    /// external-block path (spec.md §3.5).
    const MAX_INLINE_SIZE: usize = Self::PAGE_SIZE / 4;
}

/// The default build-time configuration: 64 KiB pages, multi-producer,
/// multi-consumer, relaxed (per-slot acquire/release) consistency.
pub struct DefaultConfig;

impl Config for DefaultConfig {
    const PAGE_SIZE: usize = 1 << 16;
    const PRODUCER_CARDINALITY: ProducerCardinality = ProducerCardinality::Multiple;
    const CONSUMER_CARDINALITY: ConsumerCardinality = ConsumerCardinality::Multiple;
    const CONSISTENCY: Consistency = Consistency::Relaxed;
}

/// Single-producer/single-consumer configuration, for the cheapest queue
/// variant (spec.md §4.5): no atomics on the tail at all, a non-atomic bump
/// allocator per page.
pub struct SpScConfig;

impl Config for SpScConfig {
    const PAGE_SIZE: usize = 1 << 16;
    const PRODUCER_CARDINALITY: ProducerCardinality = ProducerCardinality::Single;
    const CONSUMER_CARDINALITY: ConsumerCardinality = ConsumerCardinality::Single;
    const CONSISTENCY: Consistency = Consistency::Relaxed;
}

/// Multi-producer, single-consumer, sequentially consistent configuration.
pub struct MpScSeqCstConfig;

impl Config for MpScSeqCstConfig {
    const PAGE_SIZE: usize = 1 << 16;
    const PRODUCER_CARDINALITY: ProducerCardinality = ProducerCardinality::Multiple;
    const CONSUMER_CARDINALITY: ConsumerCardinality = ConsumerCardinality::Single;
    const CONSISTENCY: Consistency = Consistency::SeqCst;
}
