//! Progress hints accepted by producer and consumer operations.
//!
//! See `spec.md` §5 "Progress guarantees". The core never picks a hint for
//! the caller and never silently downgrades one.

/// A caller-supplied bound on what an operation is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressGuarantee {
    /// May call the operating system (grow the page pool, heap-allocate an
    /// external block) and may help a stalled peer. Always makes eventual
    /// progress, but no bound on latency.
    Blocking,
    /// Like `Blocking`, but OS allocation failure is reported back as
    /// `Err(PageQueueError::AllocationFailure)` instead of being treated as
    /// unreachable.
    Throwing,
    /// Never calls the OS; returns `None` instead of blocking or helping
    /// indefinitely. Individual CAS retries are still permitted — the
    /// *algorithm* is lock-free, not the absence of retries.
    LockFree,
    /// Like `LockFree`, additionally forbids unbounded helper loops and any
    /// primitive (e.g. the pin counter increment) whose own progress is not
    /// bounded. Returns `None` on the first sign of contention.
    WaitFree,
}

impl ProgressGuarantee {
    /// Whether this hint permits the operation to reach the operating
    /// system (page growth, heap allocation for an external block).
    #[inline]
    pub fn may_call_os(self) -> bool {
        matches!(self, ProgressGuarantee::Blocking | ProgressGuarantee::Throwing)
    }

    /// Whether an allocation failure should be reported as an error rather
    /// than folded into the `None`/empty result of the operation.
    #[inline]
    pub fn reports_failure(self) -> bool {
        matches!(self, ProgressGuarantee::Throwing)
    }

    /// Whether the tail/head strategies may run their helper (assist a
    /// stalled peer) loop.
    #[inline]
    pub fn may_help(self) -> bool {
        !matches!(self, ProgressGuarantee::WaitFree)
    }
}
