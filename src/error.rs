//! Error taxonomy for the paged queue core.
//!
//! Errors are surfaced only on the paths named in the design: allocation
//! failure under a `blocking`/`throwing` progress hint, a descriptor missing
//! a requested capability, and transaction misuse. Contention that is
//! resolved by honoring a progress hint is never an error — see
//! [`crate::progress::ProgressGuarantee`].

use thiserror::Error;

/// Errors that can be returned by a queue operation.
#[derive(Debug, Error)]
pub enum PageQueueError {
    /// The system page source (or the heap, for an external block) refused
    /// to grow. Only returned under [`ProgressGuarantee::Blocking`] or
    /// [`ProgressGuarantee::Throwing`]; under a lock-free or wait-free hint
    /// the same condition surfaces as `None`/`Ok(None)` instead.
    ///
    /// [`ProgressGuarantee::Blocking`]: crate::progress::ProgressGuarantee::Blocking
    /// [`ProgressGuarantee::Throwing`]: crate::progress::ProgressGuarantee::Throwing
    #[error("system allocator refused to grow the page pool")]
    AllocationFailure,

    /// A runtime type descriptor was asked to perform an operation
    /// (copy-construct, move-construct, …) it does not implement.
    #[error("runtime type descriptor for `{type_name}` does not support `{operation}`")]
    DescriptorFeatureMissing {
        type_name: &'static str,
        operation: &'static str,
    },

    /// A method was called on a [`PutTransaction`](crate::transaction::PutTransaction)
    /// or [`ConsumeOperation`](crate::transaction::ConsumeOperation) that has
    /// already been committed or cancelled.
    #[error("transaction already committed or cancelled")]
    TransactionEmpty,
}

pub type Result<T> = std::result::Result<T, PageQueueError>;
