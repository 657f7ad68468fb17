//! A heterogeneous, lock-free-capable, page-backed FIFO queue.
//!
//! Elements of any `Send + Sync + 'static` type may be pushed onto the
//! same queue; each carries its own runtime type descriptor so the
//! consumer can destroy, copy, or move it without the queue itself ever
//! being generic over an element type. See [`Queue`] for the main entry
//! point and `DESIGN.md` for how the pieces below fit together.

mod config;
mod descriptor;
mod error;
mod external;
mod head;
mod layout;
mod os;
mod pool;
mod progress;
mod queue;
mod source;
mod stats;
mod tail;
mod transaction;

pub use config::{Config, Consistency, ConsumerCardinality, DefaultConfig, MpScSeqCstConfig, ProducerCardinality, SpScConfig};
pub use descriptor::{descriptor_of, descriptor_of_cloneable, RuntimeType, TypeHandle};
pub use error::{PageQueueError, Result};
pub use progress::ProgressGuarantee;
pub use queue::Queue;
pub use stats::{QueueStats, StatCount};
pub use transaction::{ConsumeOperation, PutTransaction};
