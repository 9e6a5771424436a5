pub mod client;
pub mod error;
pub mod migrate;
pub mod ops;
pub mod reconcile;
pub mod resilient;
pub mod store;
pub mod sync_queue;
pub mod writer;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use error::StoreError;
pub use ops::WriteOp;
pub use reconcile::{EdgeDelta, EdgeDirection, EdgeSet};
pub use resilient::{ReplayReport, ResilientStore, RetryPolicy, WriteOutcome};
pub use store::GraphStore;
pub use sync_queue::{QueueEntry, SyncQueue};
pub use writer::GraphWriter;

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryGraph;
