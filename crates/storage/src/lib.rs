//! Storage-side collaborators of system procedures.
//!
//! - [`catalog`]: table definitions (columns, partitioning, indexes)
//! - [`store`]: per-site scan/delete/insert primitives
//! - [`predicate`]: `column <op> value` filters
//! - [`routing`]: partition key hashing
//! - [`coordination`]: version-checked blobs and named locks

pub mod catalog;
pub mod coordination;
pub mod predicate;
pub mod routing;
pub mod store;

pub use catalog::*;
pub use coordination::{
    CoordinationStore, LockGuard, MemoryCoordinationStore, VersionedValue, WriteOutcome,
};
pub use predicate::{ComparisonOp, RowPredicate};
pub use routing::{ModuloHashinator, PartitionRouter};
pub use store::{MemoryPartitionStore, PartitionStore, Row};
