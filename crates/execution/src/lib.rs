//! Site-side execution primitives for system-procedure fragments.
//!
//! Architecture role:
//! - per-site context (partition store, catalog, host-global state)
//! - fragment id to handler dispatch
//! - dependency tables exchanged between fragments
//! - fixed result schemas and merge routines used by aggregators
//!
//! Key modules:
//! - [`context`]
//! - [`dependency`]
//! - [`merge`]
//! - [`registry`]
//! - [`table`]

pub mod context;
pub mod dependency;
pub mod merge;
pub mod registry;
pub mod table;

// Re-export only what you want at the crate root (no globs).
pub use context::{HostState, InstalledCatalog, InstalledSettings, RunMode, SiteContext};
pub use dependency::{DependencyTables, PartialTable};
pub use merge::{DedupResultSet, Reconcile, reconcile, sum_counts, union_dependency, union_tables};
pub use registry::{FragmentHandler, FragmentRegistry};
pub use table::{rows_to_batch, schemas, status_table, unused_table};
