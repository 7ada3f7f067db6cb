//! System procedures: cluster-wide administrative operations expressed as
//! fragment plans.
//!
//! Architecture role:
//! - registers the site-side handler of every system fragment
//! - validates procedure arguments before anything is dispatched
//! - builds plans, runs them through the coordinator and shapes the result
//!   into each procedure's column contract
//!
//! Key modules:
//! - [`system`]: [`SystemProcedures`] and handler registration
//! - [`chunked`]: the nibble/migrate round loop
//! - [`response`]: outcomes of calls that may never answer
//! - one module per procedure family

pub mod admin_mode;
pub mod catalog_update;
pub mod chunked;
pub mod ids;
pub mod migrate_rows;
pub mod nibble_delete;
pub mod response;
pub mod settings;
pub mod snapshot_check;
pub mod statistics;
pub mod system;
pub mod table_check;

// Re-export only what you want at the crate root (no globs).
pub use catalog_update::{CatalogUpdateRequest, EmptyTableRequirement};
pub use chunked::{ChunkedConfig, ChunkedLoop, ChunkedTotals, RoundProgress};
pub use migrate_rows::MigrateRowsRequest;
pub use nibble_delete::{ChunkedResult, NibbleDeleteRequest};
pub use response::{CallOutcome, UnknownResponsePolicy, call_with_timeout};
pub use snapshot_check::SnapshotSaveRequest;
pub use statistics::{StatisticsSelector, row_count_plan, statistics_plan};
pub use system::{SystemProcedures, register_system_fragments, system_registry};
