//! Shared configuration, error types, IDs, values, and metrics for sysproc crates.
//!
//! Architecture role:
//! - defines cluster configuration passed across layers
//! - provides common [`SysprocError`] / [`Result`] contracts
//! - hosts typed identifiers and the dynamically typed [`Value`]
//! - hosts the prometheus-backed metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]
//! - [`value`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod value;

pub use config::ClusterConfig;
pub use error::{Result, SysprocError};
pub use ids::*;
pub use metrics::MetricsRegistry;
pub use value::Value;
