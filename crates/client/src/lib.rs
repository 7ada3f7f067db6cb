//! In-process cluster facade and `sysproc` command surface.
//!
//! Architecture role:
//! - builds a [`LocalCluster`](sysproc_distributed::LocalCluster) with every
//!   system fragment registered
//! - parses textual procedure invocations ([`ProcedureCall`])
//! - runs them through [`Engine`] and exposes plans and metrics
//!
//! Key modules:
//! - [`engine`]
//! - [`call`]
//! - [`demo`]

mod session;

pub mod call;
pub mod demo;
pub mod engine;
pub mod repl;

pub use call::ProcedureCall;
pub use engine::{Engine, EngineBuilder};
