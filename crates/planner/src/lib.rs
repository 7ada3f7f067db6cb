//! Fragment and plan data structures for system procedures.
//!
//! Architecture role:
//! - [`Fragment`]: one unit of work with declared input/output dependency ids
//! - [`Plan`]: validated DAG of fragments handed to the coordinator
//! - [`explain_plan`]: text rendering for logs and the CLI

pub mod explain;
pub mod fragment;
pub mod plan;

pub use explain::explain_plan;
pub use fragment::{Fragment, FragmentScope, ParameterSet};
pub use plan::Plan;
