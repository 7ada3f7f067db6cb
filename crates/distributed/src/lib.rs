//! Distributed execution of fragment plans.
//!
//! Architecture role:
//! - [`topology`]: sites, hosts and partition leadership
//! - [`site`]: the site executor seam and the in-process site
//! - [`coordinator`]: scatter/gather of plans across sites
//! - [`cluster`]: an in-process cluster wiring the pieces together

pub mod cluster;
pub mod coordinator;
pub mod site;
pub mod topology;

pub use cluster::{LocalCluster, LocalClusterBuilder};
pub use coordinator::{CoordinatorConfig, PlanOutput, PlanState, ScatterGatherCoordinator};
pub use site::{FragmentResult, LocalSite, SiteExecutor};
pub use topology::{SiteInfo, Topology};
