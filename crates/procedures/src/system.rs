//! Entry point for running system procedures against a cluster.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use sysproc_common::{ClusterConfig, DependencyId, Result};
use sysproc_distributed::{LocalCluster, ScatterGatherCoordinator, Topology};
use sysproc_execution::{FragmentRegistry, HostState};
use sysproc_planner::{Plan, explain_plan};
use sysproc_storage::{Catalog, CoordinationStore, PartitionRouter};
use tracing::debug;

use crate::{
    admin_mode, catalog_update, migrate_rows, nibble_delete, settings, snapshot_check, statistics,
    table_check,
};

/// Register every system fragment handler on `registry`.
pub fn register_system_fragments(registry: &FragmentRegistry) {
    statistics::register(registry);
    snapshot_check::register(registry);
    nibble_delete::register(registry);
    migrate_rows::register(registry);
    admin_mode::register(registry);
    settings::register(registry);
    table_check::register(registry);
    catalog_update::register(registry);
}

/// A registry holding every system fragment handler.
pub fn system_registry() -> Arc<FragmentRegistry> {
    let registry = Arc::new(FragmentRegistry::new());
    register_system_fragments(&registry);
    registry
}

/// Runs system procedures through a cluster's coordinator.
///
/// Each procedure validates its arguments against the catalog before any
/// fragment is dispatched, builds a plan, and shapes the terminal table into
/// the procedure's column contract.
#[derive(Debug, Clone)]
pub struct SystemProcedures {
    config: ClusterConfig,
    topology: Arc<Topology>,
    lead_host: Arc<HostState>,
    router: Arc<dyn PartitionRouter>,
    coordination: Arc<dyn CoordinationStore>,
    coordinator: Arc<ScatterGatherCoordinator>,
}

impl SystemProcedures {
    pub fn new(cluster: &LocalCluster) -> Self {
        Self {
            config: cluster.config().clone(),
            topology: Arc::clone(cluster.topology()),
            lead_host: Arc::clone(cluster.lead_host()),
            router: Arc::clone(cluster.router()),
            coordination: Arc::clone(cluster.coordination()),
            coordinator: Arc::clone(cluster.coordinator()),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Catalog of the lead host, which every request is validated against.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.lead_host.catalog().catalog
    }

    pub(crate) fn router(&self) -> &Arc<dyn PartitionRouter> {
        &self.router
    }

    pub(crate) fn coordination(&self) -> &Arc<dyn CoordinationStore> {
        &self.coordination
    }

    /// Execute `plan` and return the single table filed under `terminal`.
    pub(crate) async fn run_plan(
        &self,
        procedure: &'static str,
        plan: &Plan,
        terminal: DependencyId,
    ) -> Result<RecordBatch> {
        debug!(procedure, plan = %explain_plan(plan), "running system procedure plan");
        self.coordinator.execute_plan(plan).await?.single(terminal)
    }
}
