use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use sysproc_common::metrics::global_metrics;
use sysproc_common::{ClusterConfig, Result, SiteId, SysprocError};
use sysproc_distributed::LocalCluster;
use sysproc_planner::explain_plan;
use sysproc_procedures::{
    CatalogUpdateRequest, ChunkedConfig, ChunkedResult, EmptyTableRequirement, StatisticsSelector,
    SystemProcedures, UnknownResponsePolicy, row_count_plan, statistics_plan, system_registry,
};
use sysproc_storage::{Catalog, Row};
use tracing::info;

use crate::call::ProcedureCall;
use crate::session::{Session, SharedSession};

/// Builder for [`Engine`].
///
/// The unknown-response policy has no default and must be chosen before
/// [`EngineBuilder::build`].
#[derive(Debug)]
pub struct EngineBuilder {
    config: ClusterConfig,
    catalog: Catalog,
    snapshot_dir: Option<PathBuf>,
    unknown_policy: Option<UnknownResponsePolicy>,
    call_timeout: Option<Duration>,
}

impl EngineBuilder {
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    pub fn unknown_policy(mut self, policy: UnknownResponsePolicy) -> Self {
        self.unknown_policy = Some(policy);
        self
    }

    /// Per-round deadline for chunked procedures, overriding the cluster's
    /// fragment response timeout. A round that misses it counts as an
    /// unknown response.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let policy = self.unknown_policy.ok_or_else(|| {
            SysprocError::InvalidConfig(
                "an unknown-response policy (fail or ignore) must be chosen".to_string(),
            )
        })?;
        let mut cluster = LocalCluster::builder(self.config)
            .catalog(self.catalog)
            .registry(system_registry());
        if let Some(dir) = self.snapshot_dir {
            cluster = cluster.snapshot_dir(dir);
        }
        let session = Session::new(cluster.build()?, policy, self.call_timeout);
        info!(
            hosts = session.cluster.config().host_count,
            sites_per_host = session.cluster.config().sites_per_host,
            tables = session.cluster.catalog().tables().len(),
            "engine started"
        );
        Ok(Engine {
            session: Arc::new(session),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    session: SharedSession,
}

impl Engine {
    pub fn builder(config: ClusterConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            catalog: Catalog::new(),
            snapshot_dir: None,
            unknown_policy: None,
            call_timeout: None,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        self.session.cluster.config()
    }

    pub fn cluster(&self) -> &LocalCluster {
        &self.session.cluster
    }

    pub fn procedures(&self) -> &SystemProcedures {
        &self.session.procedures
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.session
            .cluster
            .catalog()
            .tables()
            .into_iter()
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn load_rows(&self, table: &str, rows: Vec<Row>) -> Result<u64> {
        self.session.cluster.load_rows(table, rows)
    }

    pub fn row_counts(&self, table: &str) -> Result<Vec<(SiteId, u64)>> {
        self.session.cluster.row_counts(table)
    }

    /// Loop settings for chunked procedures, from the cluster config and the
    /// engine's unknown-response policy.
    pub fn chunked_config(&self) -> ChunkedConfig {
        let config = ChunkedConfig::from_cluster(self.config(), self.session.unknown_policy);
        match self.session.call_timeout {
            Some(timeout) => config.with_call_timeout(Some(timeout)),
            None => config,
        }
    }

    /// Run one procedure and return its result table.
    pub async fn call(&self, call: &ProcedureCall) -> Result<RecordBatch> {
        let procs = &self.session.procedures;
        match call {
            ProcedureCall::Statistics { selector } => procs.statistics(selector).await,
            ProcedureCall::RowCount { table } => procs.row_count(table).await,
            ProcedureCall::NibbleDelete(request) => {
                let result = procs.nibble_delete(request, &self.chunked_config()).await?;
                Ok(log_totals(call, result))
            }
            ProcedureCall::MigrateRows(request) => {
                let result = procs.migrate_rows(request, &self.chunked_config()).await?;
                Ok(log_totals(call, result))
            }
            ProcedureCall::Pause => procs.pause().await,
            ProcedureCall::Resume => procs.resume().await,
            ProcedureCall::UpdateSettings { json } => procs.update_settings(json).await,
            ProcedureCall::SnapshotCheck(request) => procs.snapshot_save_check(request).await,
            ProcedureCall::CheckTables => procs.check_tables().await,
            ProcedureCall::UpdateCatalog {
                path,
                expected_version,
                must_be_empty,
            } => {
                let request = CatalogUpdateRequest {
                    catalog: Catalog::load_from_json(path)?,
                    expected_version: *expected_version,
                    must_be_empty: must_be_empty
                        .iter()
                        .map(|set| EmptyTableRequirement {
                            tables: set.split('+').map(str::to_string).collect(),
                            reason: format!("one of {} must be empty", set.replace('+', ", ")),
                        })
                        .collect(),
                };
                procs.update_catalog(&request).await
            }
        }
    }

    /// Render the plan a procedure would run.
    ///
    /// Only single-plan procedures can be explained; chunked and admin
    /// procedures build their plans round by round or after taking locks.
    pub fn explain(&self, call: &ProcedureCall) -> Result<String> {
        let plan = match call {
            ProcedureCall::Statistics { selector } => {
                statistics_plan(StatisticsSelector::parse(selector)?)?
            }
            ProcedureCall::RowCount { table } => {
                row_count_plan(&self.session.cluster.catalog().get(table)?.name)?
            }
            other => {
                return Err(SysprocError::Unsupported(format!(
                    "explain is not available for {}",
                    other.name()
                )));
            }
        };
        Ok(explain_plan(&plan))
    }

    pub fn prometheus_metrics(&self) -> String {
        global_metrics().render_prometheus()
    }
}

fn log_totals(call: &ProcedureCall, result: ChunkedResult) -> RecordBatch {
    info!(
        procedure = call.name(),
        rounds = result.totals.rounds,
        processed = result.totals.processed,
        left = result.totals.left,
        stalled_rounds = result.totals.stalled_rounds,
        unknown_calls = result.totals.unknown_calls,
        "chunked procedure finished"
    );
    result.table
}
