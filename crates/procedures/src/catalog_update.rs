//! Catalog replacement.
//!
//! An update names the catalog version it was planned against. It runs as
//! two fan-outs under the catalog lock:
//! - a precheck on every site that reports the row counts of the tables the
//!   change needs empty;
//! - an apply on one site per host that installs the new catalog.
//!
//! The new catalog is recorded under [`CATALOG_KEY`] between the two with a
//! version-checked write. A failed precheck leaves nothing recorded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use sysproc_common::{Result, SysprocError, Value};
use sysproc_execution::table::{i64_column, string_column};
use sysproc_execution::{
    DependencyTables, FragmentRegistry, SiteContext, rows_to_batch, schemas, status_table,
    union_dependency,
};
use sysproc_planner::{Fragment, FragmentScope, ParameterSet, Plan};
use sysproc_storage::{Catalog, LockGuard, WriteOutcome};
use tracing::info;

use crate::admin_mode::count_applied;
use crate::ids::{
    UPDATE_CATALOG, UPDATE_CATALOG_PRECHECK, UPDATE_CATALOG_PRECHECK_RESULTS,
    UPDATE_CATALOG_RESULTS, dep,
};
use crate::statistics::table_stats_batch;
use crate::system::SystemProcedures;

pub const CATALOG_KEY: &str = "cluster/catalog";
const CATALOG_LOCK: &str = "admin/catalog";

/// Tables of which at least one must be empty for an update to go ahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyTableRequirement {
    pub tables: Vec<String>,
    /// Reported when every table of the set holds rows.
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CatalogUpdateRequest {
    pub catalog: Catalog,
    /// Version of the catalog the change was planned against; 0 is the
    /// catalog the cluster started with.
    pub expected_version: u64,
    pub must_be_empty: Vec<EmptyTableRequirement>,
}

pub(crate) fn register(registry: &FragmentRegistry) {
    registry.register_fn(UPDATE_CATALOG_PRECHECK, precheck);
    registry.register_fn(
        UPDATE_CATALOG_PRECHECK_RESULTS,
        |_: &SiteContext, inputs: &DependencyTables, _: &ParameterSet| {
            union_dependency(inputs, dep(UPDATE_CATALOG_PRECHECK), &schemas::table_stats())
        },
    );
    registry.register_fn(UPDATE_CATALOG, install_catalog);
    registry.register_fn(
        UPDATE_CATALOG_RESULTS,
        |_: &SiteContext, inputs: &DependencyTables, _: &ParameterSet| {
            union_dependency(inputs, dep(UPDATE_CATALOG), &schemas::host_mode())
        },
    );
}

/// Row counts of the tables named by the parameters, against the catalog the
/// site currently serves.
fn precheck(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let catalog = ctx.catalog();
    let tables = (0..params.len())
        .map(|i| catalog.get(params.get_str(i, "table")?))
        .collect::<Result<Vec<_>>>()?;
    table_stats_batch(ctx, &tables)
}

fn install_catalog(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let expected = u64::try_from(params.get_i64(0, "expected_version")?)
        .map_err(|e| SysprocError::Execution(format!("invalid catalog version: {e}")))?;
    let catalog = Catalog::from_json_str(params.get_str(1, "catalog")?)?;
    let applied = ctx.host.install_catalog(expected, Arc::new(catalog))?;
    if applied {
        info!(host_id = %ctx.host_id(), version = expected + 1, "catalog installed");
    } else {
        info!(host_id = %ctx.host_id(), version = expected + 1, "catalog already installed");
    }
    rows_to_batch(
        schemas::host_mode(),
        vec![vec![
            Value::BigInt(ctx.host_id().0 as i64),
            Value::BigInt(ctx.site_id.0 as i64),
            Value::Boolean(applied),
        ]],
    )
}

/// Canonical names of every table the requirements mention.
fn required_tables(catalog: &Catalog, requirements: &[EmptyTableRequirement]) -> Result<Vec<String>> {
    let mut names = BTreeSet::new();
    for req in requirements {
        if req.tables.is_empty() {
            return Err(SysprocError::Validation(format!(
                "empty-table requirement '{}' names no tables",
                req.reason
            )));
        }
        for table in &req.tables {
            let def = catalog.get(table).map_err(|_| {
                SysprocError::Validation(format!(
                    "table {table} must be checked for rows but does not exist in the current catalog"
                ))
            })?;
            names.insert(def.name.clone());
        }
    }
    Ok(names.into_iter().collect())
}

/// Reasons of the requirements whose tables all hold rows somewhere.
fn unmet_requirements(stats: &RecordBatch, requirements: &[EmptyTableRequirement]) -> Result<Vec<String>> {
    let names = string_column(stats, "TABLE_NAME")?;
    let counts = i64_column(stats, "TUPLE_COUNT")?;
    let mut rows: BTreeMap<String, i64> = BTreeMap::new();
    for (name, count) in names.iter().zip(counts) {
        *rows.entry(name.to_ascii_uppercase()).or_default() += count;
    }
    Ok(requirements
        .iter()
        .filter(|req| {
            req.tables
                .iter()
                .all(|t| rows.get(&t.to_ascii_uppercase()).copied().unwrap_or(0) > 0)
        })
        .map(|req| req.reason.clone())
        .collect())
}

impl SystemProcedures {
    /// Replace the catalog on every host.
    ///
    /// Fails without side effects when another update got in first or when
    /// a required-empty table set holds rows everywhere. Re-running an update
    /// that was already recorded only re-applies it to hosts that missed it.
    /// Answers `STATUS, MESSAGE`.
    pub async fn update_catalog(&self, request: &CatalogUpdateRequest) -> Result<RecordBatch> {
        let json = request.catalog.to_json_string()?;
        let required = required_tables(&self.catalog(), &request.must_be_empty)?;
        let _lock = LockGuard::acquire(Arc::clone(self.coordination()), CATALOG_LOCK, "update_catalog")?;

        let recorded = self.coordination().read(CATALOG_KEY)?;
        let live = recorded.as_ref().map(|v| v.version).unwrap_or(0);
        let expected = request.expected_version;
        let retried = live == expected + 1
            && recorded
                .as_ref()
                .map(|v| v.data == json.as_bytes())
                .unwrap_or(false);
        if retried {
            info!(version = live, "catalog update already recorded; re-applying");
        } else {
            if live != expected {
                return Err(SysprocError::Coordination(format!(
                    "catalog update was planned against version {expected} but version {live} is live"
                )));
            }
            self.precheck_catalog_update(&required, &request.must_be_empty)
                .await?;
            match self.coordination().write_if_version(
                CATALOG_KEY,
                (live > 0).then_some(live),
                json.clone().into_bytes(),
            )? {
                WriteOutcome::Applied { version } => {
                    info!(version, tables = request.catalog.tables().len(), "catalog recorded");
                }
                WriteOutcome::Conflict { current } => {
                    return Err(SysprocError::Coordination(format!(
                        "concurrent catalog update detected: expected version {live}, found {current:?}"
                    )));
                }
            }
        }

        let plan = Plan::distribute_aggregate(
            Fragment::new(UPDATE_CATALOG, dep(UPDATE_CATALOG), FragmentScope::NonExecutionSites)
                .with_parameters(ParameterSet::new(vec![
                    Value::BigInt(expected as i64),
                    Value::Varchar(json),
                ])),
            Fragment::aggregate(
                UPDATE_CATALOG_RESULTS,
                dep(UPDATE_CATALOG_RESULTS),
                vec![dep(UPDATE_CATALOG)],
            ),
        )?;
        let table = self
            .run_plan("update_catalog", &plan, dep(UPDATE_CATALOG_RESULTS))
            .await?;
        let installed = count_applied(&table)?;
        status_table(
            0,
            format!(
                "catalog version {} installed on {installed} host(s)",
                expected + 1
            ),
        )
    }

    /// The catalog version recorded for the cluster; 0 before any update.
    pub fn catalog_version(&self) -> Result<u64> {
        Ok(self
            .coordination()
            .read(CATALOG_KEY)?
            .map(|v| v.version)
            .unwrap_or(0))
    }

    async fn precheck_catalog_update(
        &self,
        tables: &[String],
        requirements: &[EmptyTableRequirement],
    ) -> Result<()> {
        let plan = Plan::distribute_aggregate(
            Fragment::distribute(UPDATE_CATALOG_PRECHECK, dep(UPDATE_CATALOG_PRECHECK))
                .with_parameters(ParameterSet::new(
                    tables.iter().cloned().map(Value::Varchar).collect(),
                )),
            Fragment::aggregate(
                UPDATE_CATALOG_PRECHECK_RESULTS,
                dep(UPDATE_CATALOG_PRECHECK_RESULTS),
                vec![dep(UPDATE_CATALOG_PRECHECK)],
            ),
        )?;
        let stats = self
            .run_plan(
                "update_catalog",
                &plan,
                dep(UPDATE_CATALOG_PRECHECK_RESULTS),
            )
            .await?;
        let unmet = unmet_requirements(&stats, requirements)?;
        if !unmet.is_empty() {
            info!(unmet = unmet.len(), "catalog precheck failed");
            return Err(SysprocError::Validation(format!(
                "unable to make requested schema change: {}",
                unmet.join("; ")
            )));
        }
        Ok(())
    }
}
