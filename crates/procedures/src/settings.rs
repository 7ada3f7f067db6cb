//! Cluster settings propagation.
//!
//! Settings are a JSON object stored under [`SETTINGS_KEY`]. Every accepted
//! update bumps the store version; hosts install a blob only when its
//! version is newer than the one they hold.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use sysproc_common::{Result, SysprocError, Value};
use sysproc_execution::{
    DependencyTables, FragmentRegistry, SiteContext, rows_to_batch, schemas, status_table,
    union_dependency,
};
use sysproc_planner::{Fragment, FragmentScope, ParameterSet, Plan};
use sysproc_storage::{LockGuard, WriteOutcome};
use tracing::info;

use crate::admin_mode::count_applied;
use crate::ids::{INSTALL_SETTINGS, INSTALL_SETTINGS_RESULTS, dep};
use crate::system::SystemProcedures;

pub const SETTINGS_KEY: &str = "cluster/settings";
const SETTINGS_LOCK: &str = "admin/settings";

pub(crate) fn register(registry: &FragmentRegistry) {
    registry.register_fn(INSTALL_SETTINGS, install_settings);
    registry.register_fn(
        INSTALL_SETTINGS_RESULTS,
        |_: &SiteContext, inputs: &DependencyTables, _: &ParameterSet| {
            union_dependency(inputs, dep(INSTALL_SETTINGS), &schemas::host_mode())
        },
    );
}

fn install_settings(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let version = u64::try_from(params.get_i64(0, "version")?)
        .map_err(|e| SysprocError::Execution(format!("invalid settings version: {e}")))?;
    let json = params.get_str(1, "settings")?;
    let applied = ctx.host.install_settings(version, json)?;
    if applied {
        info!(host_id = %ctx.host_id(), version, "settings installed");
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

/// Parse and canonicalise a settings blob; only JSON objects are accepted.
fn canonical_settings(json: &str) -> Result<String> {
    let parsed: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| SysprocError::Validation(format!("settings are not valid JSON: {e}")))?;
    if !parsed.is_object() {
        return Err(SysprocError::Validation(
            "settings must be a JSON object".to_string(),
        ));
    }
    serde_json::to_string(&parsed)
        .map_err(|e| SysprocError::Execution(format!("failed to encode settings: {e}")))
}

impl SystemProcedures {
    /// Record `json` as the new cluster settings and install it on every host.
    ///
    /// Answers `STATUS, MESSAGE`.
    pub async fn update_settings(&self, json: &str) -> Result<RecordBatch> {
        let canonical = canonical_settings(json)?;
        let _lock = LockGuard::acquire(Arc::clone(self.coordination()), SETTINGS_LOCK, "update_settings")?;
        let expected = self.coordination().read(SETTINGS_KEY)?.map(|v| v.version);
        let version = match self.coordination().write_if_version(
            SETTINGS_KEY,
            expected,
            canonical.as_bytes().to_vec(),
        )? {
            WriteOutcome::Applied { version } => version,
            WriteOutcome::Conflict { current } => {
                return Err(SysprocError::Coordination(format!(
                    "settings changed concurrently: expected version {expected:?}, found {current:?}"
                )));
            }
        };
        info!(version, "cluster settings recorded");

        let plan = Plan::distribute_aggregate(
            Fragment::new(INSTALL_SETTINGS, dep(INSTALL_SETTINGS), FragmentScope::NonExecutionSites)
                .with_parameters(ParameterSet::new(vec![
                    Value::BigInt(version as i64),
                    Value::Varchar(canonical),
                ])),
            Fragment::aggregate(
                INSTALL_SETTINGS_RESULTS,
                dep(INSTALL_SETTINGS_RESULTS),
                vec![dep(INSTALL_SETTINGS)],
            ),
        )?;
        let table = self
            .run_plan("update_settings", &plan, dep(INSTALL_SETTINGS_RESULTS))
            .await?;
        let installed = count_applied(&table)?;
        status_table(
            0,
            format!("settings version {version} installed on {installed} host(s)"),
        )
    }

    /// The settings currently recorded for the cluster, with their version.
    pub fn settings(&self) -> Result<Option<(u64, serde_json::Value)>> {
        let Some(v) = self.coordination().read(SETTINGS_KEY)? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&v.data).map_err(|e| {
            SysprocError::Coordination(format!("stored settings are not valid JSON: {e}"))
        })?;
        Ok(Some((v.version, parsed)))
    }
}
