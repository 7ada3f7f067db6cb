//! Snapshot save feasibility check.
//!
//! Runs once per host and reports, per table, whether the snapshot file the
//! host would write can be created. Replicated tables map to one file name
//! shared by every host; partitioned tables get one file per host.

use std::fs;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use sysproc_common::{Result, SysprocError, Value};
use sysproc_execution::table::{FAILURE, SUCCESS};
use sysproc_execution::{
    DependencyTables, FragmentRegistry, SiteContext, rows_to_batch, schemas, union_dependency,
};
use sysproc_planner::{Fragment, FragmentScope, ParameterSet, Plan};
use sysproc_storage::TableDef;
use tracing::{debug, info};

use crate::ids::{SAVE_TEST, SAVE_TEST_RESULTS, dep};
use crate::system::SystemProcedures;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSaveRequest {
    /// Directory the snapshot would be written to. Relative paths resolve
    /// against each site's snapshot directory when one is configured.
    pub path: String,
    pub nonce: String,
}

impl SnapshotSaveRequest {
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(SysprocError::Validation(
                "snapshot path must not be empty".to_string(),
            ));
        }
        if self.nonce.is_empty() {
            return Err(SysprocError::Validation(
                "snapshot nonce must not be empty".to_string(),
            ));
        }
        if self.nonce.contains('-') || self.nonce.contains(',') {
            return Err(SysprocError::Validation(format!(
                "snapshot nonce '{}' must not contain '-' or ','",
                self.nonce
            )));
        }
        Ok(())
    }
}

pub(crate) fn register(registry: &FragmentRegistry) {
    registry.register_fn(SAVE_TEST, save_test);
    registry.register_fn(
        SAVE_TEST_RESULTS,
        |_: &SiteContext, inputs: &DependencyTables, _: &ParameterSet| {
            union_dependency(inputs, dep(SAVE_TEST), &schemas::snapshot_result())
        },
    );
}

/// File name a host writes for `table` under `nonce`.
pub fn snapshot_file_name(nonce: &str, table: &TableDef, host_id: u32) -> String {
    if table.is_replicated() {
        format!("{nonce}-{}.vpt", table.name)
    } else {
        format!("{nonce}-{}-host_{host_id}.vpt", table.name)
    }
}

fn resolve_dir(ctx: &SiteContext, path: &str) -> PathBuf {
    let path = Path::new(path);
    match &ctx.snapshot_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

/// `(RESULT, ERR_MSG)` for one target file.
fn check_target(dir: &Path, file: &Path) -> (&'static str, String) {
    if file.exists() {
        return (
            FAILURE,
            format!("SAVE FILE ALREADY EXISTS: {}", file.display()),
        );
    }
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => (SUCCESS, String::new()),
        Ok(_) => (
            FAILURE,
            format!("FILE LOCATION UNWRITABLE: {}", file.display()),
        ),
        Err(e) => (
            FAILURE,
            format!(
                "FILE CREATION OF {} RESULTED IN IO ERROR: {e}",
                file.display()
            ),
        ),
    }
}

fn save_test(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let dir = resolve_dir(ctx, params.get_str(0, "path")?);
    let nonce = params.get_str(1, "nonce")?;
    let mut rows = Vec::new();
    let catalog = ctx.catalog();
    for table in catalog.tables() {
        let file = dir.join(snapshot_file_name(nonce, table, ctx.host_id().0));
        let (result, message) = check_target(&dir, &file);
        debug!(
            host_id = %ctx.host_id(),
            table = %table.name,
            file = %file.display(),
            result,
            "snapshot target checked"
        );
        rows.push(vec![
            Value::BigInt(ctx.host_id().0 as i64),
            Value::from(ctx.hostname()),
            Value::Varchar(table.name.clone()),
            Value::from(result),
            Value::Varchar(message),
        ]);
    }
    rows_to_batch(schemas::snapshot_result(), rows)
}

impl SystemProcedures {
    /// Check on every host whether a snapshot could be saved.
    ///
    /// Answers `HOST_ID, HOSTNAME, TABLE, RESULT, ERR_MSG`; `FAILURE` rows
    /// are returned as-is.
    pub async fn snapshot_save_check(&self, request: &SnapshotSaveRequest) -> Result<RecordBatch> {
        request.validate()?;
        let plan = Plan::distribute_aggregate(
            Fragment::new(SAVE_TEST, dep(SAVE_TEST), FragmentScope::NonExecutionSites)
                .with_parameters(ParameterSet::new(vec![
                    Value::from(request.path.as_str()),
                    Value::from(request.nonce.as_str()),
                ])),
            Fragment::aggregate(SAVE_TEST_RESULTS, dep(SAVE_TEST_RESULTS), vec![dep(
                SAVE_TEST,
            )]),
        )?;
        let table = self
            .run_plan("snapshot_save_check", &plan, dep(SAVE_TEST_RESULTS))
            .await?;
        info!(
            path = %request.path,
            nonce = %request.nonce,
            rows = table.num_rows(),
            "snapshot save check finished"
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysproc_storage::{ColumnDef, ColumnType};

    fn table(partitioned: bool) -> TableDef {
        TableDef {
            name: "ORDERS".to_string(),
            columns: vec![ColumnDef::new("ID", ColumnType::BigInt)],
            partition_column: partitioned.then(|| "ID".to_string()),
            indexes: Vec::new(),
        }
    }

    #[test]
    fn nonce_rules() {
        let ok = SnapshotSaveRequest {
            path: "/tmp".to_string(),
            nonce: "nightly".to_string(),
        };
        assert!(ok.validate().is_ok());
        for (path, nonce) in [("", "n"), ("/tmp", ""), ("/tmp", "a-b"), ("/tmp", "a,b")] {
            let req = SnapshotSaveRequest {
                path: path.to_string(),
                nonce: nonce.to_string(),
            };
            assert!(req.validate().expect_err("invalid").is_validation());
        }
    }

    #[test]
    fn file_names_follow_partitioning() {
        assert_eq!(snapshot_file_name("n1", &table(false), 3), "n1-ORDERS.vpt");
        assert_eq!(
            snapshot_file_name("n1", &table(true), 3),
            "n1-ORDERS-host_3.vpt"
        );
    }

    #[test]
    fn missing_directory_is_an_io_failure() {
        let dir = std::env::temp_dir().join("sysproc_snapshot_missing_dir_for_test");
        let (result, msg) = check_target(&dir, &dir.join("x.vpt"));
        assert_eq!(result, FAILURE);
        assert!(msg.contains("IO ERROR"));
    }
}
