//! Pause and resume: switch the cluster run mode.
//!
//! The run mode has one owner, the coordination store key [`RUN_MODE_KEY`],
//! written under a lock with a version check. Hosts then apply the new mode
//! with a compare-and-swap on their own flag, performed only by the lowest
//! site of each host.

use std::sync::Arc;

use arrow::array::{Array, BooleanArray};
use arrow::record_batch::RecordBatch;
use sysproc_common::{Result, SysprocError, Value};
use sysproc_execution::{
    DependencyTables, FragmentRegistry, RunMode, SiteContext, rows_to_batch, schemas,
    status_table, union_dependency,
};
use sysproc_planner::{Fragment, ParameterSet, Plan};
use sysproc_storage::{LockGuard, WriteOutcome};
use tracing::info;

use crate::ids::{SET_RUN_MODE, SET_RUN_MODE_RESULTS, dep};
use crate::system::SystemProcedures;

pub const RUN_MODE_KEY: &str = "cluster/run_mode";
const RUN_MODE_LOCK: &str = "admin/run_mode";

pub(crate) fn register(registry: &FragmentRegistry) {
    registry.register_fn(SET_RUN_MODE, set_run_mode);
    registry.register_fn(
        SET_RUN_MODE_RESULTS,
        |_: &SiteContext, inputs: &DependencyTables, _: &ParameterSet| {
            union_dependency(inputs, dep(SET_RUN_MODE), &schemas::host_mode())
        },
    );
}

fn opposite(mode: RunMode) -> RunMode {
    match mode {
        RunMode::Running => RunMode::Paused,
        RunMode::Paused => RunMode::Running,
    }
}

fn set_run_mode(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let to = RunMode::parse(params.get_str(0, "run_mode")?)?;
    let applied = ctx.is_lowest_site_on_host && ctx.host.transition_run_mode(opposite(to), to);
    if applied {
        info!(
            host_id = %ctx.host_id(),
            site_id = %ctx.site_id,
            run_mode = to.as_str(),
            "host run mode changed"
        );
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

/// Hosts whose `host_mode` row reports an applied change.
pub(crate) fn count_applied(table: &RecordBatch) -> Result<usize> {
    let col = table
        .column_by_name("APPLIED")
        .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
        .ok_or_else(|| SysprocError::Execution("missing boolean column APPLIED".to_string()))?;
    Ok((0..col.len())
        .filter(|i| !col.is_null(*i) && col.value(*i))
        .count())
}

impl SystemProcedures {
    /// Pause the cluster. Answers `STATUS, MESSAGE`.
    pub async fn pause(&self) -> Result<RecordBatch> {
        self.set_run_mode(RunMode::Paused).await
    }

    /// Resume a paused cluster. Answers `STATUS, MESSAGE`.
    pub async fn resume(&self) -> Result<RecordBatch> {
        self.set_run_mode(RunMode::Running).await
    }

    /// The run mode recorded in the coordination store.
    pub fn run_mode(&self) -> Result<RunMode> {
        match self.coordination().read(RUN_MODE_KEY)? {
            Some(v) => RunMode::parse(&String::from_utf8_lossy(&v.data)),
            None => Ok(RunMode::Running),
        }
    }

    async fn set_run_mode(&self, to: RunMode) -> Result<RecordBatch> {
        let _lock = LockGuard::acquire(Arc::clone(self.coordination()), RUN_MODE_LOCK, to.as_str())?;
        let current = self.coordination().read(RUN_MODE_KEY)?;
        let from = match &current {
            Some(v) => RunMode::parse(&String::from_utf8_lossy(&v.data))?,
            None => RunMode::Running,
        };
        if from != to {
            let expected = current.as_ref().map(|v| v.version);
            match self.coordination().write_if_version(
                RUN_MODE_KEY,
                expected,
                to.as_str().as_bytes().to_vec(),
            )? {
                WriteOutcome::Applied { version } => {
                    info!(from = from.as_str(), to = to.as_str(), version, "cluster run mode recorded");
                }
                WriteOutcome::Conflict { current } => {
                    return Err(SysprocError::Coordination(format!(
                        "run mode changed concurrently: expected version {expected:?}, found {current:?}"
                    )));
                }
            }
        }

        // hosts that missed an earlier change catch up here
        let plan = Plan::distribute_aggregate(
            Fragment::distribute(SET_RUN_MODE, dep(SET_RUN_MODE))
                .with_parameters(ParameterSet::new(vec![Value::from(to.as_str())])),
            Fragment::aggregate(SET_RUN_MODE_RESULTS, dep(SET_RUN_MODE_RESULTS), vec![dep(
                SET_RUN_MODE,
            )]),
        )?;
        let table = self
            .run_plan("set_run_mode", &plan, dep(SET_RUN_MODE_RESULTS))
            .await?;
        let changed = count_applied(&table)?;
        let verb = match to {
            RunMode::Paused => "paused",
            RunMode::Running => "resumed",
        };
        let message = if from == to && changed == 0 {
            format!("cluster already {}", to.as_str().to_ascii_lowercase())
        } else {
            format!("cluster {verb}; {changed} host(s) changed mode")
        };
        status_table(0, message)
    }
}
