//! Iterative chunked operations.
//!
//! A chunked procedure repeats a bounded plan until no matching rows remain
//! or its wall-clock budget is spent:
//! - the first round always runs; the deadline is checked between rounds;
//! - a round that processes nothing while rows remain is logged as a stall
//!   and the loop keeps going;
//! - a failing round aborts the loop and the accumulated counts are lost.
//!
//! Partitioned tables are processed with one single-partition plan per
//! partition per round, routed through the hashinator. Replicated tables use
//! one all-partition plan per round whose replicas must agree.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;
use sysproc_common::metrics::global_metrics;
use sysproc_common::{ClusterConfig, FragmentId, PartitionId, Result, SiteId, SysprocError, Value};
use sysproc_execution::table::i64_column;
use sysproc_execution::{
    DependencyTables, Reconcile, SiteContext, reconcile, rows_to_batch, schemas, sum_counts,
};
use sysproc_planner::{Fragment, ParameterSet, Plan};
use sysproc_storage::{Catalog, ComparisonOp, RowPredicate, TableDef};
use tracing::{debug, info, warn};

use crate::ids::dep;
use crate::response::{UnknownResponsePolicy, call_with_timeout};
use crate::system::SystemProcedures;

/// Budget and response handling for one chunked procedure call.
#[derive(Debug, Clone)]
pub struct ChunkedConfig {
    /// Wall-clock budget, checked between rounds.
    pub timeout: Duration,
    /// Deadline for each round's plan; `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub unknown_policy: UnknownResponsePolicy,
}

impl ChunkedConfig {
    pub fn new(timeout: Duration, unknown_policy: UnknownResponsePolicy) -> Self {
        Self {
            timeout,
            call_timeout: None,
            unknown_policy,
        }
    }

    pub fn from_cluster(config: &ClusterConfig, unknown_policy: UnknownResponsePolicy) -> Self {
        Self {
            timeout: Duration::from_millis(config.chunked_timeout_ms),
            call_timeout: (config.fragment_response_timeout_ms > 0)
                .then(|| Duration::from_millis(config.fragment_response_timeout_ms)),
            unknown_policy,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

/// Outcome of one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundProgress {
    pub processed: u64,
    pub left: u64,
    /// Calls in this round whose response never arrived.
    pub unknown_calls: u64,
}

/// Accumulated outcome of a chunked loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkedTotals {
    pub processed: u64,
    /// Rows left after the last round.
    pub left: u64,
    pub rounds: u64,
    pub stalled_rounds: u64,
    pub unknown_calls: u64,
}

/// Round bookkeeping for a chunked procedure.
#[derive(Debug)]
pub struct ChunkedLoop {
    procedure: &'static str,
    started: Instant,
    timeout: Duration,
    totals: ChunkedTotals,
}

impl ChunkedLoop {
    pub fn new(procedure: &'static str, timeout: Duration) -> Self {
        Self {
            procedure,
            started: Instant::now(),
            timeout,
            totals: ChunkedTotals::default(),
        }
    }

    pub fn totals(&self) -> &ChunkedTotals {
        &self.totals
    }

    /// Fold in a finished round. Returns `false` once the loop should stop.
    pub fn record(&mut self, round: RoundProgress) -> bool {
        self.totals.rounds += 1;
        self.totals.processed += round.processed;
        self.totals.left = round.left;
        self.totals.unknown_calls += round.unknown_calls;
        global_metrics().record_chunked_round(self.procedure, round.processed);
        debug!(
            procedure = self.procedure,
            round = self.totals.rounds,
            processed = round.processed,
            left = round.left,
            unknown_calls = round.unknown_calls,
            "chunk round finished"
        );

        if round.processed == 0 && round.left > 0 && round.unknown_calls == 0 {
            self.totals.stalled_rounds += 1;
            global_metrics().inc_chunked_stalls(self.procedure);
            warn!(
                procedure = self.procedure,
                round = self.totals.rounds,
                left = round.left,
                "chunk round made no progress while rows remain"
            );
        }
        if round.left == 0 && round.unknown_calls == 0 {
            return false;
        }
        if self.started.elapsed() >= self.timeout {
            info!(
                procedure = self.procedure,
                rounds = self.totals.rounds,
                left = round.left,
                timeout_ms = self.timeout.as_millis() as u64,
                "chunked operation stopped at its deadline"
            );
            return false;
        }
        true
    }

    /// Log the abort of the loop and hand `err` back.
    pub fn abort(&self, err: SysprocError) -> SysprocError {
        warn!(
            procedure = self.procedure,
            rounds = self.totals.rounds,
            processed = self.totals.processed,
            error = %err,
            "chunked operation aborted; accumulated counts discarded"
        );
        err
    }

    pub fn finish(self) -> ChunkedTotals {
        info!(
            procedure = self.procedure,
            rounds = self.totals.rounds,
            processed = self.totals.processed,
            left = self.totals.left,
            stalled_rounds = self.totals.stalled_rounds,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "chunked operation finished"
        );
        self.totals
    }
}

/// Chunk fragment parameters shared by every chunked procedure:
/// `[table, column, operator, value, chunk_size, extra...]`.
pub(crate) fn chunk_parameters(
    table: &TableDef,
    predicate: &RowPredicate,
    chunk_size: u64,
    extra: Vec<Value>,
) -> ParameterSet {
    let mut values = vec![
        Value::Varchar(table.name.clone()),
        Value::Varchar(predicate.column.clone()),
        Value::Varchar(predicate.op.symbol().to_string()),
        predicate.value.clone(),
        Value::BigInt(chunk_size as i64),
    ];
    values.extend(extra);
    ParameterSet::new(values)
}

/// Site-side decoding of [`chunk_parameters`].
pub(crate) fn decode_chunk_parameters<'c>(
    catalog: &'c Catalog,
    params: &ParameterSet,
) -> Result<(&'c TableDef, RowPredicate, u64)> {
    let table = catalog.get(params.get_str(0, "table")?)?;
    let op = ComparisonOp::parse(params.get_str(2, "operator")?)?;
    let predicate = RowPredicate::new(
        params.get_str(1, "column")?,
        op,
        params.get(3, "value")?.clone(),
    );
    let chunk = u64::try_from(params.get_i64(4, "chunk_size")?)
        .map_err(|e| SysprocError::Execution(format!("invalid chunk size parameter: {e}")))?;
    Ok((table, predicate, chunk))
}

/// One-row `chunk_progress` table for this site's partition.
pub(crate) fn progress_table(ctx: &SiteContext, processed: u64, left: u64) -> Result<RecordBatch> {
    rows_to_batch(
        schemas::chunk_progress(),
        vec![vec![
            Value::BigInt(ctx.partition_id.0 as i64),
            Value::BigInt(processed as i64),
            Value::BigInt(left as i64),
        ]],
    )
}

/// Aggregate of a chunk fragment's progress tables.
///
/// Parameter 0 says whether the table is replicated: replicas must report
/// identical counts, partitions are summed.
pub(crate) fn aggregate_progress(
    chunk_fragment: FragmentId,
    inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let replicated = params.get_bool(0, "replicated")?;
    let mut processed = Vec::new();
    let mut left = Vec::new();
    for partial in inputs.require(dep(chunk_fragment))? {
        let p = i64_column(&partial.table, "PROCESSED_ROWS")?;
        let l = i64_column(&partial.table, "LEFT_ROWS")?;
        processed.extend(p.into_iter().map(|v| (partial.site_id, v)));
        left.extend(l.into_iter().map(|v| (partial.site_id, v)));
    }
    let (processed, left) = if replicated {
        (
            reconcile("rows processed by replicas", Reconcile::Equal, &processed)?,
            reconcile("rows left on replicas", Reconcile::Equal, &left)?,
        )
    } else {
        (
            sum_counts("rows processed", values(&processed))?,
            sum_counts("rows left", values(&left))?,
        )
    };
    rows_to_batch(
        schemas::chunk_progress(),
        vec![vec![
            Value::BigInt(merge_partition_id(inputs, chunk_fragment)),
            Value::BigInt(processed),
            Value::BigInt(left),
        ]],
    )
}

fn values(pairs: &[(SiteId, i64)]) -> impl Iterator<Item = i64> + '_ {
    pairs.iter().map(|(_, v)| *v)
}

/// The producing partition when exactly one site answered, `-1` otherwise.
fn merge_partition_id(inputs: &DependencyTables, chunk_fragment: FragmentId) -> i64 {
    match inputs.get(dep(chunk_fragment)) {
        [one] => i64_column(&one.table, "PARTITION_ID")
            .ok()
            .and_then(|v| v.first().copied())
            .unwrap_or(-1),
        _ => -1,
    }
}

fn round_progress(table: &RecordBatch) -> Result<RoundProgress> {
    let processed = i64_column(table, "PROCESSED_ROWS")?;
    let left = i64_column(table, "LEFT_ROWS")?;
    let (Some(processed), Some(left)) = (processed.first(), left.first()) else {
        return Err(SysprocError::Execution(
            "chunk aggregate returned no rows".to_string(),
        ));
    };
    let to_u64 = |v: i64, what: &str| {
        u64::try_from(v)
            .map_err(|_| SysprocError::Execution(format!("negative {what} count {v}")))
    };
    Ok(RoundProgress {
        processed: to_u64(*processed, "processed")?,
        left: to_u64(*left, "left")?,
        unknown_calls: 0,
    })
}

/// A chunked operation over one table.
#[derive(Debug)]
pub(crate) struct ChunkJob<'a> {
    pub procedure: &'static str,
    pub chunk_fragment: FragmentId,
    pub aggregate_fragment: FragmentId,
    pub table: &'a TableDef,
    pub parameters: ParameterSet,
}

impl ChunkJob<'_> {
    fn plan(&self, partition: Option<PartitionId>) -> Result<Plan> {
        let mut chunk = Fragment::distribute(self.chunk_fragment, dep(self.chunk_fragment))
            .with_parameters(self.parameters.clone());
        if let Some(p) = partition {
            chunk = chunk.on_partition(p);
        }
        let aggregate = Fragment::aggregate(
            self.aggregate_fragment,
            dep(self.aggregate_fragment),
            vec![dep(self.chunk_fragment)],
        )
        .with_parameters(ParameterSet::new(vec![Value::Boolean(partition.is_none())]));
        Plan::distribute_aggregate(chunk, aggregate)
    }
}

impl SystemProcedures {
    /// Run `job` round after round until nothing is left or the budget is spent.
    pub(crate) async fn run_chunk_job(
        &self,
        job: &ChunkJob<'_>,
        config: &ChunkedConfig,
    ) -> Result<ChunkedTotals> {
        let mut chunked = ChunkedLoop::new(job.procedure, config.timeout);
        // `None` until a partition has answered at least once.
        let mut remaining: BTreeMap<PartitionId, Option<u64>> = self
            .topology()
            .partitions()
            .into_iter()
            .map(|p| (p, None))
            .collect();
        loop {
            let round = if job.table.is_replicated() {
                self.replicated_round(job, config, chunked.totals().left)
                    .await
            } else {
                self.partitioned_round(job, config, &mut remaining).await
            };
            let progress = round.map_err(|e| chunked.abort(e))?;
            if !chunked.record(progress) {
                break;
            }
        }
        Ok(chunked.finish())
    }

    async fn replicated_round(
        &self,
        job: &ChunkJob<'_>,
        config: &ChunkedConfig,
        previous_left: u64,
    ) -> Result<RoundProgress> {
        let plan = job.plan(None)?;
        let call = self.run_plan(job.procedure, &plan, dep(job.aggregate_fragment));
        let outcome = call_with_timeout(config.call_timeout, call).await?;
        match outcome.resolve(config.unknown_policy, job.procedure)? {
            Some(table) => round_progress(&table),
            None => Ok(RoundProgress {
                processed: 0,
                left: previous_left,
                unknown_calls: 1,
            }),
        }
    }

    async fn partitioned_round(
        &self,
        job: &ChunkJob<'_>,
        config: &ChunkedConfig,
        remaining: &mut BTreeMap<PartitionId, Option<u64>>,
    ) -> Result<RoundProgress> {
        let mut round = RoundProgress::default();
        for (partition, left) in remaining.iter_mut() {
            if *left == Some(0) {
                continue;
            }
            let key = self.router().routing_key_for(*partition)?;
            let target = self.router().partition_for(&key)?;
            let plan = job.plan(Some(target))?;
            let call = self.run_plan(job.procedure, &plan, dep(job.aggregate_fragment));
            let outcome = call_with_timeout(config.call_timeout, call).await?;
            match outcome.resolve(config.unknown_policy, job.procedure)? {
                Some(table) => {
                    let p = round_progress(&table)?;
                    round.processed += p.processed;
                    *left = Some(p.left);
                }
                None => round.unknown_calls += 1,
            }
        }
        round.left = remaining.values().map(|l| l.unwrap_or(0)).sum();
        Ok(round)
    }
}
