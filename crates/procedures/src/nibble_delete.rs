//! Nibble delete: remove matching rows a bounded chunk at a time.

use arrow::record_batch::RecordBatch;
use sysproc_common::{Result, SysprocError, Value};
use sysproc_execution::{DependencyTables, FragmentRegistry, SiteContext, rows_to_batch, schemas};
use sysproc_planner::ParameterSet;
use sysproc_storage::{Catalog, ComparisonOp, RowPredicate, TableDef};
use tracing::info;

use crate::chunked::{
    ChunkJob, ChunkedConfig, ChunkedTotals, aggregate_progress, chunk_parameters,
    decode_chunk_parameters, progress_table,
};
use crate::ids::{NIBBLE_DELETE_AGGREGATOR, NIBBLE_DELETE_CHUNK};
use crate::system::SystemProcedures;

#[derive(Debug, Clone, PartialEq)]
pub struct NibbleDeleteRequest {
    pub table: String,
    pub column: String,
    /// One of `=`, `<>`, `!=`, `<`, `<=`, `>`, `>=`.
    pub comparison: String,
    pub value: Value,
    pub chunk_size: i64,
}

/// Table contents plus the loop totals behind them.
#[derive(Debug, Clone)]
pub struct ChunkedResult {
    pub table: RecordBatch,
    pub totals: ChunkedTotals,
}

pub(crate) fn register(registry: &FragmentRegistry) {
    registry.register_fn(NIBBLE_DELETE_CHUNK, delete_chunk);
    registry.register_fn(
        NIBBLE_DELETE_AGGREGATOR,
        |_: &SiteContext, inputs: &DependencyTables, params: &ParameterSet| {
            aggregate_progress(NIBBLE_DELETE_CHUNK, inputs, params)
        },
    );
}

fn delete_chunk(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let catalog = ctx.catalog();
    let (table, predicate, chunk) = decode_chunk_parameters(&catalog, params)?;
    let deleted = ctx.store.delete_matching(table, &predicate, chunk)?;
    let left = ctx.store.count_matching(table, &predicate)?;
    progress_table(ctx, deleted, left)
}

/// Catalog checks shared by every chunked procedure.
pub(crate) fn validate_chunked<'c>(
    catalog: &'c Catalog,
    table: &str,
    column: &str,
    comparison: &str,
    value: &Value,
    chunk_size: i64,
) -> Result<(&'c TableDef, RowPredicate, u64)> {
    let def = catalog.get(table)?;
    def.column(column)?;
    if !def.has_ordered_index_on(column) {
        return Err(SysprocError::Validation(format!(
            "column {column} of table {} has no ordered index",
            def.name
        )));
    }
    let op = ComparisonOp::parse(comparison)?;
    if chunk_size <= 0 {
        return Err(SysprocError::Validation(format!(
            "chunk size must be positive, got {chunk_size}"
        )));
    }
    let predicate = RowPredicate::new(column, op, value.clone());
    predicate.bind(def)?;
    Ok((def, predicate, chunk_size as u64))
}

impl SystemProcedures {
    /// Delete every row of `request.table` matching the predicate, in chunks.
    ///
    /// Answers `DELETED_ROWS, LEFT_ROWS`. When the budget runs out first the
    /// counts are partial and `LEFT_ROWS` is non-zero.
    pub async fn nibble_delete(
        &self,
        request: &NibbleDeleteRequest,
        config: &ChunkedConfig,
    ) -> Result<ChunkedResult> {
        let catalog = self.catalog();
        let (table, predicate, chunk) = validate_chunked(
            &catalog,
            &request.table,
            &request.column,
            &request.comparison,
            &request.value,
            request.chunk_size,
        )?;
        info!(
            table = %table.name,
            column = %predicate.column,
            op = predicate.op.symbol(),
            chunk_size = chunk,
            replicated = table.is_replicated(),
            "nibble delete started"
        );
        let job = ChunkJob {
            procedure: "nibble_delete",
            chunk_fragment: NIBBLE_DELETE_CHUNK,
            aggregate_fragment: NIBBLE_DELETE_AGGREGATOR,
            table,
            parameters: chunk_parameters(table, &predicate, chunk, Vec::new()),
        };
        let totals = self.run_chunk_job(&job, config).await?;
        let table = rows_to_batch(
            schemas::deleted_left(),
            vec![vec![
                Value::BigInt(totals.processed as i64),
                Value::BigInt(totals.left as i64),
            ]],
        )?;
        Ok(ChunkedResult { table, totals })
    }
}
