//! Row migration: move matching rows into a column-compatible table, a
//! bounded chunk at a time.

use arrow::record_batch::RecordBatch;
use sysproc_common::{Result, SysprocError, Value};
use sysproc_execution::{DependencyTables, FragmentRegistry, SiteContext, rows_to_batch, schemas};
use sysproc_planner::ParameterSet;
use sysproc_storage::TableDef;
use tracing::{info, warn};

use crate::chunked::{
    ChunkJob, ChunkedConfig, aggregate_progress, chunk_parameters, decode_chunk_parameters,
    progress_table,
};
use crate::ids::{MIGRATE_AGGREGATOR, MIGRATE_CHUNK};
use crate::nibble_delete::{ChunkedResult, validate_chunked};
use crate::system::SystemProcedures;

#[derive(Debug, Clone, PartialEq)]
pub struct MigrateRowsRequest {
    pub source: String,
    pub target: String,
    pub column: String,
    pub comparison: String,
    pub value: Value,
    pub chunk_size: i64,
}

pub(crate) fn register(registry: &FragmentRegistry) {
    registry.register_fn(MIGRATE_CHUNK, migrate_chunk);
    registry.register_fn(
        MIGRATE_AGGREGATOR,
        |_: &SiteContext, inputs: &DependencyTables, params: &ParameterSet| {
            aggregate_progress(MIGRATE_CHUNK, inputs, params)
        },
    );
}

fn migrate_chunk(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let catalog = ctx.catalog();
    let (source, predicate, chunk) = decode_chunk_parameters(&catalog, params)?;
    let target = catalog.get(params.get_str(5, "target")?)?;
    let rows = ctx.store.take_matching(source, &predicate, chunk)?;
    let moved = rows.len() as u64;
    if let Err(e) = ctx.store.insert_rows(target, rows.clone()) {
        // return the chunk to the source
        if let Err(restore) = ctx.store.insert_rows(source, rows) {
            warn!(
                site_id = %ctx.site_id,
                table = %source.name,
                error = %restore,
                "could not restore rows after a failed migration chunk"
            );
        }
        return Err(e);
    }
    let left = ctx.store.count_matching(source, &predicate)?;
    progress_table(ctx, moved, left)
}

/// Both tables must hold rows of the same shape, partitioned the same way.
fn validate_target(source: &TableDef, target: &TableDef) -> Result<()> {
    if source.name.eq_ignore_ascii_case(&target.name) {
        return Err(SysprocError::Validation(format!(
            "cannot migrate rows of {} into itself",
            source.name
        )));
    }
    if !source.is_column_compatible(target) {
        return Err(SysprocError::Validation(format!(
            "table {} is not column compatible with {}",
            target.name, source.name
        )));
    }
    let same_partitioning = match (&source.partition_column, &target.partition_column) {
        (None, None) => true,
        (Some(s), Some(t)) => source.column_index(s) == target.column_index(t),
        _ => false,
    };
    if !same_partitioning {
        return Err(SysprocError::Validation(format!(
            "tables {} and {} are not partitioned on the same column",
            source.name, target.name
        )));
    }
    Ok(())
}

impl SystemProcedures {
    /// Move rows of `request.source` matching the predicate into `request.target`.
    ///
    /// Answers `MIGRATED_ROWS, LEFT_ROWS`.
    pub async fn migrate_rows(
        &self,
        request: &MigrateRowsRequest,
        config: &ChunkedConfig,
    ) -> Result<ChunkedResult> {
        let catalog = self.catalog();
        let (source, predicate, chunk) = validate_chunked(
            &catalog,
            &request.source,
            &request.column,
            &request.comparison,
            &request.value,
            request.chunk_size,
        )?;
        let target = catalog.get(&request.target)?;
        validate_target(source, target)?;
        info!(
            source = %source.name,
            target = %target.name,
            column = %predicate.column,
            op = predicate.op.symbol(),
            chunk_size = chunk,
            "row migration started"
        );
        let job = ChunkJob {
            procedure: "migrate_rows",
            chunk_fragment: MIGRATE_CHUNK,
            aggregate_fragment: MIGRATE_AGGREGATOR,
            table: source,
            parameters: chunk_parameters(
                source,
                &predicate,
                chunk,
                vec![Value::Varchar(target.name.clone())],
            ),
        };
        let totals = self.run_chunk_job(&job, config).await?;
        let table = rows_to_batch(
            schemas::migrated_left(),
            vec![vec![
                Value::BigInt(totals.processed as i64),
                Value::BigInt(totals.left as i64),
            ]],
        )?;
        Ok(ChunkedResult { table, totals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysproc_storage::{ColumnDef, ColumnType};

    fn table(name: &str, partition: Option<&str>, second: ColumnType) -> TableDef {
        TableDef {
            name: name.to_string(),
            columns: vec![
                ColumnDef::new("ID", ColumnType::BigInt),
                ColumnDef::new("V", second),
            ],
            partition_column: partition.map(str::to_string),
            indexes: Vec::new(),
        }
    }

    #[test]
    fn target_must_match_shape_and_partitioning() {
        let src = table("A", Some("ID"), ColumnType::Varchar);
        assert!(validate_target(&src, &table("B", Some("ID"), ColumnType::Varchar)).is_ok());
        assert!(validate_target(&src, &table("a", Some("ID"), ColumnType::Varchar)).is_err());
        assert!(validate_target(&src, &table("B", Some("ID"), ColumnType::BigInt)).is_err());
        assert!(validate_target(&src, &table("B", None, ColumnType::Varchar)).is_err());
        assert!(validate_target(&src, &table("B", Some("V"), ColumnType::Varchar)).is_err());
    }
}
