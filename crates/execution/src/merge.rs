//! Merge routines used by aggregate fragments.
//!
//! Partial tables arrive in no particular order; every routine here is
//! insensitive to arrival order or imposes a canonical order itself.

use std::collections::BTreeMap;
use std::fmt::Display;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use sysproc_common::{DependencyId, HostId, PartitionId, Result, SiteId, SysprocError, Value};

use crate::dependency::DependencyTables;
use crate::table::{FAILURE, SUCCESS, i64_column, rows_to_batch, schemas, string_column};

/// Concatenate partial tables that share `schema`.
pub fn union_tables(schema: &SchemaRef, tables: &[RecordBatch]) -> Result<RecordBatch> {
    for t in tables {
        if t.schema().fields() != schema.fields() {
            return Err(SysprocError::Execution(format!(
                "cannot union table with schema {:?} into {:?}",
                t.schema().fields(),
                schema.fields()
            )));
        }
    }
    concat_batches(schema, tables)
        .map_err(|e| SysprocError::Execution(format!("union of partial tables failed: {e}")))
}

/// Union every partial table filed under `dependency`.
pub fn union_dependency(
    inputs: &DependencyTables,
    dependency: DependencyId,
    schema: &SchemaRef,
) -> Result<RecordBatch> {
    union_tables(schema, &inputs.batches(dependency))
}

/// How replicated values are reduced to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// All replicas must report the same value.
    Equal,
    Min,
    Max,
}

/// Reduce per-site values of one replicated quantity.
///
/// With [`Reconcile::Equal`] any disagreement is a hard error naming both sites.
pub fn reconcile<T>(what: &str, mode: Reconcile, values: &[(SiteId, T)]) -> Result<T>
where
    T: Ord + Copy + Display,
{
    let Some((first_site, first)) = values.first().copied() else {
        return Err(SysprocError::Execution(format!(
            "no replica reported {what}"
        )));
    };
    match mode {
        Reconcile::Equal => {
            if let Some((site, v)) = values.iter().find(|(_, v)| *v != first) {
                return Err(SysprocError::Reconciliation(format!(
                    "{what}: site {first_site} reported {first}, site {site} reported {v}"
                )));
            }
            Ok(first)
        }
        Reconcile::Min => Ok(values.iter().map(|(_, v)| *v).min().unwrap_or(first)),
        Reconcile::Max => Ok(values.iter().map(|(_, v)| *v).max().unwrap_or(first)),
    }
}

/// Checked sum of per-partition counts.
pub fn sum_counts(what: &str, values: impl IntoIterator<Item = i64>) -> Result<i64> {
    values.into_iter().try_fold(0i64, |acc, v| {
        acc.checked_add(v)
            .ok_or_else(|| SysprocError::Execution(format!("{what} overflowed while summing")))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MergedRow {
    success: bool,
    messages: Vec<String>,
}

impl MergedRow {
    fn absorb(&mut self, success: bool, message: &str) {
        self.success &= success;
        if !message.is_empty() {
            self.messages.push(message.to_string());
        }
    }
}

/// Per-(host, partition, table) outcome table.
///
/// Success flags are AND-ed and every non-empty message is kept, in
/// arrival order, joined with `" | "`. Rows are emitted in key order.
#[derive(Debug, Clone, Default)]
pub struct DedupResultSet {
    rows: BTreeMap<(i64, i64, String), MergedRow>,
}

impl DedupResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        host: HostId,
        partition: PartitionId,
        table: &str,
        success: bool,
        message: &str,
    ) {
        self.add_raw(host.0 as i64, partition.0 as i64, table, success, message);
    }

    fn add_raw(&mut self, host: i64, partition: i64, table: &str, success: bool, message: &str) {
        self.rows
            .entry((host, partition, table.to_string()))
            .or_insert_with(|| MergedRow {
                success: true,
                messages: Vec::new(),
            })
            .absorb(success, message);
    }

    /// Fold in a table with the `table_check` column contract.
    pub fn add_table(&mut self, batch: &RecordBatch) -> Result<()> {
        let hosts = i64_column(batch, "HOST_ID")?;
        let partitions = i64_column(batch, "PARTITION_ID")?;
        let tables = string_column(batch, "TABLE")?;
        let results = string_column(batch, "RESULT")?;
        let messages = string_column(batch, "ERR_MSG")?;
        for i in 0..batch.num_rows() {
            self.add_raw(
                hosts[i],
                partitions[i],
                &tables[i],
                results[i] == SUCCESS,
                &messages[i],
            );
        }
        Ok(())
    }

    pub fn all_succeeded(&self) -> bool {
        self.rows.values().all(|r| r.success)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_batch(&self) -> Result<RecordBatch> {
        let rows = self
            .rows
            .iter()
            .map(|((host, partition, table), r)| {
                vec![
                    Value::BigInt(*host),
                    Value::BigInt(*partition),
                    Value::Varchar(table.clone()),
                    Value::from(if r.success { SUCCESS } else { FAILURE }),
                    Value::Varchar(r.messages.join(" | ")),
                ]
            })
            .collect();
        rows_to_batch(schemas::table_check(), rows)
    }
}
