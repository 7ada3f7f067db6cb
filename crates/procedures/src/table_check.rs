//! Table consistency check.
//!
//! Every site verifies the rows it holds: values must fit the column types,
//! and rows of partitioned tables must hash to the site's own partition.
//! Each site also checks its own replica of every replicated table; the
//! aggregate fingerprints the replicas and fails the ones that diverge from
//! the majority copy.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use arrow::record_batch::RecordBatch;
use sysproc_common::{HostId, PartitionId, Result, Value};
use sysproc_execution::table::{FAILURE, SUCCESS, i64_column, string_column};
use sysproc_execution::{
    DedupResultSet, DependencyTables, FragmentRegistry, SiteContext, rows_to_batch, schemas,
};
use sysproc_planner::{Fragment, ParameterSet, Plan};
use sysproc_storage::{Row, TableDef};
use tracing::{info, warn};

use crate::ids::{TABLE_CHECK, TABLE_CHECK_RESULTS, dep};
use crate::system::SystemProcedures;

pub(crate) fn register(registry: &FragmentRegistry) {
    registry.register_fn(TABLE_CHECK, check_tables);
    registry.register_fn(TABLE_CHECK_RESULTS, merge_checks);
}

fn malformed(table: &TableDef, row: &Row) -> bool {
    row.len() != table.columns.len()
        || table.columns.iter().zip(row).any(|(col, v)| {
            !col.column_type.accepts(v) || (matches!(v, Value::Null) && !col.nullable)
        })
}

/// Order-independent fingerprint of a replica's contents.
fn replica_digest(rows: &[Row]) -> i64 {
    let mut rendered = rows.iter().map(|r| format!("{r:?}")).collect::<Vec<_>>();
    rendered.sort();
    let mut hasher = DefaultHasher::new();
    rendered.hash(&mut hasher);
    hasher.finish() as i64
}

fn check_table(ctx: &SiteContext, table: &TableDef, rows: &[Row]) -> Vec<String> {
    let mut problems = Vec::new();
    let bad_shape = rows.iter().filter(|r| malformed(table, r)).count();
    if bad_shape > 0 {
        problems.push(format!("{bad_shape} row(s) do not match the table columns"));
    }
    if let Some(pcol) = table.partition_column.as_deref() {
        let Some(idx) = table.column_index(pcol) else {
            problems.push(format!("partition column {pcol} does not exist"));
            return problems;
        };
        let misrouted = rows
            .iter()
            .filter_map(|row| row.get(idx))
            .filter(|key| ctx.router.partition_for(key).ok() != Some(ctx.partition_id))
            .count();
        if misrouted > 0 {
            problems.push(format!("{misrouted} row(s) belong to another partition"));
        }
    }
    problems
}

fn check_tables(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    _params: &ParameterSet,
) -> Result<RecordBatch> {
    let catalog = ctx.catalog();
    let mut rows = Vec::new();
    for table in catalog.tables() {
        let stored = ctx.store.scan(table)?;
        let problems = check_table(ctx, table, &stored);
        if !problems.is_empty() {
            warn!(
                site_id = %ctx.site_id,
                table = %table.name,
                problems = %problems.join("; "),
                "table check failed"
            );
        }
        let digest = if table.is_replicated() {
            replica_digest(&stored)
        } else {
            0
        };
        rows.push(vec![
            Value::BigInt(ctx.host_id().0 as i64),
            Value::BigInt(ctx.partition_id.0 as i64),
            Value::Varchar(table.name.clone()),
            Value::from(if problems.is_empty() { SUCCESS } else { FAILURE }),
            Value::Varchar(problems.join("; ")),
            Value::BigInt(stored.len() as i64),
            Value::BigInt(digest),
        ]);
    }
    rows_to_batch(schemas::table_check_detail(), rows)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Replica {
    host: i64,
    partition: i64,
    rows: i64,
    digest: i64,
}

/// Replicas whose (row count, digest) differ from the most common copy.
///
/// Ties go to the copy held by the lowest (host, partition).
fn diverging(mut replicas: Vec<Replica>) -> Vec<(Replica, Replica, usize)> {
    replicas.sort_by_key(|r| (r.host, r.partition));
    let mut votes: BTreeMap<(i64, i64), usize> = BTreeMap::new();
    for r in &replicas {
        *votes.entry((r.rows, r.digest)).or_default() += 1;
    }
    let Some(reference) = replicas.iter().fold(None::<&Replica>, |best, r| match best {
        Some(b) if votes[&(b.rows, b.digest)] >= votes[&(r.rows, r.digest)] => Some(b),
        _ => Some(r),
    }) else {
        return Vec::new();
    };
    let agreeing = votes[&(reference.rows, reference.digest)];
    let reference = reference.clone();
    replicas
        .into_iter()
        .filter(|r| (r.rows, r.digest) != (reference.rows, reference.digest))
        .map(|r| (r, reference.clone(), agreeing))
        .collect()
}

fn merge_checks(
    ctx: &SiteContext,
    inputs: &DependencyTables,
    _params: &ParameterSet,
) -> Result<RecordBatch> {
    let catalog = ctx.catalog();
    let mut merged = DedupResultSet::new();
    let mut replicas: BTreeMap<String, Vec<Replica>> = BTreeMap::new();
    for batch in inputs.require(dep(TABLE_CHECK))?.iter().map(|p| &p.table) {
        merged.add_table(batch)?;
        let hosts = i64_column(batch, "HOST_ID")?;
        let partitions = i64_column(batch, "PARTITION_ID")?;
        let tables = string_column(batch, "TABLE")?;
        let counts = i64_column(batch, "ROW_COUNT")?;
        let digests = i64_column(batch, "ROW_DIGEST")?;
        for i in 0..batch.num_rows() {
            if !catalog.get(&tables[i])?.is_replicated() {
                continue;
            }
            replicas.entry(tables[i].clone()).or_default().push(Replica {
                host: hosts[i],
                partition: partitions[i],
                rows: counts[i],
                digest: digests[i],
            });
        }
    }
    for (table, copies) in replicas {
        for (bad, reference, agreeing) in diverging(copies) {
            warn!(
                table = %table,
                host_id = bad.host,
                partition_id = bad.partition,
                rows = bad.rows,
                expected_rows = reference.rows,
                "replica diverges"
            );
            merged.add(
                HostId(bad.host as u32),
                PartitionId(bad.partition as u32),
                &table,
                false,
                &format!(
                    "replica holds {} row(s) and differs from {agreeing} matching replica(s) holding {} row(s)",
                    bad.rows, reference.rows
                ),
            );
        }
    }
    merged.to_batch()
}

impl SystemProcedures {
    /// Check every table on every site.
    ///
    /// Answers `HOST_ID, PARTITION_ID, TABLE, RESULT, ERR_MSG`, one row per
    /// (host, partition, table); replicated tables report one row per
    /// physical replica.
    pub async fn check_tables(&self) -> Result<RecordBatch> {
        let plan = Plan::distribute_aggregate(
            Fragment::distribute(TABLE_CHECK, dep(TABLE_CHECK)),
            Fragment::aggregate(TABLE_CHECK_RESULTS, dep(TABLE_CHECK_RESULTS), vec![dep(
                TABLE_CHECK,
            )]),
        )?;
        let table = self
            .run_plan("check_tables", &plan, dep(TABLE_CHECK_RESULTS))
            .await?;
        let failures = string_column(&table, "RESULT")?
            .iter()
            .filter(|r| r.as_str() == FAILURE)
            .count();
        info!(rows = table.num_rows(), failures, "table check finished");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(partition: i64, rows: i64, digest: i64) -> Replica {
        Replica {
            host: partition / 2,
            partition,
            rows,
            digest,
        }
    }

    #[test]
    fn majority_copy_wins() {
        let bad = diverging(vec![
            replica(2, 5, 7),
            replica(0, 5, 7),
            replica(1, 6, 9),
        ]);
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].0.partition, 1);
        assert_eq!(bad[0].1.rows, 5);
        assert_eq!(bad[0].2, 2);
    }

    #[test]
    fn ties_go_to_the_lowest_replica() {
        let bad = diverging(vec![replica(1, 6, 9), replica(0, 5, 7)]);
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].0.partition, 1);
        assert!(diverging(vec![replica(0, 5, 7), replica(1, 5, 7)]).is_empty());
        assert!(diverging(Vec::new()).is_empty());
    }

    #[test]
    fn digest_ignores_row_order() {
        let a = vec![Value::BigInt(1), Value::from("a")];
        let b = vec![Value::BigInt(2), Value::from("b")];
        assert_eq!(
            replica_digest(&[a.clone(), b.clone()]),
            replica_digest(&[b.clone(), a.clone()])
        );
        assert_ne!(replica_digest(&[a.clone()]), replica_digest(&[a, b]));
    }
}
