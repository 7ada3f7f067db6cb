use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::RwLock;

use sysproc_common::{Result, SysprocError, Value};

use crate::catalog::TableDef;
use crate::predicate::RowPredicate;

pub type Row = Vec<Value>;

/// Scan/delete/insert primitives over the rows one site holds.
///
/// Every site owns one store. Partitioned tables hold the site's partition
/// slice; replicated tables hold a full copy.
pub trait PartitionStore: Send + Sync + Debug {
    fn row_count(&self, table: &TableDef) -> Result<u64>;

    /// Copy of every row held for `table`, in insertion order.
    fn scan(&self, table: &TableDef) -> Result<Vec<Row>>;

    fn count_matching(&self, table: &TableDef, predicate: &RowPredicate) -> Result<u64>;

    /// Remove and return up to `limit` matching rows, ascending by the
    /// predicate column.
    fn take_matching(
        &self,
        table: &TableDef,
        predicate: &RowPredicate,
        limit: u64,
    ) -> Result<Vec<Row>>;

    fn insert_rows(&self, table: &TableDef, rows: Vec<Row>) -> Result<u64>;

    /// Delete up to `limit` matching rows, ascending by the predicate column.
    fn delete_matching(&self, table: &TableDef, predicate: &RowPredicate, limit: u64) -> Result<u64> {
        Ok(self.take_matching(table, predicate, limit)?.len() as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryPartitionStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryPartitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(table: &TableDef) -> String {
        table.name.to_ascii_uppercase()
    }

    fn check_row(table: &TableDef, row: &[Value]) -> Result<()> {
        if row.len() != table.columns.len() {
            return Err(SysprocError::Execution(format!(
                "row for {} has {} values, expected {}",
                table.name,
                row.len(),
                table.columns.len()
            )));
        }
        for (cell, col) in row.iter().zip(&table.columns) {
            if matches!(cell, Value::Null) && !col.nullable {
                return Err(SysprocError::Execution(format!(
                    "column {}.{} is not nullable",
                    table.name, col.name
                )));
            }
            if !col.column_type.accepts(cell) {
                return Err(SysprocError::Execution(format!(
                    "column {}.{} cannot store {}",
                    table.name,
                    col.name,
                    cell.type_name()
                )));
            }
        }
        Ok(())
    }
}

fn poisoned() -> SysprocError {
    SysprocError::Execution("partition store lock poisoned".to_string())
}

impl PartitionStore for MemoryPartitionStore {
    fn row_count(&self, table: &TableDef) -> Result<u64> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(&Self::key(table)).map(|r| r.len()).unwrap_or(0) as u64)
    }

    fn scan(&self, table: &TableDef) -> Result<Vec<Row>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(&Self::key(table)).cloned().unwrap_or_default())
    }

    fn count_matching(&self, table: &TableDef, predicate: &RowPredicate) -> Result<u64> {
        let col = predicate.bind(table)?;
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .get(&Self::key(table))
            .map(|rows| rows.iter().filter(|r| predicate.matches(r, col)).count())
            .unwrap_or(0) as u64)
    }

    fn take_matching(
        &self,
        table: &TableDef,
        predicate: &RowPredicate,
        limit: u64,
    ) -> Result<Vec<Row>> {
        let col = predicate.bind(table)?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let Some(rows) = tables.get_mut(&Self::key(table)) else {
            return Ok(Vec::new());
        };

        let mut hits = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| predicate.matches(r, col))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        // stable sort keeps insertion order among equal keys
        hits.sort_by(|a, b| {
            rows[*a][col]
                .compare(&rows[*b][col])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

        let selected = hits.iter().copied().collect::<HashSet<_>>();
        let taken = hits.iter().map(|i| rows[*i].clone()).collect::<Vec<_>>();
        let mut idx = 0usize;
        rows.retain(|_| {
            let keep = !selected.contains(&idx);
            idx += 1;
            keep
        });
        Ok(taken)
    }

    fn insert_rows(&self, table: &TableDef, rows: Vec<Row>) -> Result<u64> {
        for row in &rows {
            Self::check_row(table, row)?;
        }
        let n = rows.len() as u64;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.entry(Self::key(table)).or_default().extend(rows);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};
    use crate::predicate::ComparisonOp;

    fn events() -> TableDef {
        TableDef {
            name: "events".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::BigInt),
                ColumnDef::new("ts", ColumnType::BigInt),
            ],
            partition_column: Some("id".to_string()),
            indexes: Vec::new(),
        }
    }

    fn seed(store: &MemoryPartitionStore, table: &TableDef, ts: &[i64]) {
        let rows = ts
            .iter()
            .enumerate()
            .map(|(i, t)| vec![Value::BigInt(i as i64), Value::BigInt(*t)])
            .collect();
        store.insert_rows(table, rows).expect("insert");
    }

    #[test]
    fn take_matching_removes_lowest_keys_first() {
        let store = MemoryPartitionStore::new();
        let t = events();
        seed(&store, &t, &[50, 10, 40, 20, 30, 99]);
        let p = RowPredicate::new("ts", ComparisonOp::Lt, Value::BigInt(45));

        let taken = store.take_matching(&t, &p, 2).expect("take");
        let ts = taken.iter().map(|r| r[1].as_i64().expect("ts")).collect::<Vec<_>>();
        assert_eq!(ts, vec![10, 20]);
        assert_eq!(store.count_matching(&t, &p).expect("count"), 2);
        assert_eq!(store.row_count(&t).expect("rows"), 4);

        assert_eq!(store.delete_matching(&t, &p, 10).expect("delete"), 2);
        assert_eq!(store.count_matching(&t, &p).expect("count"), 0);
        assert_eq!(store.row_count(&t).expect("rows"), 2);
        let left = store.scan(&t).expect("scan");
        assert_eq!(left[0][1], Value::BigInt(50));
        assert_eq!(left[1][1], Value::BigInt(99));
    }

    #[test]
    fn rejects_rows_of_the_wrong_shape() {
        let store = MemoryPartitionStore::new();
        let t = events();
        let err = store
            .insert_rows(&t, vec![vec![Value::BigInt(1)]])
            .expect_err("arity");
        assert!(err.to_string().contains("expected 2"));
        let err = store
            .insert_rows(&t, vec![vec![Value::BigInt(1), Value::from("x")]])
            .expect_err("type");
        assert!(err.to_string().contains("cannot store VARCHAR"));
        assert_eq!(store.row_count(&t).expect("rows"), 0);
    }

    #[test]
    fn predicate_on_unknown_column_is_validation_error() {
        let store = MemoryPartitionStore::new();
        let p = RowPredicate::new("nope", ComparisonOp::Eq, Value::BigInt(1));
        let err = store.count_matching(&events(), &p).expect_err("unknown");
        assert!(err.is_validation());
    }
}
