#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arrow::record_batch::RecordBatch;
use sysproc_common::{ClusterConfig, Value};
use sysproc_distributed::LocalCluster;
use sysproc_execution::FragmentRegistry;
use sysproc_execution::table::{i64_column, string_column};
use sysproc_procedures::{
    ChunkedConfig, NibbleDeleteRequest, SystemProcedures, UnknownResponsePolicy, system_registry,
};
use sysproc_storage::{Catalog, ColumnDef, ColumnType, IndexDef, Row, TableDef};

pub const EVENTS: &str = "EVENTS";
pub const EVENTS_ARCHIVE: &str = "EVENTS_ARCHIVE";
pub const REGIONS: &str = "REGIONS";

fn events_table(name: &str) -> TableDef {
    TableDef {
        name: name.to_string(),
        columns: vec![
            ColumnDef::new("ID", ColumnType::BigInt),
            ColumnDef::new("TS", ColumnType::BigInt),
            ColumnDef {
                nullable: true,
                ..ColumnDef::new("NOTE", ColumnType::Varchar)
            },
        ],
        partition_column: Some("ID".to_string()),
        indexes: vec![IndexDef {
            name: format!("{name}_TS"),
            columns: vec!["TS".to_string()],
            ordered: true,
        }],
    }
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register_table(events_table(EVENTS));
    catalog.register_table(events_table(EVENTS_ARCHIVE));
    catalog.register_table(TableDef {
        name: REGIONS.to_string(),
        columns: vec![
            ColumnDef::new("ID", ColumnType::BigInt),
            ColumnDef::new("NAME", ColumnType::Varchar),
        ],
        partition_column: None,
        indexes: vec![IndexDef {
            name: "REGIONS_PK".to_string(),
            columns: vec!["ID".to_string()],
            ordered: true,
        }],
    });
    catalog
}

pub fn config(hosts: u32, sites_per_host: u32) -> ClusterConfig {
    ClusterConfig {
        host_count: hosts,
        sites_per_host,
        ..ClusterConfig::default()
    }
}

pub fn cluster_with(hosts: u32, sites_per_host: u32, registry: Arc<FragmentRegistry>) -> LocalCluster {
    LocalCluster::builder(config(hosts, sites_per_host))
        .catalog(catalog())
        .registry(registry)
        .build()
        .expect("cluster")
}

pub fn cluster(hosts: u32, sites_per_host: u32) -> LocalCluster {
    cluster_with(hosts, sites_per_host, system_registry())
}

pub fn procedures(cluster: &LocalCluster) -> SystemProcedures {
    SystemProcedures::new(cluster)
}

/// `n` event rows with `ID == TS == i`.
pub fn event_rows(n: i64) -> Vec<Row> {
    (0..n)
        .map(|i| {
            vec![
                Value::BigInt(i),
                Value::BigInt(i),
                Value::Varchar(format!("event {i}")),
            ]
        })
        .collect()
}

pub fn region_rows(n: i64) -> Vec<Row> {
    (0..n)
        .map(|i| vec![Value::BigInt(i), Value::Varchar(format!("region {i}"))])
        .collect()
}

pub fn delete_request(table: &str, comparison: &str, value: i64, chunk: i64) -> NibbleDeleteRequest {
    NibbleDeleteRequest {
        table: table.to_string(),
        column: if table == REGIONS { "ID" } else { "TS" }.to_string(),
        comparison: comparison.to_string(),
        value: Value::BigInt(value),
        chunk_size: chunk,
    }
}

pub fn chunked(timeout: Duration) -> ChunkedConfig {
    ChunkedConfig::new(timeout, UnknownResponsePolicy::Fail)
}

pub fn total_rows(cluster: &LocalCluster, table: &str) -> u64 {
    cluster
        .row_counts(table)
        .expect("row counts")
        .iter()
        .map(|(_, n)| *n)
        .sum()
}

pub fn ints(batch: &RecordBatch, column: &str) -> Vec<i64> {
    i64_column(batch, column).expect("int column")
}

pub fn strings(batch: &RecordBatch, column: &str) -> Vec<String> {
    string_column(batch, column).expect("string column")
}

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}_{nanos}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
