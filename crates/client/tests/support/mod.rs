#![allow(dead_code)]

use arrow::record_batch::RecordBatch;
use sysproc_client::Engine;
use sysproc_client::demo::{demo_catalog, load_demo_data};
use sysproc_common::ClusterConfig;
use sysproc_execution::table::{i64_column, string_column};
use sysproc_procedures::UnknownResponsePolicy;

pub fn config(hosts: u32, sites_per_host: u32) -> ClusterConfig {
    ClusterConfig {
        host_count: hosts,
        sites_per_host,
        chunked_default_chunk_size: 64,
        ..ClusterConfig::default()
    }
}

/// Demo engine with `events` rows loaded.
pub fn demo_engine(hosts: u32, sites_per_host: u32, events: u64) -> Engine {
    let engine = Engine::builder(config(hosts, sites_per_host))
        .catalog(demo_catalog())
        .unknown_policy(UnknownResponsePolicy::Fail)
        .build()
        .expect("engine");
    load_demo_data(&engine, events).expect("demo data");
    engine
}

pub fn total_rows(engine: &Engine, table: &str) -> u64 {
    engine
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
