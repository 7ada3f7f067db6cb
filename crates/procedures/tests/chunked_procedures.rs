use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;
use sysproc_common::{PartitionId, Result, SysprocError, Value};
use sysproc_execution::{DependencyTables, FragmentRegistry, SiteContext, rows_to_batch, schemas};
use sysproc_planner::ParameterSet;
use sysproc_procedures::ids::NIBBLE_DELETE_CHUNK;
use sysproc_procedures::{
    ChunkedConfig, MigrateRowsRequest, UnknownResponsePolicy, system_registry,
};
#[path = "support/mod.rs"]
mod support;

use support::{EVENTS, EVENTS_ARCHIVE, REGIONS};

#[tokio::test]
async fn nibble_delete_runs_ceil_rows_over_chunk_rounds() {
    let cluster = support::cluster(1, 1);
    cluster
        .load_rows(EVENTS, support::event_rows(250))
        .expect("load");
    let procs = support::procedures(&cluster);

    let out = procs
        .nibble_delete(
            &support::delete_request(EVENTS, ">=", 0, 100),
            &support::chunked(Duration::from_secs(60)),
        )
        .await
        .expect("nibble delete");

    assert_eq!(out.totals.rounds, 3);
    assert_eq!(out.totals.processed, 250);
    assert_eq!(out.totals.stalled_rounds, 0);
    assert_eq!(support::ints(&out.table, "DELETED_ROWS"), vec![250]);
    assert_eq!(support::ints(&out.table, "LEFT_ROWS"), vec![0]);
    assert_eq!(support::total_rows(&cluster, EVENTS), 0);
}

#[tokio::test]
async fn zero_timeout_runs_exactly_one_round() {
    let cluster = support::cluster(1, 1);
    cluster
        .load_rows(EVENTS, support::event_rows(250))
        .expect("load");
    let procs = support::procedures(&cluster);

    let out = procs
        .nibble_delete(
            &support::delete_request(EVENTS, ">=", 0, 100),
            &support::chunked(Duration::ZERO),
        )
        .await
        .expect("nibble delete");

    assert_eq!(out.totals.rounds, 1);
    assert_eq!(support::ints(&out.table, "DELETED_ROWS"), vec![100]);
    assert_eq!(support::ints(&out.table, "LEFT_ROWS"), vec![150]);
    assert_eq!(support::total_rows(&cluster, EVENTS), 150);
}

#[tokio::test]
async fn only_matching_rows_are_deleted_across_partitions() {
    let cluster = support::cluster(2, 2);
    cluster
        .load_rows(EVENTS, support::event_rows(400))
        .expect("load");
    let procs = support::procedures(&cluster);

    let out = procs
        .nibble_delete(
            &support::delete_request(EVENTS, "<", 100, 30),
            &support::chunked(Duration::from_secs(60)),
        )
        .await
        .expect("nibble delete");

    assert_eq!(support::ints(&out.table, "DELETED_ROWS"), vec![100]);
    assert_eq!(support::ints(&out.table, "LEFT_ROWS"), vec![0]);
    assert_eq!(support::total_rows(&cluster, EVENTS), 300);
}

#[tokio::test]
async fn replicated_delete_counts_each_row_once() {
    let cluster = support::cluster(1, 3);
    cluster
        .load_rows(REGIONS, support::region_rows(30))
        .expect("load");
    let procs = support::procedures(&cluster);

    let out = procs
        .nibble_delete(
            &support::delete_request(REGIONS, ">=", 0, 10),
            &support::chunked(Duration::from_secs(60)),
        )
        .await
        .expect("nibble delete");

    assert_eq!(out.totals.rounds, 3);
    assert_eq!(support::ints(&out.table, "DELETED_ROWS"), vec![30]);
    for (_, rows) in cluster.row_counts(REGIONS).expect("counts") {
        assert_eq!(rows, 0);
    }
}

#[tokio::test]
async fn diverged_replicas_fail_the_round() {
    let cluster = support::cluster(1, 2);
    cluster
        .load_rows(REGIONS, support::region_rows(5))
        .expect("load");
    let def = cluster.catalog().get(REGIONS).expect("table").clone();
    cluster.sites()[1]
        .context()
        .store
        .insert_rows(&def, vec![vec![Value::BigInt(99), Value::from("stray")]])
        .expect("stray row");
    let procs = support::procedures(&cluster);

    let err = procs
        .nibble_delete(
            &support::delete_request(REGIONS, ">=", 0, 100),
            &support::chunked(Duration::from_secs(60)),
        )
        .await
        .expect_err("replicas disagree");
    assert!(matches!(err, SysprocError::Reconciliation(_)), "{err}");
}

#[tokio::test]
async fn site_failure_aborts_the_loop() {
    let registry = system_registry();
    registry.register_fn(
        NIBBLE_DELETE_CHUNK,
        |ctx: &SiteContext, _: &DependencyTables, _: &ParameterSet| {
            if ctx.partition_id == PartitionId(1) {
                return Err(SysprocError::Execution("partition offline".to_string()));
            }
            rows_to_batch(
                schemas::chunk_progress(),
                vec![vec![
                    Value::BigInt(ctx.partition_id.0 as i64),
                    Value::BigInt(0),
                    Value::BigInt(0),
                ]],
            )
        },
    );
    let cluster = support::cluster_with(1, 2, registry);
    cluster
        .load_rows(EVENTS, support::event_rows(20))
        .expect("load");
    let procs = support::procedures(&cluster);

    let err = procs
        .nibble_delete(
            &support::delete_request(EVENTS, ">=", 0, 5),
            &support::chunked(Duration::from_secs(60)),
        )
        .await
        .expect_err("partition 1 fails");
    assert!(err.is_mid_flight());
    assert!(err.to_string().contains("partition offline"));
    assert_eq!(support::total_rows(&cluster, EVENTS), 20);
}

fn progress(ctx: &SiteContext, processed: i64, left: i64) -> Result<RecordBatch> {
    rows_to_batch(
        schemas::chunk_progress(),
        vec![vec![
            Value::BigInt(ctx.partition_id.0 as i64),
            Value::BigInt(processed),
            Value::BigInt(left),
        ]],
    )
}

/// Registry whose delete chunk answers only after `delay`, deleting nothing.
fn slow_chunk_registry(delay: Duration) -> Arc<FragmentRegistry> {
    let registry = system_registry();
    registry.register_fn(
        NIBBLE_DELETE_CHUNK,
        move |ctx: &SiteContext, _: &DependencyTables, _: &ParameterSet| {
            std::thread::sleep(delay);
            progress(ctx, 0, 0)
        },
    );
    registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unanswered_round_fails_the_call_under_fail_policy() {
    let cluster = support::cluster_with(1, 1, slow_chunk_registry(Duration::from_millis(300)));
    cluster
        .load_rows(EVENTS, support::event_rows(20))
        .expect("load");
    let procs = support::procedures(&cluster);

    let config = support::chunked(Duration::from_secs(60))
        .with_call_timeout(Some(Duration::from_millis(40)));
    let err = procs
        .nibble_delete(&support::delete_request(EVENTS, ">=", 0, 5), &config)
        .await
        .expect_err("no response in time");
    assert!(err.to_string().contains("unknown"), "{err}");
    assert!(err.to_string().contains("no response within 40 ms"), "{err}");
    assert_eq!(support::total_rows(&cluster, EVENTS), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unanswered_rounds_are_counted_until_the_deadline_under_ignore_policy() {
    let cluster = support::cluster_with(1, 1, slow_chunk_registry(Duration::from_millis(100)));
    cluster
        .load_rows(EVENTS, support::event_rows(20))
        .expect("load");
    let procs = support::procedures(&cluster);

    let budget = Duration::from_millis(300);
    let config = ChunkedConfig::new(budget, UnknownResponsePolicy::Ignore)
        .with_call_timeout(Some(Duration::from_millis(20)));
    let started = Instant::now();
    let out = procs
        .nibble_delete(&support::delete_request(EVENTS, ">=", 0, 5), &config)
        .await
        .expect("unknown responses are ignored");

    assert!(started.elapsed() >= budget);
    assert!(out.totals.rounds >= 2, "{:?}", out.totals);
    assert_eq!(out.totals.unknown_calls, out.totals.rounds);
    assert_eq!(out.totals.processed, 0);
    assert_eq!(out.totals.stalled_rounds, 0);
    assert_eq!(support::ints(&out.table, "DELETED_ROWS"), vec![0]);
}

#[tokio::test]
async fn rounds_without_progress_are_counted_as_stalls() {
    let registry = system_registry();
    registry.register_fn(
        NIBBLE_DELETE_CHUNK,
        |ctx: &SiteContext, _: &DependencyTables, _: &ParameterSet| progress(ctx, 0, 5),
    );
    let cluster = support::cluster_with(1, 2, registry);
    cluster
        .load_rows(EVENTS, support::event_rows(20))
        .expect("load");
    let procs = support::procedures(&cluster);

    let out = procs
        .nibble_delete(
            &support::delete_request(EVENTS, ">=", 0, 5),
            &support::chunked(Duration::from_millis(50)),
        )
        .await
        .expect("stalled loop still finishes");

    assert!(out.totals.rounds >= 1);
    assert_eq!(out.totals.stalled_rounds, out.totals.rounds);
    assert_eq!(out.totals.processed, 0);
    assert_eq!(support::ints(&out.table, "LEFT_ROWS"), vec![10]);
    assert_eq!(support::total_rows(&cluster, EVENTS), 20);
}

#[tokio::test]
async fn invalid_requests_touch_nothing() {
    let cluster = support::cluster(1, 2);
    cluster
        .load_rows(EVENTS, support::event_rows(10))
        .expect("load");
    let procs = support::procedures(&cluster);
    let cfg = support::chunked(Duration::from_secs(60));

    let mut no_index = support::delete_request(EVENTS, ">=", 0, 5);
    no_index.column = "NOTE".to_string();
    no_index.value = Value::from("x");
    let mut wrong_type = support::delete_request(EVENTS, ">=", 0, 5);
    wrong_type.value = Value::from("yesterday");

    let requests = [
        support::delete_request("MISSING", ">=", 0, 5),
        support::delete_request(EVENTS, "~", 0, 5),
        support::delete_request(EVENTS, ">=", 0, 0),
        no_index,
        wrong_type,
    ];
    for request in &requests {
        let err = procs
            .nibble_delete(request, &cfg)
            .await
            .expect_err("invalid request");
        assert!(err.is_validation(), "{request:?}: {err}");
    }
    assert_eq!(support::total_rows(&cluster, EVENTS), 10);
}

#[tokio::test]
async fn migrate_moves_matching_rows() {
    let cluster = support::cluster(2, 2);
    cluster
        .load_rows(EVENTS, support::event_rows(100))
        .expect("load");
    let procs = support::procedures(&cluster);

    let out = procs
        .migrate_rows(
            &MigrateRowsRequest {
                source: EVENTS.to_string(),
                target: EVENTS_ARCHIVE.to_string(),
                column: "TS".to_string(),
                comparison: "<".to_string(),
                value: Value::BigInt(50),
                chunk_size: 7,
            },
            &support::chunked(Duration::from_secs(60)),
        )
        .await
        .expect("migrate");

    assert_eq!(support::ints(&out.table, "MIGRATED_ROWS"), vec![50]);
    assert_eq!(support::ints(&out.table, "LEFT_ROWS"), vec![0]);
    assert_eq!(support::total_rows(&cluster, EVENTS), 50);
    assert_eq!(support::total_rows(&cluster, EVENTS_ARCHIVE), 50);
    // migrated rows stay on the partition that held them
    let checked = procs.check_tables().await.expect("check");
    assert!(support::strings(&checked, "RESULT").iter().all(|r| r == "SUCCESS"));
}

#[tokio::test]
async fn migrate_rejects_incompatible_target() {
    let cluster = support::cluster(1, 2);
    let procs = support::procedures(&cluster);
    let err = procs
        .migrate_rows(
            &MigrateRowsRequest {
                source: EVENTS.to_string(),
                target: REGIONS.to_string(),
                column: "TS".to_string(),
                comparison: "<".to_string(),
                value: Value::BigInt(50),
                chunk_size: 7,
            },
            &support::chunked(Duration::from_secs(60)),
        )
        .await
        .expect_err("incompatible");
    assert!(err.is_validation());
}
