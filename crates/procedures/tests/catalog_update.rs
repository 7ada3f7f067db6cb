use sysproc_common::{SysprocError, Value};
use sysproc_procedures::{CatalogUpdateRequest, EmptyTableRequirement};
use sysproc_storage::{Catalog, ColumnDef, ColumnType, TableDef};
#[path = "support/mod.rs"]
mod support;

use support::{EVENTS, EVENTS_ARCHIVE};

const AUDIT: &str = "AUDIT";

fn with_audit() -> Catalog {
    let mut catalog = support::catalog();
    catalog.register_table(TableDef {
        name: AUDIT.to_string(),
        columns: vec![
            ColumnDef::new("ID", ColumnType::BigInt),
            ColumnDef::new("WHAT", ColumnType::Varchar),
        ],
        partition_column: Some("ID".to_string()),
        indexes: Vec::new(),
    });
    catalog
}

fn request(catalog: Catalog, expected_version: u64) -> CatalogUpdateRequest {
    CatalogUpdateRequest {
        catalog,
        expected_version,
        must_be_empty: Vec::new(),
    }
}

fn must_be_empty(tables: &[&str], reason: &str) -> EmptyTableRequirement {
    EmptyTableRequirement {
        tables: tables.iter().map(|t| t.to_string()).collect(),
        reason: reason.to_string(),
    }
}

#[tokio::test]
async fn update_reaches_every_host_and_serves_new_tables() {
    let cluster = support::cluster(2, 2);
    let procs = support::procedures(&cluster);
    assert_eq!(procs.catalog_version().expect("version"), 0);
    assert!(procs.row_count(AUDIT).await.expect_err("not yet").is_validation());

    let out = procs
        .update_catalog(&request(with_audit(), 0))
        .await
        .expect("update");
    assert_eq!(support::ints(&out, "STATUS"), vec![0]);
    assert_eq!(
        support::strings(&out, "MESSAGE"),
        vec!["catalog version 1 installed on 2 host(s)".to_string()]
    );
    assert_eq!(procs.catalog_version().expect("version"), 1);
    for host in cluster.hosts().values() {
        assert_eq!(host.catalog().version, 1);
        assert!(host.catalog().catalog.get(AUDIT).is_ok());
    }

    cluster
        .load_rows(
            AUDIT,
            (0..6)
                .map(|i| vec![Value::BigInt(i), Value::Varchar(format!("op {i}"))])
                .collect(),
        )
        .expect("load new table");
    let counted = procs.row_count(AUDIT).await.expect("sites see the new table");
    assert_eq!(support::ints(&counted, "ROW_COUNT"), vec![6]);
}

#[tokio::test]
async fn stale_version_is_rejected_and_retry_reapplies() {
    let cluster = support::cluster(1, 2);
    let procs = support::procedures(&cluster);
    procs
        .update_catalog(&request(with_audit(), 0))
        .await
        .expect("first update");

    let err = procs
        .update_catalog(&request(support::catalog(), 0))
        .await
        .expect_err("planned against an old version");
    assert!(matches!(err, SysprocError::Coordination(_)), "{err}");
    assert!(err.to_string().contains("version 1 is live"));
    assert_eq!(procs.catalog_version().expect("version"), 1);
    assert!(procs.catalog().get(AUDIT).is_ok());

    let again = procs
        .update_catalog(&request(with_audit(), 0))
        .await
        .expect("identical update is a retry");
    assert_eq!(
        support::strings(&again, "MESSAGE"),
        vec!["catalog version 1 installed on 0 host(s)".to_string()]
    );
    assert_eq!(procs.catalog_version().expect("version"), 1);
}

#[tokio::test]
async fn populated_tables_block_the_update() {
    let cluster = support::cluster(2, 1);
    cluster
        .load_rows(EVENTS, support::event_rows(10))
        .expect("load");
    let procs = support::procedures(&cluster);

    let mut blocked = request(with_audit(), 0);
    blocked.must_be_empty = vec![must_be_empty(
        &[EVENTS],
        "EVENTS must be empty to change its partitioning",
    )];
    let err = procs.update_catalog(&blocked).await.expect_err("EVENTS has rows");
    assert!(err.is_validation());
    assert!(err.to_string().contains("EVENTS must be empty"));
    assert_eq!(procs.catalog_version().expect("version"), 0);
    for host in cluster.hosts().values() {
        assert_eq!(host.catalog().version, 0);
    }

    let mut allowed = request(with_audit(), 0);
    allowed.must_be_empty = vec![must_be_empty(
        &[EVENTS, EVENTS_ARCHIVE],
        "one of the event tables must be empty",
    )];
    procs
        .update_catalog(&allowed)
        .await
        .expect("EVENTS_ARCHIVE is empty");
    assert_eq!(procs.catalog_version().expect("version"), 1);

    let mut unknown = request(support::catalog(), 1);
    unknown.must_be_empty = vec![must_be_empty(&["NOPE"], "never")];
    assert!(procs.update_catalog(&unknown).await.expect_err("unknown").is_validation());
}
