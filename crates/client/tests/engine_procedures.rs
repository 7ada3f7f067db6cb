use sysproc_client::demo::{EVENTS, EVENTS_ARCHIVE, REGIONS};
use sysproc_client::{Engine, ProcedureCall};
use sysproc_common::{ClusterConfig, SysprocError};
#[path = "support/mod.rs"]
mod support;

fn parse(engine: &Engine, line: &str) -> ProcedureCall {
    ProcedureCall::parse(line, engine.config().chunked_default_chunk_size).expect("parse")
}

#[test]
fn builder_requires_an_unknown_response_policy() {
    let err = Engine::builder(ClusterConfig::default())
        .build()
        .expect_err("policy missing");
    assert!(matches!(err, SysprocError::InvalidConfig(_)), "{err}");
}

#[tokio::test]
async fn demo_statistics_and_row_counts() {
    let engine = support::demo_engine(2, 2, 500);
    assert_eq!(engine.list_tables(), vec![EVENTS, EVENTS_ARCHIVE, REGIONS]);

    let counts = engine
        .call(&parse(&engine, "row-count events"))
        .await
        .expect("row count");
    assert_eq!(support::ints(&counts, "ROW_COUNT"), vec![500]);
    let regions = engine
        .call(&parse(&engine, "row_count REGIONS"))
        .await
        .expect("regions");
    assert_eq!(support::ints(&regions, "ROW_COUNT"), vec![4]);

    let partitions = engine
        .call(&parse(&engine, "statistics PARTITIONCOUNT"))
        .await
        .expect("partition count");
    assert_eq!(support::ints(&partitions, "PARTITION_COUNT"), vec![4]);
}

#[tokio::test]
async fn nibble_delete_uses_the_default_chunk_size() {
    let engine = support::demo_engine(1, 2, 300);

    let out = engine
        .call(&parse(&engine, "nibble-delete EVENTS TS < 200"))
        .await
        .expect("nibble delete");
    assert_eq!(support::ints(&out, "DELETED_ROWS"), vec![200]);
    assert_eq!(support::ints(&out, "LEFT_ROWS"), vec![0]);
    assert_eq!(support::total_rows(&engine, EVENTS), 100);
    assert!(
        engine
            .prometheus_metrics()
            .contains("sysproc_chunked_rounds_total")
    );
}

#[tokio::test]
async fn migrate_then_check_tables() {
    let engine = support::demo_engine(2, 2, 120);

    let out = engine
        .call(&parse(&engine, "migrate-rows EVENTS EVENTS_ARCHIVE TS >= 100 7"))
        .await
        .expect("migrate");
    assert_eq!(support::ints(&out, "MIGRATED_ROWS"), vec![20]);
    assert_eq!(support::total_rows(&engine, EVENTS_ARCHIVE), 20);

    let checked = engine
        .call(&ProcedureCall::CheckTables)
        .await
        .expect("check tables");
    assert!(support::strings(&checked, "RESULT").iter().all(|r| r == "SUCCESS"));
}

#[tokio::test]
async fn admin_calls_round_trip_through_the_engine() {
    let engine = support::demo_engine(2, 1, 0);

    let paused = engine.call(&ProcedureCall::Pause).await.expect("pause");
    assert_eq!(support::ints(&paused, "STATUS"), vec![0]);
    engine.call(&ProcedureCall::Resume).await.expect("resume");

    let installed = engine
        .call(&parse(&engine, r#"update-settings {"priority": 3}"#))
        .await
        .expect("settings");
    assert_eq!(
        support::strings(&installed, "MESSAGE"),
        vec!["settings version 1 installed on 2 host(s)".to_string()]
    );
}

#[tokio::test]
async fn validation_errors_surface_unchanged() {
    let engine = support::demo_engine(1, 1, 10);
    // PAYLOAD has no ordered index
    let err = engine
        .call(&parse(&engine, "nibble-delete EVENTS PAYLOAD = x"))
        .await
        .expect_err("no index");
    assert!(err.is_validation(), "{err}");
    assert_eq!(support::total_rows(&engine, EVENTS), 10);
}

#[test]
fn explain_covers_single_plan_procedures() {
    let engine = support::demo_engine(1, 2, 0);

    let text = engine
        .explain(&parse(&engine, "statistics TABLE"))
        .expect("explain statistics");
    assert!(text.starts_with("Plan fragments=2"), "{text}");
    let text = engine
        .explain(&parse(&engine, "row-count regions"))
        .expect("explain row count");
    assert!(text.contains("params=1"), "{text}");

    assert!(engine.explain(&parse(&engine, "row-count NOPE")).is_err());
    let err = engine
        .explain(&ProcedureCall::Pause)
        .expect_err("pause has no single plan");
    assert!(matches!(err, SysprocError::Unsupported(_)), "{err}");
}

#[tokio::test]
async fn catalog_update_from_a_json_file() {
    let engine = support::demo_engine(2, 1, 50);
    let mut catalog = sysproc_client::demo::demo_catalog();
    catalog.register_table(sysproc_storage::TableDef {
        name: "NOTES".to_string(),
        columns: vec![sysproc_storage::ColumnDef::new(
            "ID",
            sysproc_storage::ColumnType::BigInt,
        )],
        partition_column: None,
        indexes: Vec::new(),
    });
    let path = std::env::temp_dir().join(format!("sysproc-catalog-{}.json", std::process::id()));
    std::fs::write(&path, catalog.to_json_string().expect("json")).expect("write catalog");
    let path = path.display().to_string();

    let err = engine
        .call(&parse(&engine, &format!("update-catalog 0 {path} EVENTS")))
        .await
        .expect_err("EVENTS holds rows");
    assert!(err.to_string().contains("one of EVENTS must be empty"), "{err}");

    let out = engine
        .call(&parse(&engine, &format!("update-catalog 0 {path} EVENTS+EVENTS_ARCHIVE")))
        .await
        .expect("archive is empty");
    assert_eq!(
        support::strings(&out, "MESSAGE"),
        vec!["catalog version 1 installed on 2 host(s)".to_string()]
    );
    assert_eq!(engine.list_tables(), vec![EVENTS, EVENTS_ARCHIVE, "NOTES", REGIONS]);
    let _ = std::fs::remove_file(&path);
}
