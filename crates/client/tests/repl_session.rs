use std::io::Cursor;

use sysproc_client::repl::run_repl;
#[path = "support/mod.rs"]
mod support;

fn run(script: &str) -> String {
    let engine = support::demo_engine(1, 2, 50);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let mut out = Vec::new();
    run_repl(&engine, &runtime, Cursor::new(script.to_string()), &mut out).expect("repl");
    String::from_utf8(out).expect("utf8")
}

#[test]
fn runs_calls_and_keeps_going_after_errors() {
    let out = run("row-count EVENTS\nvacuum\nstatistics PARTITIONCOUNT;\n\\q\nrow-count EVENTS\n");
    assert!(out.contains("ROW_COUNT"), "{out}");
    assert!(out.contains("| 50"), "{out}");
    assert!(out.contains("error: validation error: unknown procedure vacuum"), "{out}");
    assert!(out.contains("PARTITION_COUNT"), "{out}");
    // nothing runs after \q
    assert_eq!(out.matches("ROW_COUNT").count(), 1, "{out}");
}

#[test]
fn helpers_and_explain() {
    let out = run("tables\nexplain row-count EVENTS\nexplain pause\nhelp\n");
    assert!(out.contains("EVENTS_ARCHIVE"), "{out}");
    assert!(out.contains("Plan fragments=2"), "{out}");
    assert!(out.contains("error: unsupported: explain is not available for pause"), "{out}");
    assert!(out.contains("procedures: statistics"), "{out}");
}
