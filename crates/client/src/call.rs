//! Textual procedure invocations.
//!
//! One line names a procedure followed by its positional arguments, e.g.
//! `nibble-delete EVENTS TS < 1000 500` or `update-settings {"a": 1}`.

use sysproc_common::{Result, SysprocError, Value};
use sysproc_procedures::{MigrateRowsRequest, NibbleDeleteRequest, SnapshotSaveRequest};

pub const PROCEDURE_NAMES: [&str; 10] = [
    "statistics",
    "row-count",
    "nibble-delete",
    "migrate-rows",
    "pause",
    "resume",
    "update-settings",
    "snapshot-check",
    "check-tables",
    "update-catalog",
];

/// A parsed procedure invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureCall {
    Statistics { selector: String },
    RowCount { table: String },
    NibbleDelete(NibbleDeleteRequest),
    MigrateRows(MigrateRowsRequest),
    Pause,
    Resume,
    UpdateSettings { json: String },
    SnapshotCheck(SnapshotSaveRequest),
    CheckTables,
    /// Catalog JSON file plus the version it was planned against. Each
    /// `must_be_empty` entry is a `+`-joined table set of which one must be
    /// empty.
    UpdateCatalog {
        path: String,
        expected_version: u64,
        must_be_empty: Vec<String>,
    },
}

impl ProcedureCall {
    /// Parse one invocation line.
    ///
    /// `default_chunk` fills in the chunk size when a chunked procedure
    /// omits it.
    pub fn parse(line: &str, default_chunk: u64) -> Result<Self> {
        let line = line.trim().trim_end_matches(';').trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        if name.is_empty() {
            return Err(SysprocError::Validation("empty procedure call".to_string()));
        }
        let name = name.to_ascii_lowercase().replace('_', "-");
        let args = rest.split_whitespace().collect::<Vec<_>>();

        match name.as_str() {
            "statistics" | "stats" => {
                let [selector] = expect_args::<1>(&args, "statistics TABLE|PARTITIONCOUNT")?;
                Ok(Self::Statistics {
                    selector: selector.to_string(),
                })
            }
            "row-count" | "rowcount" => {
                let [table] = expect_args::<1>(&args, "row-count TABLE")?;
                Ok(Self::RowCount {
                    table: table.to_string(),
                })
            }
            "nibble-delete" => {
                let usage = "nibble-delete TABLE COLUMN OP VALUE [CHUNK]";
                let (fixed, chunk) = split_chunk::<4>(&args, default_chunk, usage)?;
                let [table, column, comparison, value] = fixed;
                Ok(Self::NibbleDelete(NibbleDeleteRequest {
                    table: table.to_string(),
                    column: column.to_string(),
                    comparison: comparison.to_string(),
                    value: parse_value(value),
                    chunk_size: chunk,
                }))
            }
            "migrate-rows" => {
                let usage = "migrate-rows SOURCE TARGET COLUMN OP VALUE [CHUNK]";
                let (fixed, chunk) = split_chunk::<5>(&args, default_chunk, usage)?;
                let [source, target, column, comparison, value] = fixed;
                Ok(Self::MigrateRows(MigrateRowsRequest {
                    source: source.to_string(),
                    target: target.to_string(),
                    column: column.to_string(),
                    comparison: comparison.to_string(),
                    value: parse_value(value),
                    chunk_size: chunk,
                }))
            }
            "pause" => {
                expect_args::<0>(&args, "pause")?;
                Ok(Self::Pause)
            }
            "resume" => {
                expect_args::<0>(&args, "resume")?;
                Ok(Self::Resume)
            }
            "update-settings" | "settings" => {
                if rest.is_empty() {
                    return Err(usage_error("update-settings JSON"));
                }
                Ok(Self::UpdateSettings {
                    json: rest.to_string(),
                })
            }
            "snapshot-check" => {
                let [path, nonce] = expect_args::<2>(&args, "snapshot-check PATH NONCE")?;
                Ok(Self::SnapshotCheck(SnapshotSaveRequest {
                    path: path.to_string(),
                    nonce: nonce.to_string(),
                }))
            }
            "check-tables" => {
                expect_args::<0>(&args, "check-tables")?;
                Ok(Self::CheckTables)
            }
            "update-catalog" => {
                let usage = "update-catalog VERSION PATH [TABLE[+TABLE]...]";
                let [version, path] = match args.get(..2) {
                    Some(head) => expect_args::<2>(head, usage)?,
                    None => return Err(usage_error(usage)),
                };
                let expected_version = version.parse::<u64>().map_err(|e| {
                    SysprocError::Validation(format!("invalid catalog version {version:?}: {e}"))
                })?;
                Ok(Self::UpdateCatalog {
                    path: path.to_string(),
                    expected_version,
                    must_be_empty: args[2..].iter().map(|s| s.to_string()).collect(),
                })
            }
            other => Err(SysprocError::Validation(format!(
                "unknown procedure {other}; expected one of {}",
                PROCEDURE_NAMES.join(", ")
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Statistics { .. } => "statistics",
            Self::RowCount { .. } => "row-count",
            Self::NibbleDelete(_) => "nibble-delete",
            Self::MigrateRows(_) => "migrate-rows",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::UpdateSettings { .. } => "update-settings",
            Self::SnapshotCheck(_) => "snapshot-check",
            Self::CheckTables => "check-tables",
            Self::UpdateCatalog { .. } => "update-catalog",
        }
    }
}

fn usage_error(usage: &str) -> SysprocError {
    SysprocError::Validation(format!("usage: {usage}"))
}

fn expect_args<'a, const N: usize>(args: &[&'a str], usage: &str) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(args).map_err(|_| usage_error(usage))
}

fn split_chunk<'a, const N: usize>(
    args: &[&'a str],
    default_chunk: u64,
    usage: &str,
) -> Result<([&'a str; N], i64)> {
    if args.len() < N || args.len() > N + 1 {
        return Err(usage_error(usage));
    }
    let fixed = expect_args::<N>(&args[..N], usage)?;
    let chunk = match args.get(N) {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|e| SysprocError::Validation(format!("invalid chunk size {raw:?}: {e}")))?,
        None => i64::try_from(default_chunk).map_err(|_| {
            SysprocError::InvalidConfig(format!("default chunk size {default_chunk} out of range"))
        })?,
    };
    Ok((fixed, chunk))
}

/// Literal from the command line: integers, floats, booleans and `null`;
/// anything else is a string, with one pair of surrounding quotes removed.
pub fn parse_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::BigInt(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Float(v);
    }
    match raw {
        "true" | "TRUE" => return Value::Boolean(true),
        "false" | "FALSE" => return Value::Boolean(false),
        _ => {}
    }
    let unquoted = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(raw);
    Value::Varchar(unquoted.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chunked_calls_with_default_chunk() {
        let call = ProcedureCall::parse("nibble_delete EVENTS TS < 1000", 250).expect("parse");
        assert_eq!(
            call,
            ProcedureCall::NibbleDelete(NibbleDeleteRequest {
                table: "EVENTS".to_string(),
                column: "TS".to_string(),
                comparison: "<".to_string(),
                value: Value::BigInt(1000),
                chunk_size: 250,
            })
        );

        let call = ProcedureCall::parse("MIGRATE-ROWS A B TS >= 'x' 10;", 250).expect("parse");
        let ProcedureCall::MigrateRows(req) = call else {
            panic!("expected migrate-rows, got {call:?}");
        };
        assert_eq!(req.value, Value::from("x"));
        assert_eq!(req.chunk_size, 10);
    }

    #[test]
    fn settings_keep_the_rest_of_the_line() {
        let call = ProcedureCall::parse(r#"settings {"a": 1, "b": [2, 3]}"#, 1).expect("parse");
        assert_eq!(
            call,
            ProcedureCall::UpdateSettings {
                json: r#"{"a": 1, "b": [2, 3]}"#.to_string()
            }
        );
    }

    #[test]
    fn rejects_bad_arity_and_unknown_names() {
        for line in [
            "",
            "pause now",
            "row-count",
            "nibble-delete EVENTS TS <",
            "nibble-delete EVENTS TS < 1 2 3",
            "nibble-delete EVENTS TS < 1 many",
            "update-settings",
            "update-catalog 1",
            "update-catalog latest cat.json",
            "vacuum",
        ] {
            let err = ProcedureCall::parse(line, 10).expect_err(line);
            assert!(err.is_validation(), "{line}: {err}");
        }
    }

    #[test]
    fn catalog_update_takes_table_sets() {
        let call = ProcedureCall::parse("update-catalog 3 new.json EVENTS+EVENTS_ARCHIVE REGIONS", 1)
            .expect("parse");
        assert_eq!(
            call,
            ProcedureCall::UpdateCatalog {
                path: "new.json".to_string(),
                expected_version: 3,
                must_be_empty: vec!["EVENTS+EVENTS_ARCHIVE".to_string(), "REGIONS".to_string()],
            }
        );
        assert_eq!(call.name(), "update-catalog");
    }

    #[test]
    fn literals() {
        assert_eq!(parse_value("NULL"), Value::Null);
        assert_eq!(parse_value("-7"), Value::BigInt(-7));
        assert_eq!(parse_value("1.5"), Value::Float(1.5));
        assert_eq!(parse_value("true"), Value::Boolean(true));
        assert_eq!(parse_value("\"a b\""), Value::from("a b"));
        assert_eq!(parse_value("plain"), Value::from("plain"));
    }
}
