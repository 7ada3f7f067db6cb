//! Demo schema and data used by the CLI when no catalog is given.

use sysproc_common::{Result, Value};
use sysproc_storage::{Catalog, ColumnDef, ColumnType, IndexDef, Row, TableDef};

use crate::Engine;

pub const EVENTS: &str = "EVENTS";
pub const EVENTS_ARCHIVE: &str = "EVENTS_ARCHIVE";
pub const REGIONS: &str = "REGIONS";

fn events_table(name: &str) -> TableDef {
    TableDef {
        name: name.to_string(),
        columns: vec![
            ColumnDef::new("ID", ColumnType::BigInt),
            ColumnDef::new("TS", ColumnType::BigInt),
            ColumnDef::new("REGION", ColumnType::BigInt),
            ColumnDef {
                nullable: true,
                ..ColumnDef::new("PAYLOAD", ColumnType::Varchar)
            },
        ],
        partition_column: Some("ID".to_string()),
        indexes: vec![IndexDef {
            name: format!("{name}_BY_TS"),
            columns: vec!["TS".to_string()],
            ordered: true,
        }],
    }
}

/// Two partitioned event tables sharing one layout plus a replicated lookup table.
pub fn demo_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register_table(events_table(EVENTS));
    catalog.register_table(events_table(EVENTS_ARCHIVE));
    catalog.register_table(TableDef {
        name: REGIONS.to_string(),
        columns: vec![
            ColumnDef::new("REGION", ColumnType::BigInt),
            ColumnDef::new("NAME", ColumnType::Varchar),
        ],
        partition_column: None,
        indexes: vec![IndexDef {
            name: "REGIONS_PK".to_string(),
            columns: vec!["REGION".to_string()],
            ordered: true,
        }],
    });
    catalog
}

const REGION_NAMES: [&str; 4] = ["north", "south", "east", "west"];

pub fn region_rows() -> Vec<Row> {
    REGION_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| vec![Value::BigInt(i as i64), Value::from(*name)])
        .collect()
}

/// `n` events; event `i` has `TS == i` and every tenth payload is NULL.
pub fn event_rows(n: u64) -> Vec<Row> {
    (0..n as i64)
        .map(|i| {
            let payload = if i % 10 == 0 {
                Value::Null
            } else {
                Value::Varchar(format!("event-{i}"))
            };
            vec![
                Value::BigInt(i),
                Value::BigInt(i),
                Value::BigInt(i % REGION_NAMES.len() as i64),
                payload,
            ]
        })
        .collect()
}

/// Load the demo rows into an engine built over [`demo_catalog`].
pub fn load_demo_data(engine: &Engine, events: u64) -> Result<u64> {
    let mut loaded = engine.load_rows(REGIONS, region_rows())?;
    loaded += engine.load_rows(EVENTS, event_rows(events))?;
    Ok(loaded)
}
