use std::collections::HashMap;
use std::fs;

use serde::{Deserialize, Serialize};
use sysproc_common::{Result, SysprocError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    BigInt,
    Float,
    Varchar,
    Boolean,
    Varbinary,
}

impl ColumnType {
    /// Whether `value` can be stored in (or compared against) a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::BigInt, Value::BigInt(_))
                | (ColumnType::Float, Value::Float(_) | Value::BigInt(_))
                | (ColumnType::Varchar, Value::Varchar(_))
                | (ColumnType::Boolean, Value::Boolean(_))
                | (ColumnType::Varbinary, Value::Bytes(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    /// Tree indexes are ordered; hash indexes are not.
    #[serde(default = "default_ordered")]
    pub ordered: bool,
}

fn default_ordered() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Partitioning column; `None` means the table is replicated to every site.
    #[serde(default)]
    pub partition_column: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn is_replicated(&self) -> bool {
        self.partition_column.is_none()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, name: &str) -> Result<&ColumnDef> {
        self.column_index(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| {
                SysprocError::Validation(format!(
                    "column {name} does not exist in table {}",
                    self.name
                ))
            })
    }

    /// Whether an ordered index leads with `column`.
    pub fn has_ordered_index_on(&self, column: &str) -> bool {
        self.indexes.iter().any(|idx| {
            idx.ordered
                && idx
                    .columns
                    .first()
                    .map(|c| c.eq_ignore_ascii_case(column))
                    .unwrap_or(false)
        })
    }

    /// Whether `other` stores rows of the same column shape.
    pub fn is_column_compatible(&self, other: &TableDef) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.column_type == b.column_type)
    }
}

#[derive(Debug, Default, Clone)]
pub struct Catalog {
    tables: HashMap<String, TableDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn register_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.to_ascii_uppercase(), table);
    }

    /// Look up a table by case-insensitive name.
    pub fn get(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| SysprocError::Validation(format!("table {name} does not exist")))
    }

    /// All tables in name order.
    pub fn tables(&self) -> Vec<&TableDef> {
        let mut out = self.tables.values().collect::<Vec<_>>();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let tables: Vec<TableDef> =
            serde_json::from_str(s).map_err(|e| SysprocError::InvalidConfig(e.to_string()))?;
        let mut cat = Catalog::new();
        for t in tables {
            cat.register_table(t);
        }
        Ok(cat)
    }

    /// Inverse of [`Catalog::from_json_str`]; tables in name order.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(&self.tables()).map_err(|e| SysprocError::InvalidConfig(e.to_string()))
    }

    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }
}
