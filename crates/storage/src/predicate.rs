use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sysproc_common::{Result, SysprocError, Value};

use crate::catalog::TableDef;

/// Comparison operator accepted by chunked procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "=" => Ok(Self::Eq),
            "<>" | "!=" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            other => Err(SysprocError::Validation(format!(
                "invalid comparison operator '{other}'"
            ))),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn matches(&self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
        }
    }
}

/// `column <op> value` filter over stored rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPredicate {
    pub column: String,
    pub op: ComparisonOp,
    pub value: Value,
}

impl RowPredicate {
    pub fn new(column: impl Into<String>, op: ComparisonOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    /// Check the predicate against `table` and return the filtered column's position.
    pub fn bind(&self, table: &TableDef) -> Result<usize> {
        let idx = table.column_index(&self.column).ok_or_else(|| {
            SysprocError::Validation(format!(
                "column {} does not exist in table {}",
                self.column, table.name
            ))
        })?;
        let column = &table.columns[idx];
        if matches!(self.value, Value::Null) || !column.column_type.accepts(&self.value) {
            return Err(SysprocError::Validation(format!(
                "value of type {} cannot be compared with column {}",
                self.value.type_name(),
                column.name
            )));
        }
        Ok(idx)
    }

    /// NULL cells never match.
    pub fn matches(&self, row: &[Value], column_idx: usize) -> bool {
        row.get(column_idx)
            .and_then(|cell| cell.compare(&self.value))
            .map(|ord| self.op.matches(ord))
            .unwrap_or(false)
    }
}
