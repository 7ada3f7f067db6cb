//! Result table construction and column access.
//!
//! Every system procedure answers with a fixed column contract; [`schemas`]
//! holds those contracts so sites, aggregators and clients agree on them.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanBuilder, Float64Builder, Int64Array, Int64Builder, StringArray,
    StringBuilder,
};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, SchemaRef};
use sysproc_common::{Result, SysprocError, Value};

pub const SUCCESS: &str = "SUCCESS";
pub const FAILURE: &str = "FAILURE";

pub mod schemas {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema, SchemaRef};

    fn schema(cols: &[(&str, DataType)]) -> SchemaRef {
        Arc::new(Schema::new(
            cols.iter()
                .map(|(name, dt)| Field::new(*name, dt.clone(), true))
                .collect::<Vec<_>>(),
        ))
    }

    /// Placeholder row returned by fragments with nothing to report.
    pub fn unused() -> SchemaRef {
        schema(&[("UNUSED", DataType::Int64)])
    }

    pub fn status_message() -> SchemaRef {
        schema(&[("STATUS", DataType::Int64), ("MESSAGE", DataType::Utf8)])
    }

    pub fn deleted_left() -> SchemaRef {
        schema(&[("DELETED_ROWS", DataType::Int64), ("LEFT_ROWS", DataType::Int64)])
    }

    pub fn migrated_left() -> SchemaRef {
        schema(&[("MIGRATED_ROWS", DataType::Int64), ("LEFT_ROWS", DataType::Int64)])
    }

    /// Per-partition chunk outcome exchanged between chunk fragments and their aggregate.
    pub fn chunk_progress() -> SchemaRef {
        schema(&[
            ("PARTITION_ID", DataType::Int64),
            ("PROCESSED_ROWS", DataType::Int64),
            ("LEFT_ROWS", DataType::Int64),
        ])
    }

    pub fn snapshot_result() -> SchemaRef {
        schema(&[
            ("HOST_ID", DataType::Int64),
            ("HOSTNAME", DataType::Utf8),
            ("TABLE", DataType::Utf8),
            ("RESULT", DataType::Utf8),
            ("ERR_MSG", DataType::Utf8),
        ])
    }

    pub fn table_check() -> SchemaRef {
        schema(&[
            ("HOST_ID", DataType::Int64),
            ("PARTITION_ID", DataType::Int64),
            ("TABLE", DataType::Utf8),
            ("RESULT", DataType::Utf8),
            ("ERR_MSG", DataType::Utf8),
        ])
    }

    /// Per-site table check row plus the replica fingerprint the aggregate compares.
    pub fn table_check_detail() -> SchemaRef {
        schema(&[
            ("HOST_ID", DataType::Int64),
            ("PARTITION_ID", DataType::Int64),
            ("TABLE", DataType::Utf8),
            ("RESULT", DataType::Utf8),
            ("ERR_MSG", DataType::Utf8),
            ("ROW_COUNT", DataType::Int64),
            ("ROW_DIGEST", DataType::Int64),
        ])
    }

    pub fn table_stats() -> SchemaRef {
        schema(&[
            ("HOST_ID", DataType::Int64),
            ("HOSTNAME", DataType::Utf8),
            ("SITE_ID", DataType::Int64),
            ("PARTITION_ID", DataType::Int64),
            ("TABLE_NAME", DataType::Utf8),
            ("TABLE_TYPE", DataType::Utf8),
            ("TUPLE_COUNT", DataType::Int64),
        ])
    }

    pub fn row_count() -> SchemaRef {
        schema(&[
            ("TABLE_NAME", DataType::Utf8),
            ("TABLE_TYPE", DataType::Utf8),
            ("ROW_COUNT", DataType::Int64),
        ])
    }

    pub fn partition_count() -> SchemaRef {
        schema(&[("PARTITION_COUNT", DataType::Int64)])
    }

    pub fn host_mode() -> SchemaRef {
        schema(&[
            ("HOST_ID", DataType::Int64),
            ("SITE_ID", DataType::Int64),
            ("APPLIED", DataType::Boolean),
        ])
    }
}

/// Build one arrow column of type `dt` from scalar values.
pub fn values_to_array(values: &[Value], dt: &DataType) -> Result<ArrayRef> {
    match dt {
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    Value::BigInt(x) => b.append_value(*x),
                    Value::Null => b.append_null(),
                    other => return Err(mismatch("Int64", other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    Value::Float(x) => b.append_value(*x),
                    Value::BigInt(x) => b.append_value(*x as f64),
                    Value::Null => b.append_null(),
                    other => return Err(mismatch("Float64", other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::with_capacity(values.len(), values.len() * 16);
            for v in values {
                match v {
                    Value::Varchar(x) => b.append_value(x),
                    Value::Null => b.append_null(),
                    other => return Err(mismatch("Utf8", other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(values.len());
            for v in values {
                match v {
                    Value::Boolean(x) => b.append_value(*x),
                    Value::Null => b.append_null(),
                    other => return Err(mismatch("Boolean", other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        other => Err(SysprocError::Unsupported(format!(
            "result column type not supported: {other:?}"
        ))),
    }
}

fn mismatch(expected: &str, got: &Value) -> SysprocError {
    SysprocError::Execution(format!(
        "type mismatch while building {expected} array: got {}",
        got.type_name()
    ))
}

/// Assemble a result table from row-major values.
pub fn rows_to_batch(schema: SchemaRef, rows: Vec<Vec<Value>>) -> Result<RecordBatch> {
    let width = schema.fields().len();
    let mut columns = vec![Vec::with_capacity(rows.len()); width];
    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != width {
            return Err(SysprocError::Execution(format!(
                "result row {i} has {} values, schema has {width} columns",
                row.len()
            )));
        }
        for (col, v) in columns.iter_mut().zip(row) {
            col.push(v);
        }
    }
    let arrays = columns
        .iter()
        .zip(schema.fields())
        .map(|(values, field)| values_to_array(values, field.data_type()))
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(schema, arrays)
        .map_err(|e| SysprocError::Execution(format!("build result table failed: {e}")))
}

fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str, ty: &str) -> Result<&'a A> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| SysprocError::Execution(format!("result table has no column {name}")))?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| SysprocError::Execution(format!("column {name} is not {ty}")))
}

/// Non-null BIGINT values of column `name`; NULL cells read as 0.
pub fn i64_column(batch: &RecordBatch, name: &str) -> Result<Vec<i64>> {
    let arr = column::<Int64Array>(batch, name, "Int64")?;
    Ok((0..arr.len())
        .map(|i| if arr.is_null(i) { 0 } else { arr.value(i) })
        .collect())
}

/// VARCHAR values of column `name`; NULL cells read as empty strings.
pub fn string_column(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let arr = column::<StringArray>(batch, name, "Utf8")?;
    Ok((0..arr.len())
        .map(|i| {
            if arr.is_null(i) {
                String::new()
            } else {
                arr.value(i).to_string()
            }
        })
        .collect())
}

/// Single STATUS/MESSAGE row; status 0 means success.
pub fn status_table(status: i64, message: impl Into<String>) -> Result<RecordBatch> {
    rows_to_batch(
        schemas::status_message(),
        vec![vec![Value::BigInt(status), Value::Varchar(message.into())]],
    )
}

pub fn unused_table() -> Result<RecordBatch> {
    rows_to_batch(schemas::unused(), vec![vec![Value::Null]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_reads_fixed_schema_rows() {
        let batch = rows_to_batch(
            schemas::snapshot_result(),
            vec![vec![
                Value::BigInt(0),
                Value::from("h0"),
                Value::from("ORDERS"),
                Value::from(SUCCESS),
                Value::Null,
            ]],
        )
        .expect("batch");
        assert_eq!(i64_column(&batch, "HOST_ID").expect("host"), vec![0]);
        assert_eq!(string_column(&batch, "ERR_MSG").expect("err"), vec![String::new()]);
        assert!(i64_column(&batch, "TABLE").is_err());
        assert!(string_column(&batch, "NOPE").is_err());
    }

    #[test]
    fn rejects_ragged_and_mistyped_rows() {
        let err = rows_to_batch(schemas::deleted_left(), vec![vec![Value::BigInt(1)]])
            .expect_err("ragged");
        assert!(err.to_string().contains("schema has 2 columns"));
        let err = status_table(0, "ok").and_then(|_| {
            rows_to_batch(
                schemas::status_message(),
                vec![vec![Value::from("x"), Value::from("y")]],
            )
        });
        assert!(err.expect_err("mistyped").to_string().contains("Int64"));
    }
}
