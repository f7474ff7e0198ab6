// src/publish/arrow.rs

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Date32Builder, Float64Builder, Int64Builder, StringBuilder},
    datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema},
    record_batch::RecordBatch,
};
use chrono::NaiveDate;
use std::sync::Arc;

use crate::model::{CanonicalDataset, CanonicalSchema, ColumnType, Value};

/// Map a canonical column type onto its Arrow type.
///
/// - text                   → Utf8
/// - integer                → Int64
/// - number, numeric_range  → Float64
/// - date                   → Date32
pub fn map_to_arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::Text => DataType::Utf8,
        ColumnType::Integer => DataType::Int64,
        ColumnType::Number | ColumnType::NumericRange => DataType::Float64,
        ColumnType::Date => DataType::Date32,
    }
}

pub fn build_arrow_schema(schema: &CanonicalSchema) -> Arc<ArrowSchema> {
    let fields: Vec<ArrowField> = schema
        .columns
        .iter()
        .map(|col| {
            ArrowField::new(&col.name, map_to_arrow_type(col.ty), /* nullable = */ !col.required)
        })
        .collect();
    Arc::new(ArrowSchema::new(fields))
}

fn days_since_epoch(d: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    d.signed_duration_since(epoch).num_days() as i32
}

/// Build one record batch holding every row of the dataset.
pub fn to_record_batch(dataset: &CanonicalDataset) -> Result<RecordBatch> {
    let schema = build_arrow_schema(&dataset.schema);
    let n = dataset.rows.len();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(dataset.schema.columns.len());
    for (i, col) in dataset.schema.columns.iter().enumerate() {
        let values = dataset.rows.iter().map(|r| &r[i]);
        let array: ArrayRef = match col.ty {
            ColumnType::Text => {
                let mut b = StringBuilder::with_capacity(n, n * 16);
                for v in values {
                    match v {
                        Value::Null => b.append_null(),
                        other => b.append_value(other.to_string()),
                    }
                }
                Arc::new(b.finish())
            }
            ColumnType::Integer => {
                let mut b = Int64Builder::with_capacity(n);
                for v in values {
                    b.append_option(match v {
                        Value::Integer(x) => Some(*x),
                        _ => None,
                    });
                }
                Arc::new(b.finish())
            }
            ColumnType::Number | ColumnType::NumericRange => {
                let mut b = Float64Builder::with_capacity(n);
                for v in values {
                    b.append_option(v.as_f64());
                }
                Arc::new(b.finish())
            }
            ColumnType::Date => {
                let mut b = Date32Builder::with_capacity(n);
                for v in values {
                    b.append_option(match v {
                        Value::Date(d) => Some(days_since_epoch(*d)),
                        _ => None,
                    });
                }
                Arc::new(b.finish())
            }
        };
        columns.push(array);
    }

    RecordBatch::try_new(schema, columns).context("building dataset record batch")
}
