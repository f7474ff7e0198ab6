// src/transform/mod.rs

pub mod coerce;
pub mod date_parser;
pub mod schema;
pub mod summary;
pub mod utils;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, SourceKind};
use crate::error::PipelineError;
use crate::model::{
    CanonicalDataset, CanonicalSchema, ColumnSpec, Derivation, Provenance, RawRow, RawTable,
    Rejection, RejectionKind, Value,
};
use schema::{bind, Binding};

/// Turns raw tables into the single canonical dataset.
pub struct Transformer {
    schema: CanonicalSchema,
    kinds: Vec<SourceKind>,
    /// Schema indices forming the dedup key.
    key: Vec<usize>,
}

pub struct TransformOutput {
    /// `Err(NoValidInput)` when no table survived schema reconciliation.
    pub dataset: Result<CanonicalDataset, PipelineError>,
    /// Extractor rejections followed by table and row rejections, in input order.
    pub rejections: Vec<Rejection>,
    pub duplicates_dropped: usize,
}

impl Transformer {
    pub fn new(config: &Config) -> Self {
        let schema = config.schema.clone();
        let key = if config.natural_key.is_empty() {
            schema
                .columns
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.is_derived())
                .map(|(i, _)| i)
                .collect()
        } else {
            config
                .natural_key
                .iter()
                .filter_map(|n| schema.index_of(n))
                .collect()
        };
        Self {
            schema,
            kinds: config.kinds.clone(),
            key,
        }
    }

    #[instrument(level = "info", skip_all)]
    pub fn run<I>(&self, tables: I, extracted_at: DateTime<Utc>) -> TransformOutput
    where
        I: IntoIterator<Item = Result<RawTable, Rejection>>,
    {
        let mut rejections = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut sources: Vec<String> = Vec::new();
        let mut offered = 0usize;
        let mut accepted = 0usize;
        let mut duplicates_dropped = 0usize;

        for item in tables {
            offered += 1;
            let table = match item {
                Ok(t) => t,
                Err(r) => {
                    rejections.push(r);
                    continue;
                }
            };

            let kind = self.kinds.iter().find(|k| k.name == table.kind);
            let binding = match bind(&table, &self.schema, kind) {
                Ok(b) => b,
                Err(missing) => {
                    warn!(source = %table.label(), ?missing, "table rejected");
                    rejections.push(Rejection::file(
                        table.label(),
                        RejectionKind::SchemaMismatch,
                        format!("missing required column(s): {}", missing.join(", ")),
                    ));
                    continue;
                }
            };
            accepted += 1;

            let mut kept = 0usize;
            let mut dropped = 0usize;
            for raw in &table.rows {
                let values = match self.clean_row(&table, &binding, raw) {
                    Ok(v) => v,
                    Err(r) => {
                        debug!(source = %r.source, line = raw.line, reason = %r.reason, "row rejected");
                        rejections.push(r);
                        dropped += 1;
                        continue;
                    }
                };
                if !seen.insert(self.key_of(&values)) {
                    debug!(source = %table.label(), line = raw.line, "duplicate row dropped");
                    duplicates_dropped += 1;
                    continue;
                }
                rows.push(values);
                kept += 1;
            }

            info!(
                source = %table.label(),
                kind = %table.kind,
                kept,
                rejected = dropped,
                "table merged"
            );
            if kept > 0 && !sources.contains(&table.source) {
                sources.push(table.source.clone());
            }
        }

        let dataset = if accepted == 0 {
            let reason = if offered == 0 {
                "no matching source files found".to_string()
            } else {
                format!("none of the {} source table(s) could be used", offered)
            };
            Err(PipelineError::NoValidInput(reason))
        } else {
            Ok(CanonicalDataset {
                schema: self.schema.clone(),
                rows,
                provenance: Provenance {
                    sources,
                    extracted_at,
                },
            })
        };

        TransformOutput {
            dataset,
            rejections,
            duplicates_dropped,
        }
    }

    /// Coerce every bound cell, then fill derived columns. The first failing
    /// column decides the rejection kind; all failures are listed in the reason.
    fn clean_row(
        &self,
        table: &RawTable,
        binding: &Binding,
        raw: &RawRow,
    ) -> Result<Vec<Value>, Rejection> {
        let mut values = Vec::with_capacity(self.schema.columns.len());
        let mut problems: Vec<(RejectionKind, String)> = Vec::new();

        for (col, slot) in self.schema.columns.iter().zip(&binding.slots) {
            let cell = match (col.is_derived(), slot) {
                (false, Some(idx)) => raw.cells.get(*idx),
                _ => None,
            };
            let value = match cell.map(|c| coerce::coerce(c, col.ty)) {
                Some(Ok(v)) => v,
                Some(Err(shown)) => {
                    problems.push((
                        RejectionKind::InvalidValue,
                        format!("invalid {} value '{}' in {}", col.ty, shown, col.name),
                    ));
                    values.push(Value::Null);
                    continue;
                }
                None => Value::Null,
            };
            if value.is_null() && col.required && !col.is_derived() {
                problems.push((
                    RejectionKind::SchemaMismatch,
                    format!("missing required field {}", col.name),
                ));
            }
            values.push(value);
        }

        if let Some((kind, _)) = problems.first() {
            let reason = problems
                .iter()
                .map(|(_, r)| r.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Rejection::row(table.label(), raw.line, *kind, reason));
        }

        for (i, col) in self.schema.columns.iter().enumerate() {
            if let Some(d) = col.derive {
                values[i] = self.derive(d, col, table, &values);
            }
        }
        Ok(values)
    }

    fn derive(&self, d: Derivation, col: &ColumnSpec, table: &RawTable, values: &[Value]) -> Value {
        match d {
            Derivation::SourceFile => Value::Text(table.source.clone()),
            Derivation::SourceKind => Value::Text(table.kind.clone()),
            Derivation::Sheet => table
                .sheet
                .clone()
                .map_or(Value::Null, Value::Text),
            Derivation::Week => {
                let from_column = col
                    .from
                    .as_deref()
                    .and_then(|name| self.schema.index_of(name))
                    .and_then(|i| match values[i] {
                        // YYYYWW → WW
                        Value::Integer(yw) if yw >= 100 => Some(yw % 100),
                        Value::Integer(w) => Some(w),
                        _ => None,
                    });
                from_column
                    .or(table.week.map(i64::from))
                    .map_or(Value::Null, Value::Integer)
            }
        }
    }

    fn key_of(&self, values: &[Value]) -> String {
        self.key
            .iter()
            .map(|&i| format!("{:?}", values[i]))
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}
