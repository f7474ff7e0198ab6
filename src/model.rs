// src/model.rs

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

/// A loosely typed spreadsheet scalar, as read from a workbook or CSV.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
    Empty,
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => write!(f, "{}", s),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Date(d) => write!(f, "{}", d),
            Cell::Empty => Ok(()),
        }
    }
}

/// One data row of a source sheet.
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based line number in the source sheet (the header is the first line).
    pub line: usize,
    /// One cell per column of the owning table.
    pub cells: Vec<Cell>,
}

/// One parsed source spreadsheet, pre-validation.
#[derive(Debug)]
pub struct RawTable {
    /// Path relative to the source folder, `/`-separated.
    pub source: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    /// Sheet the rows were read from; `None` for CSV.
    pub sheet: Option<String>,
    /// Name of the report family this file was classified as.
    pub kind: String,
    /// Number of the nearest enclosing week folder, if any.
    pub week: Option<u32>,
    /// Column names exactly as the file spells them.
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    /// Look up a cell by column name (first column with that exact name).
    pub fn get<'a>(&self, row: &'a RawRow, column: &str) -> Option<&'a Cell> {
        let idx = self.columns.iter().position(|c| c == column)?;
        row.cells.get(idx)
    }

    /// Label used in logs and rejections: the source name plus the sheet.
    pub fn label(&self) -> String {
        match &self.sheet {
            Some(sheet) => format!("{} [{}]", self.source, sheet),
            None => self.source.clone(),
        }
    }
}

/// Declared type of a canonical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Number,
    /// A number that reports sometimes write as a range (`29 to 35 days`).
    NumericRange,
    Date,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Number => "number",
            ColumnType::NumericRange => "numeric range",
            ColumnType::Date => "date",
        };
        f.write_str(s)
    }
}

/// How a derived column is computed from a table and its cleaned row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    SourceFile,
    SourceKind,
    Sheet,
    /// Week number from a `YYYYWW` column named by `from`, else the week folder.
    Week,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default)]
    pub required: bool,
    /// Other header spellings that map onto this column for every source kind.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derive: Option<Derivation>,
    /// Input column for derivations that read one (`week`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: &str, ty: ColumnType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required,
            aliases: Vec::new(),
            derive: None,
            from: None,
        }
    }

    pub fn derived(name: &str, ty: ColumnType, derive: Derivation) -> Self {
        Self {
            derive: Some(derive),
            ..Self::new(name, ty, false)
        }
    }

    pub fn is_derived(&self) -> bool {
        self.derive.is_some()
    }
}

/// The fixed, ordered column layout of the published dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalSchema {
    pub columns: Vec<ColumnSpec>,
}

impl CanonicalSchema {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A canonical, typed scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Renders the value the way it is written to CSV: dates as `YYYY-MM-DD`,
/// whole numbers without a fractional part, null as the empty string.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Null => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Provenance {
    /// Labels of the tables that contributed at least one accepted row.
    pub sources: Vec<String>,
    pub extracted_at: DateTime<Utc>,
}

/// The single validated, merged table consumed by the dashboard.
#[derive(Debug, Clone)]
pub struct CanonicalDataset {
    pub schema: CanonicalSchema,
    pub rows: Vec<Vec<Value>>,
    pub provenance: Provenance,
}

impl CanonicalDataset {
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectionKind {
    SourceUnreadable,
    SchemaMismatch,
    InvalidValue,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionKind::SourceUnreadable => "source unreadable",
            RejectionKind::SchemaMismatch => "schema mismatch",
            RejectionKind::InvalidValue => "invalid value",
        };
        f.write_str(s)
    }
}

/// A source file, sheet or row that did not make it into the dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub source: String,
    /// Spreadsheet line for row-level rejections.
    pub line: Option<usize>,
    pub kind: RejectionKind,
    pub reason: String,
}

impl Rejection {
    pub fn file(source: impl Into<String>, kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            line: None,
            kind,
            reason: reason.into(),
        }
    }

    pub fn row(
        source: impl Into<String>,
        line: usize,
        kind: RejectionKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            line: Some(line),
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} line {}: {} ({})", self.source, line, self.reason, self.kind),
            None => write!(f, "{}: {} ({})", self.source, self.reason, self.kind),
        }
    }
}
