// src/extract/reader.rs

use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use std::path::Path;
use tracing::{debug, trace};

use crate::model::{Cell, RawRow};
use crate::transform::date_parser;

/// Header and rows of one sheet (or of a CSV file).
#[derive(Debug)]
pub struct SheetData {
    pub sheet: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Read `path` as CSV or as a workbook, depending on its extension.
pub fn read_source(path: &Path, sheets: &[String]) -> Result<Vec<SheetData>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        Ok(vec![read_csv(path)?])
    } else {
        read_workbook(path, sheets)
    }
}

fn read_csv(path: &Path) -> Result<SheetData> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening CSV {}", path.display()))?;

    let columns: Vec<String> = rdr
        .byte_headers()
        .with_context(|| format!("reading CSV header of {}", path.display()))?
        .iter()
        .map(|h| {
            String::from_utf8_lossy(h)
                .trim_start_matches('\u{feff}')
                .to_string()
        })
        .collect();

    let mut rows = Vec::new();
    for (idx, record) in rdr.byte_records().enumerate() {
        let record = record
            .with_context(|| format!("CSV parse error in {} at record {}", path.display(), idx))?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);
        let mut cells: Vec<Cell> = record
            .iter()
            .take(columns.len())
            .map(|raw| {
                let s = String::from_utf8_lossy(raw);
                if s.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(s.into_owned())
                }
            })
            .collect();
        cells.resize(columns.len(), Cell::Empty);
        if cells.iter().all(Cell::is_empty) {
            continue;
        }
        rows.push(RawRow { line, cells });
    }
    debug!(path = %path.display(), rows = rows.len(), "read csv");

    Ok(SheetData {
        sheet: None,
        columns,
        rows,
    })
}

fn read_workbook(path: &Path, wanted: &[String]) -> Result<Vec<SheetData>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;
    let names = workbook.sheet_names();

    let selected: Vec<String> = if wanted.is_empty() {
        let first = names
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("workbook {} has no sheets", path.display()))?;
        vec![first]
    } else {
        wanted
            .iter()
            .filter(|w| names.iter().any(|n| n == *w))
            .cloned()
            .collect()
    };
    if selected.is_empty() {
        bail!("none of the sheets {:?} found (sheets: {:?})", wanted, names);
    }

    let mut out = Vec::with_capacity(selected.len());
    for sheet in selected {
        let range = workbook
            .worksheet_range(&sheet)
            .with_context(|| format!("failed to read sheet `{}`", sheet))?;
        let first_line = range.start().map_or(1, |(row, _)| row as usize + 1);

        let mut iter = range.rows();
        let columns: Vec<String> = match iter.next() {
            Some(header) => header.iter().map(header_text).collect(),
            None => Vec::new(),
        };

        let mut rows = Vec::new();
        for (offset, raw) in iter.enumerate() {
            let mut cells: Vec<Cell> = raw.iter().take(columns.len()).map(cell_from).collect();
            cells.resize(columns.len(), Cell::Empty);
            if cells.iter().all(Cell::is_empty) {
                continue;
            }
            rows.push(RawRow {
                line: first_line + 1 + offset,
                cells,
            });
        }
        trace!(sheet = %sheet, columns = columns.len(), rows = rows.len(), "read sheet");

        out.push(SheetData {
            sheet: Some(sheet),
            columns,
            rows,
        });
    }
    Ok(out)
}

fn header_text(data: &Data) -> String {
    match data {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Convert a workbook cell into the loosely typed `Cell`.
fn cell_from(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) if s.trim().is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) if dt.is_duration() => Cell::Number(dt.as_f64()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(Cell::Date)
            .unwrap_or_else(|| Cell::Number(dt.as_f64())),
        Data::DateTimeIso(s) => date_parser::parse_datetime(s)
            .map(Cell::Date)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        // keep the error literal so typed coercion fails visibly
        Data::Error(e) => Cell::Text(e.to_string()),
    }
}
