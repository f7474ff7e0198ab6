// src/transform/coerce.rs

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use super::{date_parser, utils};
use crate::model::{Cell, ColumnType, Value};

static RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(?:to|-|–|~)\s*(\d+(?:\.\d+)?)").expect("range regex")
});
static SINGLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number regex"));

/// Resolve a raw cell to `ty`.
///
/// Empty cells (and text that is blank after cleaning) become `Value::Null`.
/// A non-empty cell that cannot be read as `ty` yields `Err` carrying the
/// offending text; nothing is ever silently cast.
pub fn coerce(cell: &Cell, ty: ColumnType) -> Result<Value, String> {
    let text = match cell {
        Cell::Empty => return Ok(Value::Null),
        Cell::Text(s) => {
            let cleaned = utils::clean_str(s);
            if cleaned.is_empty() {
                return Ok(Value::Null);
            }
            Some(cleaned)
        }
        _ => None,
    };

    let out = match (ty, cell, text) {
        (ColumnType::Text, _, Some(s)) => Some(Value::Text(s)),
        (ColumnType::Text, Cell::Number(n), None) => Some(Value::Text(utils::number_to_text(*n))),
        (ColumnType::Text, Cell::Date(dt), None) => Some(Value::Text(
            if dt.time() == chrono::NaiveTime::MIN {
                dt.format("%Y-%m-%d").to_string()
            } else {
                dt.format("%Y-%m-%d %H:%M:%S").to_string()
            },
        )),

        (ColumnType::Integer, Cell::Number(n), None) => whole(*n).map(Value::Integer),
        (ColumnType::Integer, _, Some(s)) => {
            let s = s.replace(',', "");
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole))
                .map(Value::Integer)
        }

        (ColumnType::Number, Cell::Number(n), None) => Some(Value::Number(*n)),
        (ColumnType::Number, _, Some(s)) => s
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Number),

        (ColumnType::NumericRange, Cell::Number(n), None) => Some(Value::Number(*n)),
        (ColumnType::NumericRange, _, Some(s)) => parse_range(&s).map(Value::Number),

        (ColumnType::Date, Cell::Date(dt), None) => Some(Value::Date(dt.date())),
        (ColumnType::Date, Cell::Number(n), None) => {
            date_parser::from_excel_serial(*n).map(Value::Date)
        }
        (ColumnType::Date, _, Some(s)) => date_parser::parse_date(&s).map(Value::Date),

        _ => None,
    };

    out.ok_or_else(|| {
        let shown = cell.to_string();
        trace!(cell = %shown, %ty, "coercion failed");
        shown
    })
}

fn whole(n: f64) -> Option<i64> {
    (n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15).then(|| n as i64)
}

/// Read a figure that may be written as a range (`29 to 35 days`, `20-25`,
/// `15–20`, `10~12`) as the midpoint, or as the single number it contains
/// (`25 days`).
pub fn parse_range(s: &str) -> Option<f64> {
    let lower = s.to_lowercase();
    if let Some(c) = RANGE.captures(&lower) {
        let start: f64 = c.get(1)?.as_str().parse().ok()?;
        let end: f64 = c.get(2)?.as_str().parse().ok()?;
        return Some((start + end) / 2.0);
    }
    SINGLE.find(&lower)?.as_str().parse().ok()
}
