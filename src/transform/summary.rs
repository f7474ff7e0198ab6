use serde::Serialize;
use std::{collections::BTreeMap, fmt};

use crate::config::SummaryConfig;
use crate::model::{CanonicalDataset, Value};

/// Row counts per value of a breakdown column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub column: String,
    pub counts: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureStats {
    pub column: String,
    /// Rows holding a numeric value in the measure column.
    pub valid: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Totals reported alongside a published dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub breakdowns: Vec<Breakdown>,
    pub measure: Option<MeasureStats>,
}

// integers sort numerically, then text, then blanks
fn sort_key(v: &Value) -> (u8, i64, String) {
    match v {
        Value::Integer(i) => (0, *i, String::new()),
        Value::Null => (2, 0, String::new()),
        other => (1, 0, other.to_string()),
    }
}

impl DatasetSummary {
    pub fn compute(dataset: &CanonicalDataset, config: &SummaryConfig) -> Self {
        let breakdowns = config
            .breakdown
            .iter()
            .filter_map(|name| {
                let mut counts: BTreeMap<(u8, i64, String), (String, usize)> = BTreeMap::new();
                for v in dataset.column(name)? {
                    let label = if v.is_null() {
                        "(blank)".to_string()
                    } else {
                        v.to_string()
                    };
                    counts.entry(sort_key(v)).or_insert((label, 0)).1 += 1;
                }
                Some(Breakdown {
                    column: name.clone(),
                    counts: counts.into_values().collect(),
                })
            })
            .collect();

        let measure = config.measure.as_ref().and_then(|name| {
            let values: Vec<f64> = dataset.column(name)?.filter_map(Value::as_f64).collect();
            if values.is_empty() {
                return None;
            }
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            Some(MeasureStats {
                column: name.clone(),
                valid: values.len(),
                min,
                max,
                mean,
            })
        });

        Self {
            rows: dataset.rows.len(),
            breakdowns,
            measure,
        }
    }
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total rows: {}", self.rows)?;
        for b in &self.breakdowns {
            writeln!(f, "Rows by {}:", b.column)?;
            for (label, n) in &b.counts {
                writeln!(f, "  - {}: {}", label, n)?;
            }
        }
        if let Some(m) = &self.measure {
            writeln!(f, "{} statistics:", m.column)?;
            writeln!(f, "  - valid numeric values: {}/{}", m.valid, self.rows)?;
            writeln!(f, "  - range: {:.0} to {:.0}", m.min, m.max)?;
            writeln!(f, "  - average: {:.1}", m.mean)?;
        }
        Ok(())
    }
}
