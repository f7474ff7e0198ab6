// src/config.rs

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

use crate::model::{CanonicalSchema, ColumnSpec, ColumnType, Derivation};

pub const DEFAULT_CONFIG_PATH: &str = "longstanding.yaml";

/// Everything a run needs, passed explicitly into `Pipeline::new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source_dir: PathBuf,
    pub files: FileRule,
    /// Sheets to read from each workbook; empty means the first sheet.
    pub sheets: Vec<String>,
    /// Report families, tried in order against the lower-cased file name.
    pub kinds: Vec<SourceKind>,
    pub schema: CanonicalSchema,
    /// Columns forming the dedup key; empty means every non-derived column.
    pub natural_key: Vec<String>,
    pub summary: SummaryConfig,
    pub output: OutputConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRule {
    pub extensions: Vec<String>,
    /// Exact file names that are never read.
    pub ignore: Vec<String>,
    /// Optional regex the file name must match.
    pub name_pattern: Option<String>,
    /// Week selection such as `26`, `26,27` or `26-28`.
    pub weeks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceKind {
    pub name: String,
    pub match_any: Vec<String>,
    /// Header spelling in this family → canonical column name.
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub breakdown: Vec<String>,
    pub measure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Csv,
    Parquet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub format: OutputFormat,
    /// Prefix CSV output with a UTF-8 byte order mark.
    pub utf8_bom: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject_prefix: String,
    pub alert_prefix: String,
    pub retry_backoff_secs: u64,
    pub transport: TransportConfig,
}

impl NotifyConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    HttpRelay {
        endpoint: String,
        /// Environment variable holding the bearer token.
        #[serde(default)]
        token_env: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Outbox {
        dir: PathBuf,
    },
}

fn default_timeout_secs() -> u64 {
    30
}

/// Values given on the command line that replace their configured counterparts.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub source_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub recipients: Vec<String>,
    pub weeks: Option<String>,
}

impl Default for FileRule {
    fn default() -> Self {
        Self {
            extensions: ["xlsx", "xls", "xlsm", "xlsb", "xltx", "xltm", "csv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore: vec!["Raw Data.xlsx".into(), "DCC Not Sent.xlsx".into()],
            name_pattern: None,
            weeks: None,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            breakdown: vec!["WEEK".into(), "SOURCE_TYPE".into()],
            measure: Some("DAYS".into()),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("out/ExportLongstanding_MasterData.csv"),
            format: OutputFormat::Csv,
            utf8_bom: true,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sender: "longstanding-report@localhost".into(),
            recipients: Vec::new(),
            subject_prefix: "[Longstanding]".into(),
            alert_prefix: "[ALERT]".into(),
            retry_backoff_secs: 30,
            transport: TransportConfig::Outbox {
                dir: PathBuf::from("outbox"),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("reports"),
            files: FileRule::default(),
            sheets: Vec::new(),
            kinds: default_kinds(),
            schema: default_schema(),
            natural_key: Vec::new(),
            summary: SummaryConfig::default(),
            output: OutputConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

fn default_kinds() -> Vec<SourceKind> {
    let kind = |name: &str, match_any: &[&str], columns: &[(&str, &str)]| SourceKind {
        name: name.to_string(),
        match_any: match_any.iter().map(|s| s.to_string()).collect(),
        columns: columns
            .iter()
            .map(|(a, c)| (a.to_string(), c.to_string()))
            .collect(),
    };
    vec![
        kind(
            "LS_Template",
            &["ls template", "ls templet"],
            &[
                ("Booking number", "SHIPMENT_NUMBER"),
                ("Days since Gated Out", "DAYS"),
                ("ACTLOC Country", "ACTLOC_COUNTRY"),
                ("Container Type", "CONT_TYPE"),
                ("Process", "MOVE"),
            ],
        ),
        kind(
            "Export_Empties",
            &["export_empties_longstandings", "empties longstanding"],
            &[("Last move", "MOVE")],
        ),
        kind(
            "Export_Longstandings",
            &["export_longstandings", "export longstanding"],
            &[("Last move", "MOVE")],
        ),
    ]
}

fn default_schema() -> CanonicalSchema {
    let mut week = ColumnSpec::derived("WEEK", ColumnType::Integer, Derivation::Week);
    week.from = Some("CURRENT_YEARWEEK".into());
    CanonicalSchema {
        columns: vec![
            ColumnSpec::new("CURRENT_YEARWEEK", ColumnType::Integer, false),
            ColumnSpec::new("ACTLOC_COUNTRY", ColumnType::Text, true),
            ColumnSpec::new("CONT_TYPE", ColumnType::Text, false),
            ColumnSpec::new("DAYS", ColumnType::NumericRange, true),
            ColumnSpec::new("MOVE", ColumnType::Text, false),
            ColumnSpec::new("SHIPMENT_NUMBER", ColumnType::Text, true),
            week,
            ColumnSpec::derived("SOURCE", ColumnType::Text, Derivation::SourceFile),
            ColumnSpec::derived("SOURCE_TYPE", ColumnType::Text, Derivation::SourceKind),
        ],
    }
}

impl Config {
    /// Load from `path`, or from `longstanding.yaml` when no path is given.
    /// A missing default file yields the built-in defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        if !explicit && !path.exists() {
            info!("no {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(dir) = overrides.source_dir {
            self.source_dir = dir;
        }
        if let Some(out) = overrides.output {
            self.output.path = out;
        }
        if !overrides.recipients.is_empty() {
            self.notify.recipients = overrides.recipients;
        }
        if overrides.weeks.is_some() {
            self.files.weeks = overrides.weeks;
        }
    }

    /// Check cross-references that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for col in &self.schema.columns {
            if !seen.insert(col.name.as_str()) {
                bail!("schema column `{}` is declared twice", col.name);
            }
            if col.is_derived() && col.required {
                bail!("derived column `{}` cannot be required", col.name);
            }
            let fits = match col.derive {
                None => true,
                Some(Derivation::Week) => col.ty == ColumnType::Integer,
                Some(_) => col.ty == ColumnType::Text,
            };
            if !fits {
                bail!("derived column `{}` cannot have type {}", col.name, col.ty);
            }
            if col.derive == Some(Derivation::Week) {
                if let Some(from) = &col.from {
                    if self.schema.index_of(from).is_none() {
                        bail!("column `{}` derives from unknown column `{}`", col.name, from);
                    }
                }
            }
        }
        if self.schema.columns.iter().all(ColumnSpec::is_derived) {
            bail!("schema has no source columns");
        }
        for name in self.natural_key.iter().chain(&self.summary.breakdown) {
            if self.schema.index_of(name).is_none() {
                bail!("`{}` is not a schema column", name);
            }
        }
        if let Some(measure) = &self.summary.measure {
            if self.schema.index_of(measure).is_none() {
                bail!("summary measure `{}` is not a schema column", measure);
            }
        }
        for kind in &self.kinds {
            for target in kind.columns.values() {
                if self.schema.index_of(target).is_none() {
                    bail!("kind `{}` maps onto unknown column `{}`", kind.name, target);
                }
            }
        }
        if let Some(pattern) = &self.files.name_pattern {
            Regex::new(pattern).with_context(|| format!("invalid name_pattern `{}`", pattern))?;
        }
        if self.notify.recipients.is_empty() {
            bail!("no notification recipients configured");
        }
        Ok(())
    }
}
