// src/extract/mod.rs

pub mod reader;
pub mod weeks;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use glob::glob;
use regex::Regex;
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, FileRule, SourceKind};
use crate::model::{RawTable, Rejection, RejectionKind};
use weeks::{enclosing_week, WeekSelection};

pub const DEFAULT_KIND: &str = "default";

/// Finds matching report files under the source folder and reads them into
/// `RawTable`s. Never writes to the folder.
pub struct Extractor {
    root: PathBuf,
    rule: FileRule,
    name_pattern: Option<Regex>,
    weeks: Option<WeekSelection>,
    sheets: Vec<String>,
    kinds: Vec<SourceKind>,
}

/// A file that passed the matching rule and is waiting to be read.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    relative: String,
    kind: String,
    week: Option<u32>,
}

impl Extractor {
    pub fn new(config: &Config) -> Result<Self> {
        let name_pattern = config
            .files
            .name_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("compiling name_pattern")?;
        let weeks = config.files.weeks.as_deref().map(WeekSelection::parse);
        if let Some(sel) = &weeks {
            if sel.is_empty() {
                warn!("week selection contains no valid week; nothing will match");
            }
        }
        Ok(Self {
            root: config.source_dir.clone(),
            rule: config.files.clone(),
            name_pattern,
            weeks,
            sheets: config.sheets.clone(),
            kinds: config.kinds.clone(),
        })
    }

    /// Snapshot the matching files now and return an iterator that reads them
    /// one at a time, in lexicographic order of their relative path. Each
    /// call re-scans the folder.
    #[instrument(level = "info", skip(self), fields(root = %self.root.display()))]
    pub fn scan(&self) -> Result<SourceIter<'_>> {
        if !self.root.is_dir() {
            bail!("source folder {} is not a readable directory", self.root.display());
        }
        let pattern = format!("{}/**/*", glob::Pattern::escape(&self.root.to_string_lossy()));

        let mut candidates = Vec::new();
        let mut unmatched_kind = 0usize;
        for entry in glob(&pattern).context("invalid glob pattern for source scan")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("cannot read glob entry: {}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            if let Some(c) = self.candidate(&path, &mut unmatched_kind) {
                candidates.push(c);
            }
        }
        candidates.sort_by(|a, b| a.relative.cmp(&b.relative));
        info!(files = candidates.len(), unmatched_kind, "matched source files");

        Ok(SourceIter {
            extractor: self,
            pending: candidates.into(),
            ready: VecDeque::new(),
            unmatched_kind,
        })
    }

    /// Bumps `unmatched_kind` for files that pass every other rule but whose
    /// name matches no report kind.
    fn candidate(&self, path: &Path, unmatched_kind: &mut usize) -> Option<Candidate> {
        let file_name = path.file_name()?.to_str()?;
        let relative_path = path.strip_prefix(&self.root).ok()?;
        let relative = relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| {
                self.rule.extensions.iter().any(|x| x.eq_ignore_ascii_case(e))
            });
        if !ext_ok {
            return None;
        }
        if file_name.starts_with("~$") {
            debug!(file = %relative, "skipping office lock file");
            return None;
        }
        if self.rule.ignore.iter().any(|i| i == file_name) {
            debug!(file = %relative, "ignored by name");
            return None;
        }
        if let Some(re) = &self.name_pattern {
            if !re.is_match(file_name) {
                debug!(file = %relative, "name does not match pattern");
                return None;
            }
        }

        let Some(kind) = self.classify(file_name) else {
            info!(file = %relative, "skipped: name matches no report kind");
            *unmatched_kind += 1;
            return None;
        };
        let week = enclosing_week(relative_path);
        if let Some(sel) = &self.weeks {
            if !week.map_or(false, |w| sel.contains(w)) {
                debug!(file = %relative, ?week, "outside week selection");
                return None;
            }
        }

        Some(Candidate {
            path: path.to_path_buf(),
            relative,
            kind,
            week,
        })
    }

    /// Name of the first kind whose marker occurs in the file name.
    fn classify(&self, file_name: &str) -> Option<String> {
        if self.kinds.is_empty() {
            return Some(DEFAULT_KIND.to_string());
        }
        let lower = file_name.to_lowercase();
        self.kinds
            .iter()
            .find(|k| {
                k.match_any
                    .iter()
                    .any(|m| lower.contains(&m.to_lowercase()))
            })
            .map(|k| k.name.clone())
    }

    fn read(&self, c: &Candidate) -> Result<Vec<RawTable>> {
        let modified: DateTime<Utc> = fs::metadata(&c.path)
            .and_then(|m| m.modified())
            .with_context(|| format!("reading metadata of {}", c.path.display()))?
            .into();
        let sheets = reader::read_source(&c.path, &self.sheets)?;
        Ok(sheets
            .into_iter()
            .map(|s| RawTable {
                source: c.relative.clone(),
                path: c.path.clone(),
                modified,
                sheet: s.sheet,
                kind: c.kind.clone(),
                week: c.week,
                columns: s.columns,
                rows: s.rows,
            })
            .collect())
    }
}

/// Lazily reads the files snapshotted by `Extractor::scan`.
pub struct SourceIter<'a> {
    extractor: &'a Extractor,
    pending: VecDeque<Candidate>,
    /// Tables already read from a multi-sheet workbook.
    ready: VecDeque<RawTable>,
    unmatched_kind: usize,
}

impl SourceIter<'_> {
    /// Files left out of this scan because no report kind matched their name.
    pub fn unmatched_kind(&self) -> usize {
        self.unmatched_kind
    }
}

impl Iterator for SourceIter<'_> {
    type Item = std::result::Result<RawTable, Rejection>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(t) = self.ready.pop_front() {
            return Some(Ok(t));
        }
        let c = self.pending.pop_front()?;
        match self.extractor.read(&c) {
            Ok(tables) => {
                info!(file = %c.relative, kind = %c.kind, sheets = tables.len(), "read source");
                self.ready.extend(tables);
                match self.ready.pop_front() {
                    Some(t) => Some(Ok(t)),
                    None => self.next(),
                }
            }
            Err(e) => {
                warn!(file = %c.relative, error = %format!("{:#}", e), "skipping unreadable source");
                Some(Err(Rejection::file(
                    c.relative,
                    RejectionKind::SourceUnreadable,
                    format!("{:#}", e),
                )))
            }
        }
    }
}
