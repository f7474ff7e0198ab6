// src/pipeline.rs

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::error::{NotificationTransportFailure, PipelineError};
use crate::extract::Extractor;
use crate::model::Rejection;
use crate::notify::{self, MailTransport, Notifier};
use crate::publish;
use crate::transform::{summary::DatasetSummary, TransformOutput, Transformer};

#[derive(Debug)]
pub enum Outcome {
    Success,
    Failure(PipelineError),
}

/// What one run did. Handed to the notifier, never persisted.
#[derive(Debug)]
pub struct RunResult {
    pub outcome: Outcome,
    pub rows_written: usize,
    /// Source files that contributed at least one row.
    pub sources: Vec<String>,
    pub rejections: Vec<Rejection>,
    pub duplicates_dropped: usize,
    pub output: PathBuf,
    pub summary: Option<DatasetSummary>,
    pub timestamp: DateTime<Utc>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub result: RunResult,
    pub notification: Result<(), NotificationTransportFailure>,
}

impl RunReport {
    /// 0 clean, 3 partial, 2 no valid input, 1 write failure, 4 notification
    /// lost after an otherwise successful run.
    pub fn exit_code(&self) -> i32 {
        match &self.result.outcome {
            Outcome::Failure(PipelineError::NoValidInput(_)) => 2,
            Outcome::Failure(PipelineError::WriteFailure { .. }) => 1,
            Outcome::Success if self.notification.is_err() => 4,
            Outcome::Success if !self.result.rejections.is_empty() => 3,
            Outcome::Success => 0,
        }
    }
}

/// Extract → transform → publish → notify, once.
pub struct Pipeline {
    config: Config,
    extractor: Extractor,
    transformer: Transformer,
    notifier: Notifier,
}

impl Pipeline {
    pub fn new(config: Config, transport: Box<dyn MailTransport>) -> Result<Self> {
        let extractor = Extractor::new(&config)?;
        let transformer = Transformer::new(&config);
        let notifier = Notifier::new(transport, config.notify.retry_backoff());
        Ok(Self {
            config,
            extractor,
            transformer,
            notifier,
        })
    }

    /// Refresh the dataset and send the status email. `now` stamps the run.
    pub fn run(&self, now: DateTime<Utc>) -> RunReport {
        let result = self.refresh(now);
        let message = notify::compose(&result, &self.config.notify);
        let notification = self.notifier.deliver(&message);
        RunReport {
            result,
            notification,
        }
    }

    /// Everything up to and including publishing the artifact.
    #[instrument(level = "info", skip(self), fields(source_dir = %self.config.source_dir.display()))]
    pub fn refresh(&self, now: DateTime<Utc>) -> RunResult {
        let TransformOutput {
            dataset,
            rejections,
            duplicates_dropped,
        } = match self.extractor.scan() {
            Ok(tables) => {
                let unmatched = tables.unmatched_kind();
                let mut out = self.transformer.run(tables, now);
                if let Err(PipelineError::NoValidInput(reason)) = &mut out.dataset {
                    if unmatched > 0 {
                        reason.push_str(&format!(
                            " ({} file(s) skipped because their name matches no report kind)",
                            unmatched
                        ));
                    }
                }
                out
            }
            Err(e) => TransformOutput {
                dataset: Err(PipelineError::NoValidInput(format!("{:#}", e))),
                rejections: Vec::new(),
                duplicates_dropped: 0,
            },
        };

        let mut result = RunResult {
            outcome: Outcome::Success,
            rows_written: 0,
            sources: Vec::new(),
            rejections,
            duplicates_dropped,
            output: self.config.output.path.clone(),
            summary: None,
            timestamp: now,
        };

        let dataset = match dataset {
            Ok(ds) => ds,
            Err(e) => {
                error!(error = %e, rejected = result.rejections.len(), "refresh failed");
                result.outcome = Outcome::Failure(e);
                return result;
            }
        };

        if let Err(e) = publish::write_dataset(&dataset, &self.config.output) {
            error!(error = %e, "refresh failed");
            result.outcome = Outcome::Failure(e);
            return result;
        }

        let summary = DatasetSummary::compute(&dataset, &self.config.summary);
        result.rows_written = dataset.rows.len();
        result.sources = dataset.provenance.sources;
        if !result.rejections.is_empty() {
            warn!(count = result.rejections.len(), "some sources or rows were rejected");
        }
        info!(
            rows = result.rows_written,
            files = result.sources.len(),
            duplicates = result.duplicates_dropped,
            "refresh complete\n{}",
            summary
        );
        result.summary = Some(summary);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::model::RejectionKind;
    use crate::notify::testing::RecordingTransport;
    use chrono::{Duration, TimeZone};
    use rust_xlsxwriter::Workbook;
    use std::{fs, path::Path};
    use tempfile::{tempdir, TempDir};
    use tracing_subscriber::EnvFilter;

    const HEADER: [&str; 4] = ["SHIPMENT_NUMBER", "ACTLOC_COUNTRY", "DAYS", "CURRENT_YEARWEEK"];

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    }

    /// Rows are (shipment, country, days); an empty shipment leaves the cell blank.
    fn write_report(path: &Path, rows: &[(&str, &str, &str)]) {
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        for (c, h) in HEADER.iter().enumerate() {
            ws.write_string(0, c as u16, *h).unwrap();
        }
        for (i, (id, country, days)) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            if !id.is_empty() {
                ws.write_string(r, 0, *id).unwrap();
            }
            ws.write_string(r, 1, *country).unwrap();
            ws.write_string(r, 2, *days).unwrap();
            ws.write_number(r, 3, 202528.0).unwrap();
        }
        wb.save(path).unwrap();
    }

    struct Fixture {
        dir: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new(format: OutputFormat) -> Self {
            init_tracing();
            let dir = tempdir().unwrap();
            fs::create_dir(dir.path().join("reports")).unwrap();
            let mut config = Config::default();
            config.kinds.clear();
            config.source_dir = dir.path().join("reports");
            config.output.path = dir.path().join("out").join(match format {
                OutputFormat::Csv => "master.csv",
                OutputFormat::Parquet => "master.parquet",
            });
            config.output.format = format;
            config.notify.recipients = vec!["ops@example.com".into()];
            config.notify.retry_backoff_secs = 0;
            Self { dir, config }
        }

        fn report(&self, name: &str) -> std::path::PathBuf {
            self.dir.path().join("reports").join(name)
        }

        fn run(&self, fake: &RecordingTransport, now: DateTime<Utc>) -> RunReport {
            Pipeline::new(self.config.clone(), Box::new(fake.clone()))
                .unwrap()
                .run(now)
        }

        /// jan: 10 valid rows. feb: 4 new rows, one row repeated from jan, one
        /// row without a shipment number.
        fn jan_and_feb(&self) {
            let jan: Vec<(String, &str, &str)> = (1..=10)
                .map(|i| (format!("J{:02}", i), "Chile", "29 to 35 days"))
                .collect();
            let jan_rows: Vec<(&str, &str, &str)> =
                jan.iter().map(|(a, b, c)| (a.as_str(), *b, *c)).collect();
            write_report(&self.report("jan.xlsx"), &jan_rows);
            write_report(
                &self.report("feb.xlsx"),
                &[
                    ("F01", "Peru", "12"),
                    ("F02", "Peru", "40"),
                    ("J03", "Chile", "29 to 35 days"),
                    ("F03", "Peru", "3"),
                    ("", "Peru", "8"),
                    ("F04", "Peru", "7 days"),
                ],
            );
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 6, 30, 0).unwrap()
    }

    #[test]
    fn jan_and_feb_produce_fourteen_rows_and_one_rejection() {
        let fx = Fixture::new(OutputFormat::Csv);
        fx.jan_and_feb();
        let fake = RecordingTransport::default();

        let report = fx.run(&fake, now());
        let result = &report.result;
        assert!(result.succeeded());
        assert_eq!(result.rows_written, 14);
        assert_eq!(result.duplicates_dropped, 1);
        assert_eq!(result.sources, vec!["feb.xlsx", "jan.xlsx"]);
        assert_eq!(result.rejections.len(), 1);
        let r = &result.rejections[0];
        assert_eq!(r.source, "feb.xlsx [Sheet1]");
        assert_eq!(r.line, Some(6));
        assert!(r.reason.contains("missing required field"));
        assert_eq!(report.exit_code(), 3);

        let csv = fs::read_to_string(&fx.config.output.path).unwrap();
        let csv = csv.trim_start_matches('\u{feff}');
        assert_eq!(csv.lines().count(), 15);
        assert!(csv.starts_with(
            "CURRENT_YEARWEEK,ACTLOC_COUNTRY,CONT_TYPE,DAYS,MOVE,SHIPMENT_NUMBER,WEEK,SOURCE,SOURCE_TYPE\n"
        ));
        assert!(csv.contains("202528,Peru,,12,,F01,28,feb.xlsx,default\n"));

        let sent = fake.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("refreshed: 14 rows from 2 files"));
        assert!(sent[0].body.contains("Rows by WEEK:\n  - 28: 14"));
    }

    #[test]
    fn repeated_runs_are_byte_identical() {
        for format in [OutputFormat::Csv, OutputFormat::Parquet] {
            let fx = Fixture::new(format);
            fx.jan_and_feb();
            let fake = RecordingTransport::default();

            fx.run(&fake, now());
            let first = fs::read(&fx.config.output.path).unwrap();
            fx.run(&fake, now() + Duration::days(1));
            let second = fs::read(&fx.config.output.path).unwrap();
            assert_eq!(first, second, "{:?} output differs", format);
        }
    }

    #[test]
    fn corrupt_file_is_isolated() {
        let fx = Fixture::new(OutputFormat::Csv);
        fx.jan_and_feb();
        fs::write(fx.report("broken.xlsx"), b"this is not a zip archive").unwrap();
        let fake = RecordingTransport::default();

        let report = fx.run(&fake, now());
        assert!(report.result.succeeded());
        assert_eq!(report.result.rows_written, 14);
        let unreadable: Vec<_> = report
            .result
            .rejections
            .iter()
            .filter(|r| r.kind == RejectionKind::SourceUnreadable)
            .collect();
        assert_eq!(unreadable.len(), 1);
        assert_eq!(unreadable[0].source, "broken.xlsx");
        assert!(fake.sent()[0].body.contains("broken.xlsx"));
    }

    #[test]
    fn empty_folder_fails_without_touching_artifact() {
        let fx = Fixture::new(OutputFormat::Csv);
        fs::create_dir_all(fx.config.output.path.parent().unwrap()).unwrap();
        fs::write(&fx.config.output.path, "previous").unwrap();
        let fake = RecordingTransport::default();

        let report = fx.run(&fake, now());
        assert!(matches!(
            report.result.outcome,
            Outcome::Failure(PipelineError::NoValidInput(_))
        ));
        assert_eq!(report.exit_code(), 2);
        assert_eq!(fs::read_to_string(&fx.config.output.path).unwrap(), "previous");

        let sent = fake.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("[ALERT] [Longstanding] refresh FAILED:"));
    }

    #[test]
    fn empty_folder_writes_no_artifact() {
        let fx = Fixture::new(OutputFormat::Csv);
        let report = fx.run(&RecordingTransport::default(), now());
        assert!(!report.result.succeeded());
        assert!(!fx.config.output.path.exists());
    }

    #[test]
    fn unclassified_files_are_named_in_failure_reason() {
        let mut fx = Fixture::new(OutputFormat::Csv);
        fx.config.kinds = Config::default().kinds;
        fx.jan_and_feb();
        let fake = RecordingTransport::default();

        let report = fx.run(&fake, now());
        match &report.result.outcome {
            Outcome::Failure(PipelineError::NoValidInput(reason)) => assert_eq!(
                reason,
                "no matching source files found \
                 (2 file(s) skipped because their name matches no report kind)"
            ),
            other => panic!("expected NoValidInput, got {:?}", other),
        }
        assert!(fake.sent()[0].subject.contains("matches no report kind"));
    }

    #[test]
    fn missing_source_folder_is_no_valid_input() {
        let mut fx = Fixture::new(OutputFormat::Csv);
        fx.config.source_dir = fx.dir.path().join("nowhere");
        let report = fx.run(&RecordingTransport::default(), now());
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn write_failure_keeps_previous_artifact_and_alerts() {
        let mut fx = Fixture::new(OutputFormat::Csv);
        fx.jan_and_feb();
        // the target is an existing directory, so the rename cannot succeed
        fx.config.output.path = fx.dir.path().join("taken");
        fs::create_dir(&fx.config.output.path).unwrap();
        let fake = RecordingTransport::default();

        let report = fx.run(&fake, now());
        assert_eq!(report.exit_code(), 1);
        assert!(fx.config.output.path.is_dir());
        assert!(fake.sent()[0].subject.contains("refresh FAILED: failed to write"));
    }

    #[test]
    fn transport_retry_does_not_change_outcome() {
        let fx = Fixture::new(OutputFormat::Csv);
        write_report(&fx.report("jan.xlsx"), &[("J01", "Chile", "3")]);

        let flaky = RecordingTransport::failing(1);
        let report = fx.run(&flaky, now());
        assert!(report.notification.is_ok());
        assert_eq!(flaky.calls(), 2);
        assert_eq!(report.exit_code(), 0);

        let down = RecordingTransport::failing(2);
        let report = fx.run(&down, now());
        assert!(report.result.succeeded());
        assert_eq!(report.notification.as_ref().unwrap_err().attempts, 2);
        assert_eq!(report.exit_code(), 4);
    }
}
