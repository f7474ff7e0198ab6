// src/notify/mod.rs

pub mod transport;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt::Write as _, thread, time::Duration};
use tracing::{error, info, warn};

use crate::config::NotifyConfig;
use crate::error::NotificationTransportFailure;
use crate::pipeline::{Outcome, RunResult};
pub use transport::MailTransport;

/// Attempts per notification: the first send plus one retry.
const MAX_ATTEMPTS: u32 = 2;

/// A plain-text status email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub date: DateTime<Utc>,
}

impl Notification {
    /// Headers and body as an RFC 822 message with CRLF line endings.
    pub fn to_rfc822(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "From: {}\r\n", header_value(&self.from));
        let _ = write!(out, "To: {}\r\n", header_value(&self.to.join(", ")));
        let _ = write!(out, "Subject: {}\r\n", header_value(&self.subject));
        let _ = write!(out, "Date: {}\r\n", self.date.to_rfc2822());
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        out.push_str("\r\n");
        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }
}

/// Folds line breaks into spaces so a value stays on its header line.
fn header_value(v: &str) -> String {
    v.split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Build the one status email for a finished run.
pub fn compose(result: &RunResult, config: &NotifyConfig) -> Notification {
    let mut body = String::new();
    let subject = match &result.outcome {
        Outcome::Success => {
            let _ = writeln!(body, "The master dataset was refreshed.");
            let _ = writeln!(body);
            let _ = writeln!(body, "Rows written: {}", result.rows_written);
            let _ = writeln!(body, "Files used: {}", result.sources.len());
            for s in &result.sources {
                let _ = writeln!(body, "  - {}", s);
            }
            let _ = writeln!(body, "Run at: {}", stamp(&result.timestamp));
            let _ = writeln!(body, "Output: {}", result.output.display());
            let _ = writeln!(body, "Duplicates dropped: {}", result.duplicates_dropped);
            if let Some(summary) = &result.summary {
                let _ = writeln!(body);
                let _ = write!(body, "{}", summary);
            }
            format!(
                "{} refreshed: {} rows from {} files ({})",
                config.subject_prefix,
                result.rows_written,
                result.sources.len(),
                stamp(&result.timestamp)
            )
        }
        Outcome::Failure(err) => {
            let _ = writeln!(body, "The master dataset was NOT refreshed.");
            let _ = writeln!(
                body,
                "The previous file at {} is unchanged.",
                result.output.display()
            );
            let _ = writeln!(body);
            let _ = writeln!(body, "Reason: {}", err);
            let _ = writeln!(body, "Run at: {}", stamp(&result.timestamp));
            format!(
                "{} {} refresh FAILED: {}",
                config.alert_prefix, config.subject_prefix, err
            )
        }
    };

    if !result.rejections.is_empty() {
        let _ = writeln!(body);
        let _ = writeln!(body, "Rejected ({}):", result.rejections.len());
        for r in &result.rejections {
            let _ = writeln!(body, "  - {}", r);
        }
    }

    Notification {
        from: config.sender.clone(),
        to: config.recipients.clone(),
        subject,
        body,
        date: result.timestamp,
    }
}

/// Sends notifications, retrying once after a pause.
pub struct Notifier {
    transport: Box<dyn MailTransport>,
    backoff: Duration,
}

impl Notifier {
    pub fn new(transport: Box<dyn MailTransport>, backoff: Duration) -> Self {
        Self { transport, backoff }
    }

    pub fn deliver(&self, message: &Notification) -> Result<(), NotificationTransportFailure> {
        let mut attempt = 1;
        loop {
            match self.transport.send(message) {
                Ok(()) => {
                    info!(
                        transport = self.transport.name(),
                        attempt,
                        subject = %message.subject,
                        "notification sent"
                    );
                    return Ok(());
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        transport = self.transport.name(),
                        attempt,
                        error = %e,
                        backoff_secs = self.backoff.as_secs(),
                        "notification failed, retrying"
                    );
                    thread::sleep(self.backoff);
                    attempt += 1;
                }
                Err(e) => {
                    error!(transport = self.transport.name(), attempt, error = %e, "notification failed");
                    return Err(NotificationTransportFailure {
                        attempts: attempt,
                        last: e,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::TransportError;
    use std::sync::{Arc, Mutex};

    /// Records every message and fails the first `failures` sends.
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        pub sent: Arc<Mutex<Vec<Notification>>>,
        pub calls: Arc<Mutex<u32>>,
        pub failures: u32,
    }

    impl RecordingTransport {
        pub fn failing(failures: u32) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }

        pub fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl MailTransport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn send(&self, message: &Notification) -> Result<(), TransportError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.failures {
                return Err(TransportError::Rejected {
                    status: 503,
                    body: "relay unavailable".into(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;
    use crate::error::PipelineError;
    use crate::model::{Rejection, RejectionKind};
    use chrono::TimeZone;

    fn config() -> NotifyConfig {
        NotifyConfig {
            sender: "reports@example.com".into(),
            recipients: vec!["ops@example.com".into()],
            ..NotifyConfig::default()
        }
    }

    fn result(outcome: Outcome) -> RunResult {
        RunResult {
            outcome,
            rows_written: 14,
            sources: vec!["jan.xlsx".into(), "feb.xlsx".into()],
            rejections: vec![Rejection::row(
                "feb.xlsx",
                7,
                RejectionKind::SchemaMismatch,
                "missing required field SHIPMENT_NUMBER",
            )],
            duplicates_dropped: 1,
            output: "out/master.csv".into(),
            summary: None,
            timestamp: Utc.with_ymd_and_hms(2025, 7, 14, 6, 30, 0).unwrap(),
        }
    }

    #[test]
    fn success_message_lists_counts_and_rejections() {
        let n = compose(&result(Outcome::Success), &config());
        assert_eq!(
            n.subject,
            "[Longstanding] refreshed: 14 rows from 2 files (2025-07-14 06:30 UTC)"
        );
        assert_eq!(n.to, vec!["ops@example.com"]);
        assert!(n.body.contains("Rows written: 14"));
        assert!(n.body.contains("  - feb.xlsx\n"));
        assert!(n.body.contains("Duplicates dropped: 1"));
        assert!(n.body.contains("Rejected (1):"));
        assert!(n.body.contains("feb.xlsx line 7: missing required field SHIPMENT_NUMBER"));
    }

    #[test]
    fn failure_message_is_an_alert_with_reason() {
        let err = PipelineError::NoValidInput("no matching source files found".into());
        let n = compose(&result(Outcome::Failure(err)), &config());
        assert_eq!(
            n.subject,
            "[ALERT] [Longstanding] refresh FAILED: no valid input: no matching source files found"
        );
        assert!(n.body.contains("NOT refreshed"));
        assert!(n.body.contains("out/master.csv is unchanged"));
        assert!(n.body.contains("Rejected (1):"));
        assert!(!n.body.contains("Rows written"));
    }

    #[test]
    fn line_breaks_in_headers_are_folded() {
        let err = PipelineError::NoValidInput("bad\r\nBcc: someone@example.com\nmore".into());
        let n = compose(&result(Outcome::Failure(err)), &config());
        let text = n.to_rfc822();
        let (head, _) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(head.lines().count(), 6, "{}", head);
        assert!(head.contains("refresh FAILED: no valid input: bad Bcc: someone@example.com more\r\n"));
        assert!(!head.lines().any(|l| l.starts_with("Bcc:")));
    }

    #[test]
    fn one_failure_is_retried() {
        let fake = RecordingTransport::failing(1);
        let notifier = Notifier::new(Box::new(fake.clone()), Duration::ZERO);
        let n = compose(&result(Outcome::Success), &config());
        notifier.deliver(&n).unwrap();
        assert_eq!(fake.calls(), 2);
        assert_eq!(fake.sent(), vec![n]);
    }

    #[test]
    fn two_failures_are_reported() {
        let fake = RecordingTransport::failing(2);
        let notifier = Notifier::new(Box::new(fake.clone()), Duration::ZERO);
        let err = notifier
            .deliver(&compose(&result(Outcome::Success), &config()))
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(fake.calls(), 2);
        assert!(fake.sent().is_empty());
    }
}
