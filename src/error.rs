// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Conditions that fail a whole run. Per-file and per-row problems are
/// `Rejection`s instead and never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no valid input: {0}")]
    NoValidInput(String),

    #[error("failed to write {}: {source:#}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("mail relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail relay answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("environment variable {0} holding the relay token is not set")]
    MissingCredential(String),

    #[error("outbox write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialising message failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The notification could not be handed to the mail transport. Reported on
/// its own; it never changes the pipeline outcome.
#[derive(Error, Debug)]
#[error("notification not delivered after {attempts} attempt(s): {last}")]
pub struct NotificationTransportFailure {
    pub attempts: u32,
    #[source]
    pub last: TransportError,
}
