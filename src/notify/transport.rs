// src/notify/transport.rs

use reqwest::{blocking::Client, header::CONTENT_TYPE};
use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

use super::Notification;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::publish::temp_file_in;

/// Hands a composed notification to something that delivers mail.
pub trait MailTransport {
    fn name(&self) -> &'static str;
    fn send(&self, message: &Notification) -> Result<(), TransportError>;
}

pub fn from_config(config: &TransportConfig) -> Result<Box<dyn MailTransport>, TransportError> {
    Ok(match config {
        TransportConfig::HttpRelay {
            endpoint,
            token_env,
            timeout_secs,
        } => Box::new(HttpRelay::new(
            endpoint.clone(),
            token_env.clone(),
            Duration::from_secs(*timeout_secs),
        )?),
        TransportConfig::Outbox { dir } => Box::new(Outbox::new(dir.clone())),
    })
}

/// POSTs the message as JSON to a mail relay.
pub struct HttpRelay {
    client: Client,
    endpoint: String,
    token_env: Option<String>,
}

impl HttpRelay {
    pub fn new(
        endpoint: String,
        token_env: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("longstanding/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            token_env,
        })
    }

    // read per send so a rotated token is picked up on retry
    fn token(&self) -> Result<Option<String>, TransportError> {
        match &self.token_env {
            None => Ok(None),
            Some(var) => env::var(var)
                .map(Some)
                .map_err(|_| TransportError::MissingCredential(var.clone())),
        }
    }
}

impl MailTransport for HttpRelay {
    fn name(&self) -> &'static str {
        "http_relay"
    }

    fn send(&self, message: &Notification) -> Result<(), TransportError> {
        let token = self.token()?;
        let payload = serde_json::to_vec(message)?;

        let mut req = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        let resp = req.send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!(endpoint = %self.endpoint, status = status.as_u16(), "notification relayed");
        Ok(())
    }
}

/// Drops each message as a `.eml` file into a directory picked up by the
/// local mail system.
pub struct Outbox {
    dir: PathBuf,
}

impl Outbox {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// First free `longstanding-<timestamp>[-n].eml` name in the outbox.
    fn target(&self, message: &Notification) -> PathBuf {
        let stem = format!("longstanding-{}", message.date.format("%Y%m%dT%H%M%SZ"));
        let mut path = self.dir.join(format!("{}.eml", stem));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}-{}.eml", stem, n));
            n += 1;
        }
        path
    }
}

impl MailTransport for Outbox {
    fn name(&self) -> &'static str {
        "outbox"
    }

    fn send(&self, message: &Notification) -> Result<(), TransportError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.target(message);
        write_atomic(&self.dir, &path, message.to_rfc822().as_bytes())?;
        info!(path = %path.display(), "notification written to outbox");
        Ok(())
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), TransportError> {
    let mut tmp = temp_file_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = bytes.len(), "outbox file persisted");
    Ok(())
}
