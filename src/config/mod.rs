//! Typed configuration.
//!
//! [`Config`] holds process-level settings from environment variables and
//! fails fast if required vars are missing. Sensitive values are wrapped in
//! `secrecy::SecretString` to prevent log leaks.
//!
//! [`RunConfig`] holds the knobs of one ingestion run. It comes from an
//! optional TOML file with CLI overrides applied on top, and is read-only
//! once the run starts.

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub api_url: String,
    pub api_token: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            api_url: required_var("INGEST_API_URL")?,
            api_token: std::env::var("INGEST_API_TOKEN").ok().map(SecretString::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Settings for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Pause after this many recorded outcomes. 0 disables throttling.
    pub batch_size: usize,
    pub batch_pause_seconds: u64,
    /// Hard deadline for one upstream call (and for one store write).
    pub per_call_timeout_seconds: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Fixed delay before every upstream request.
    pub request_delay_ms: u64,
    /// Cap on the number of tasks in the queue (test runs).
    pub limit: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            batch_size: 50,
            batch_pause_seconds: 30,
            per_call_timeout_seconds: 60,
            max_retries: 3,
            initial_backoff_ms: 5_000,
            max_backoff_ms: 60_000,
            request_delay_ms: 0,
            limit: None,
        }
    }
}

impl RunConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Config(format!(
                    "cannot read run config {}: {e}",
                    path.display()
                )));
            }
        };
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad run config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RunConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.per_call_timeout_seconds == 0 {
            return Err(Error::Config(
                "per_call_timeout_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_seconds)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_secs(self.batch_pause_seconds)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}
