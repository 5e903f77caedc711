//! HTTP statement source.
//!
//! Wire format:
//! - `GET {base}/statements/{kind}/{code}` returns a JSON array of rows
//!   (see [`super::parse_rows`]); 404 means the kind has no rows.
//! - `GET {base}/codes` returns `[{"code": "600519", "name": "..."}]`.

use super::{StatementSource, parse_rows};
use crate::error::{Error, FetchError, Result};
use crate::model::{StatementKind, StatementRecord};
use crate::universe::Listing;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;

pub struct HttpStatementSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    request_delay: Duration,
}

impl HttpStatementSource {
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("statement-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            request_delay: Duration::ZERO,
        })
    }

    /// Sleep this long before every request.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(format!("{}{path}", self.base_url));
        match self.token {
            Some(ref token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    /// Fetch one statement kind. An absent kind is an empty list.
    pub async fn fetch_kind(
        &self,
        code: &str,
        kind: StatementKind,
    ) -> std::result::Result<Vec<StatementRecord>, FetchError> {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let resp = self
            .request(&format!("/statements/{kind}/{code}"))
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("{kind} for {code}: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(code, %kind, "no rows upstream");
            return Ok(Vec::new());
        }
        if let Some(err) = classify_status(status) {
            return Err(match err {
                FetchError::Transient(msg) => FetchError::Transient(format!("{kind} for {code}: {msg}")),
                FetchError::Permanent(msg) => FetchError::Permanent(format!("{kind} for {code}: {msg}")),
                other => other,
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Permanent(format!("{kind} for {code}: malformed body: {e}"))
            } else {
                FetchError::Transient(format!("{kind} for {code}: {e}"))
            }
        })?;

        parse_rows(code, kind, &body)
    }

    /// List every code the upstream knows about.
    pub async fn list_codes(&self) -> Result<Vec<Listing>> {
        let resp = self.request("/codes").send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Universe(format!("code listing returned {status}")));
        }
        let listings: Vec<Listing> = resp.json().await?;
        Ok(listings)
    }
}

impl StatementSource for HttpStatementSource {
    async fn fetch(&self, code: &str) -> std::result::Result<Vec<StatementRecord>, FetchError> {
        let mut records = Vec::new();
        for kind in StatementKind::ALL {
            records.extend(self.fetch_kind(code, kind).await?);
        }
        Ok(records)
    }
}

/// Map a non-success status to a fetch error; None for success.
fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(FetchError::Transient(format!("upstream returned {status}")))
    } else {
        Some(FetchError::Permanent(format!("upstream returned {status}")))
    }
}
