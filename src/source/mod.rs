//! Upstream statement source.
//!
//! The source turns an entity code into validated [`StatementRecord`]s or
//! fails with a [`FetchError`]. It does no retrying and enforces no deadline;
//! both belong to the fetch-and-persist unit.

pub mod http;

pub use http::HttpStatementSource;

use crate::error::FetchError;
use crate::model::{StatementKind, StatementRecord};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::future::Future;

/// Anything that can fetch the statements of one entity.
pub trait StatementSource: Send + Sync + 'static {
    fn fetch(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Vec<StatementRecord>, FetchError>> + Send;
}

/// Upstream fields that identify the row rather than carry a line item.
const METADATA_FIELDS: &[&str] = &[
    "SECUCODE",
    "SECURITY_CODE",
    "SECURITY_NAME_ABBR",
    "SECURITY_TYPE_CODE",
    "ORG_CODE",
    "ORG_TYPE",
    "REPORT_TYPE",
    "REPORT_DATE_NAME",
    "NOTICE_DATE",
    "UPDATE_DATE",
    "CURRENCY",
];

const REPORT_DATE: &str = "REPORT_DATE";

/// Validate a raw upstream body for one statement kind.
///
/// The body must be an array of objects. Each row needs a parseable
/// `REPORT_DATE`; numeric fields become line items, nulls and metadata are
/// dropped. Anything else is a permanent error: retrying will not change the
/// shape of the response.
pub fn parse_rows(
    code: &str,
    kind: StatementKind,
    body: &serde_json::Value,
) -> Result<Vec<StatementRecord>, FetchError> {
    let rows = body.as_array().ok_or_else(|| {
        FetchError::Permanent(format!("{kind} for {code}: expected an array of rows"))
    })?;

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let fields = row.as_object().ok_or_else(|| {
            FetchError::Permanent(format!("{kind} for {code}: row {i} is not an object"))
        })?;

        let report_date = fields
            .get(REPORT_DATE)
            .and_then(|v| v.as_str())
            .and_then(parse_report_date)
            .ok_or_else(|| {
                FetchError::Permanent(format!(
                    "{kind} for {code}: row {i} has no valid {REPORT_DATE}"
                ))
            })?;

        let items: BTreeMap<String, f64> = fields
            .iter()
            .filter(|(name, _)| name.as_str() != REPORT_DATE)
            .filter(|(name, _)| !METADATA_FIELDS.contains(&name.as_str()))
            .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
            .filter(|(_, v)| v.is_finite())
            .collect();

        records.push(StatementRecord {
            code: code.to_string(),
            kind,
            report_date,
            items,
        });
    }

    Ok(records)
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part.
fn parse_report_date(raw: &str) -> Option<NaiveDate> {
    let date = raw.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}
