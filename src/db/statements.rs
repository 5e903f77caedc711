//! Statement storage: idempotent upsert keyed by (code, kind, report date).

use crate::db::Db;
use crate::error::Result;
use crate::model::{StatementKind, StatementRecord};
use crate::repository::Repository;
use chrono::NaiveDate;
use sqlx::types::Json;
use std::collections::BTreeMap;

impl Repository for Db {
    async fn upsert(&self, code: &str, records: &[StatementRecord]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let now = chrono::Utc::now();
        let mut written = 0;

        for record in records {
            // Rows always land under the task's code, whatever upstream echoed.
            let result = sqlx::query(
                "INSERT INTO statements (stock_code, kind, report_date, items, fetched_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (stock_code, kind, report_date)
                 DO UPDATE SET items = excluded.items, fetched_at = excluded.fetched_at",
            )
            .bind(code)
            .bind(record.kind.as_str())
            .bind(record.report_date)
            .bind(Json(&record.items))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }
}

impl Db {
    /// Number of stored statement rows for a code.
    pub async fn statement_count(&self, code: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM statements WHERE stock_code = ?")
            .bind(code)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Every code with at least one stored statement.
    pub async fn stored_codes(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT stock_code FROM statements ORDER BY stock_code")
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Stored line items of one statement, if present.
    pub async fn get_statement(
        &self,
        code: &str,
        kind: StatementKind,
        report_date: NaiveDate,
    ) -> Result<Option<BTreeMap<String, f64>>> {
        let row: Option<(Json<BTreeMap<String, f64>>,)> = sqlx::query_as(
            "SELECT items FROM statements
             WHERE stock_code = ? AND kind = ? AND report_date = ?",
        )
        .bind(code)
        .bind(kind.as_str())
        .bind(report_date)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| r.0.0))
    }
}
