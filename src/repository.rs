//! Repository boundary: where validated records land.

use crate::error::Result;
use crate::model::StatementRecord;
use std::future::Future;

/// Idempotent record store.
///
/// `upsert` must be safe to repeat with the same input, and writes for the
/// same code from concurrent callers must commute.
pub trait Repository: Send + Sync + 'static {
    /// Write all records of one code. Returns the number of rows written.
    fn upsert(
        &self,
        code: &str,
        records: &[StatementRecord],
    ) -> impl Future<Output = Result<u64>> + Send;
}
