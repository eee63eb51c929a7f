//! Storage boundary.
//!
//! Everything above this trait is pure query construction and result
//! shaping; a [`LogStore`] executes compiled scans and appends batches.
//! [`QueryEngine`](crate::query::QueryEngine) is the embedded implementation.

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use crate::query::ScanQuery;
use crate::LogQueryError;

/// A columnar store holding the log tables.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Execute a compiled scan and collect every result batch.
    async fn query(&self, scan: &ScanQuery) -> Result<Vec<RecordBatch>, LogQueryError>;

    /// Append a batch to `table` in one operation.
    async fn insert(&self, table: &str, batch: RecordBatch) -> Result<(), LogQueryError>;
}
