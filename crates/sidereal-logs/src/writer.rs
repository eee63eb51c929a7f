//! Bulk log writes.

use std::sync::Arc;

use uuid::Uuid;

use crate::row::{rows_to_batch, LogRow};
use crate::schema::LOGS_TABLE;
use crate::store::LogStore;
use crate::LogQueryError;

/// Writes batches of rows to the dense log table.
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn LogStore>,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter").finish_non_exhaustive()
    }
}

impl BatchWriter {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Write `rows` in a single insert.
    ///
    /// Rows without an identifier are given a fresh v4 UUID in place, so the
    /// caller can retry with the same identifiers. An empty slice succeeds
    /// without touching the store. On error nothing can be assumed about
    /// which rows became visible.
    #[tracing::instrument(skip_all, fields(rows = rows.len()))]
    pub async fn write(&self, rows: &mut [LogRow]) -> Result<(), LogQueryError> {
        if rows.is_empty() {
            return Ok(());
        }

        for row in rows.iter_mut().filter(|r| r.uuid.is_empty()) {
            row.uuid = Uuid::new_v4().to_string();
        }

        let batch = rows_to_batch(rows)?;
        self.store.insert(LOGS_TABLE, batch).await?;
        tracing::debug!("Log batch written");
        Ok(())
    }
}
