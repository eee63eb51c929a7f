//! Read and write operations over a [`LogStore`].
//!
//! Every operation validates its request before touching the store, issues a
//! single store call, and honours a [`CancellationToken`]: cancelling it
//! drops the in-flight store future and returns [`LogQueryError::Cancelled`].

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::filter::LogFilter;
use crate::mapping::{logs_mapping, logs_sampling_mapping};
use crate::query::builders::{
    DateRange, PageBound, PageRequest, ScanBuilder, ScanOrdering, ScanQuery,
};
use crate::query::histogram::{
    assemble_histogram, decode_group_rows, histogram_projection, uses_sampled_table,
    validate_request, LogsHistogram, GROUP_KEY, ROW_COUNT,
};
use crate::query::pagination::{
    assemble_page, assemble_window, Edge, LogConnection, Pagination, SessionLogEdge,
};
use crate::row::{batches_to_rows, batches_to_session_rows, int64_column, LogRow};
use crate::schema::columns;
use crate::store::LogStore;
use crate::writer::BatchWriter;
use crate::LogQueryError;

/// Filter and time range shared by every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub filter: LogFilter,
    pub date_range: DateRange,
}

impl LogsQuery {
    pub const fn new(filter: LogFilter, date_range: DateRange) -> Self {
        Self { filter, date_range }
    }
}

/// Log query client.
#[derive(Clone)]
pub struct LogQueryClient {
    store: Arc<dyn LogStore>,
    writer: BatchWriter,
}

impl std::fmt::Debug for LogQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogQueryClient").finish_non_exhaustive()
    }
}

impl LogQueryClient {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            writer: BatchWriter::new(Arc::clone(&store)),
            store,
        }
    }

    /// Read one page of logs.
    ///
    /// # Errors
    ///
    /// [`LogQueryError::InvalidPagination`] or [`LogQueryError::InvalidCursor`]
    /// for a bad request (the store is not called), a build error for an
    /// unsafe filter, any store or decode error, or
    /// [`LogQueryError::Cancelled`].
    #[tracing::instrument(skip(self, query, pagination, cancel))]
    pub async fn read_logs(
        &self,
        project_id: i32,
        query: &LogsQuery,
        pagination: &Pagination,
        cancel: &CancellationToken,
    ) -> Result<LogConnection, LogQueryError> {
        let request = PageRequest {
            count_only: false,
            ..pagination.resolve()?
        };
        let scan = ScanBuilder::new(logs_mapping(), project_id)
            .filter(&query.filter)
            .date_range(query.date_range)
            .pagination(request.clone())
            .build()?;

        let batches = self.run(&scan, cancel).await?;
        let rows = batches_to_rows(&batches)?;

        let page = match &request.bound {
            PageBound::At(key) => assemble_window(rows, key, request.direction),
            bound => assemble_page(rows, bound),
        };
        tracing::debug!(
            rows = page.rows.len(),
            has_next = page.has_next_page,
            has_previous = page.has_previous_page,
            "Read log page"
        );
        Ok(LogConnection::from(page))
    }

    /// Count the rows matching `query`.
    #[tracing::instrument(skip(self, query, cancel))]
    pub async fn read_logs_total_count(
        &self,
        project_id: i32,
        query: &LogsQuery,
        cancel: &CancellationToken,
    ) -> Result<u64, LogQueryError> {
        let scan = ScanBuilder::new(logs_mapping(), project_id)
            .projection(format!("count(*) AS {ROW_COUNT}"))
            .filter(&query.filter)
            .date_range(query.date_range)
            .pagination(PageRequest {
                count_only: true,
                ..PageRequest::default()
            })
            .build()?;

        let batches = self.run(&scan, cancel).await?;
        let mut total = 0u64;
        for batch in &batches {
            let counts = int64_column(batch, ROW_COUNT)?;
            for i in 0..counts.len() {
                total += u64::try_from(counts.value(i)).unwrap_or(0);
            }
        }
        Ok(total)
    }

    /// Severity histogram of the rows matching `query`, in `n_buckets`
    /// equal time buckets.
    ///
    /// Ranges of 24 hours or more are read from the sampled table and
    /// extrapolated.
    #[tracing::instrument(skip(self, query, cancel))]
    pub async fn read_logs_histogram(
        &self,
        project_id: i32,
        query: &LogsQuery,
        n_buckets: u64,
        cancel: &CancellationToken,
    ) -> Result<LogsHistogram, LogQueryError> {
        validate_request(&query.date_range, n_buckets)?;
        let mapping = if uses_sampled_table(&query.date_range) {
            logs_sampling_mapping()
        } else {
            logs_mapping()
        };

        let mut scan = ScanBuilder::new(mapping, project_id)
            .projection(histogram_projection(&query.date_range, n_buckets, mapping))
            .filter(&query.filter)
            .date_range(query.date_range)
            .pagination(PageRequest {
                count_only: true,
                ..PageRequest::default()
            })
            .build()?;
        scan.sql.push_str(&format!(" GROUP BY {GROUP_KEY}"));

        let batches = self.run(&scan, cancel).await?;
        let rows = decode_group_rows(&batches)?;
        let histogram = assemble_histogram(&rows, n_buckets);
        tracing::debug!(
            table = scan.table,
            buckets = histogram.buckets.len(),
            objects = histogram.object_count,
            "Built log histogram"
        );
        Ok(histogram)
    }

    /// Every row of a session view, oldest first, with the narrow projection.
    #[tracing::instrument(skip(self, query, cancel))]
    pub async fn read_session_logs(
        &self,
        project_id: i32,
        query: &LogsQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<SessionLogEdge>, LogQueryError> {
        let projection = [
            columns::TIME_UNIX_NANO,
            columns::UUID,
            columns::SEVERITY_TEXT,
            columns::BODY,
        ]
        .map(|c| format!("\"{c}\""))
        .join(", ");

        let scan = ScanBuilder::new(logs_mapping(), project_id)
            .projection(projection)
            .filter(&query.filter)
            .date_range(query.date_range)
            .orderings(ScanOrdering::BackwardInverted, ScanOrdering::ForwardInverted)
            .unlimited()
            .build()?;

        let batches = self.run(&scan, cancel).await?;
        Ok(batches_to_session_rows(&batches)?
            .into_iter()
            .map(Edge::new)
            .collect())
    }

    /// Write rows, assigning identifiers to rows that lack one.
    #[tracing::instrument(skip_all, fields(rows = rows.len()))]
    pub async fn batch_write_log_rows(
        &self,
        rows: &mut [LogRow],
        cancel: &CancellationToken,
    ) -> Result<(), LogQueryError> {
        cancellable(cancel, self.writer.write(rows)).await
    }

    async fn run(
        &self,
        scan: &ScanQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<arrow::record_batch::RecordBatch>, LogQueryError> {
        cancellable(cancel, self.store.query(scan)).await
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T, LogQueryError>>,
) -> Result<T, LogQueryError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!("Log operation cancelled");
            Err(LogQueryError::Cancelled)
        }
        result = operation => result,
    }
}
