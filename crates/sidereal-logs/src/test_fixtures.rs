//! Composable test fixtures using rstest.
//!
//! ```text
//! recording_store ── counts calls, answers with no rows
//! failing_store   ── every call is a store error
//! stalled_store   ── queries never complete
//! seeded_rows
//!    └── seeded_client (embedded engine holding seeded_rows)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rstest::*;
//! use crate::test_fixtures::*;
//!
//! #[rstest]
//! #[tokio::test]
//! async fn my_test(#[future] seeded_client: LogQueryClient) {
//!     let client = seeded_client.await;
//!     let page = client.read_logs(1, &query_all(), &Pagination::default(), &cancel).await?;
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rstest::fixture;

use crate::client::{LogQueryClient, LogsQuery};
use crate::filter::Filter;
use crate::query::builders::{DateRange, ScanQuery};
use crate::query::engine::QueryEngine;
use crate::row::LogRow;
use crate::schema::LogLevel;
use crate::store::LogStore;
use crate::LogQueryError;

/// Number of rows in [`seeded_rows`].
pub const SEEDED_ROWS: usize = 60;

/// Instant the seeded rows start from.
pub fn seed_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
}

/// A query covering every seeded row.
pub fn query_all() -> LogsQuery {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    LogsQuery::new(Filter::All, DateRange::new(start, start + Duration::hours(12)))
}

/// How a [`RecordingStore`] answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBehaviour {
    Empty,
    Fail,
    Stall,
}

/// Store double that records every call.
#[derive(Debug)]
pub struct RecordingStore {
    behaviour: StoreBehaviour,
    queries: Mutex<Vec<ScanQuery>>,
    inserts: AtomicUsize,
    inserted_rows: AtomicUsize,
}

impl RecordingStore {
    pub fn new(behaviour: StoreBehaviour) -> Self {
        Self {
            behaviour,
            queries: Mutex::new(Vec::new()),
            inserts: AtomicUsize::new(0),
            inserted_rows: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn queried_tables(&self) -> Vec<&'static str> {
        self.queries.lock().unwrap().iter().map(|q| q.table).collect()
    }

    pub fn last_query(&self) -> Option<ScanQuery> {
        self.queries.lock().unwrap().last().cloned()
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn inserted_rows(&self) -> usize {
        self.inserted_rows.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for RecordingStore {
    async fn query(&self, scan: &ScanQuery) -> Result<Vec<RecordBatch>, LogQueryError> {
        self.queries.lock().unwrap().push(scan.clone());
        match self.behaviour {
            StoreBehaviour::Empty => Ok(Vec::new()),
            StoreBehaviour::Fail => Err(LogQueryError::Store("store unavailable".to_owned())),
            StoreBehaviour::Stall => std::future::pending().await,
        }
    }

    async fn insert(&self, _table: &str, batch: RecordBatch) -> Result<(), LogQueryError> {
        if self.behaviour == StoreBehaviour::Fail {
            return Err(LogQueryError::Store("store unavailable".to_owned()));
        }
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inserted_rows.fetch_add(batch.num_rows(), Ordering::SeqCst);
        Ok(())
    }
}

#[fixture]
pub fn recording_store() -> Arc<RecordingStore> {
    Arc::new(RecordingStore::new(StoreBehaviour::Empty))
}

#[fixture]
pub fn failing_store() -> Arc<RecordingStore> {
    Arc::new(RecordingStore::new(StoreBehaviour::Fail))
}

#[fixture]
pub fn stalled_store() -> Arc<RecordingStore> {
    Arc::new(RecordingStore::new(StoreBehaviour::Stall))
}

/// Rows for project 1, three per second, so timestamps repeat and the
/// identifier breaks ties. Levels and sessions rotate.
#[fixture]
pub fn seeded_rows() -> Vec<LogRow> {
    (0..SEEDED_ROWS)
        .map(|i| {
            let seconds = i64::try_from(i / 3).unwrap();
            LogRow::builder()
                .timestamp(seed_start() + Duration::seconds(seconds))
                .uuid(format!("row-{i:04}"))
                .project_id(1)
                .level(LogLevel::ALL[i % LogLevel::ALL.len()])
                .body(format!("request {i} handled"))
                .attribute("service", if i % 2 == 0 { "api" } else { "worker" })
                .secure_session_id(if i % 2 == 0 { "session-a" } else { "session-b" })
                .service_name("checkout")
                .build()
        })
        .collect()
}

/// A client over an embedded engine holding [`seeded_rows`].
#[fixture]
pub async fn seeded_client(seeded_rows: Vec<LogRow>) -> LogQueryClient {
    let engine = Arc::new(QueryEngine::new().unwrap());
    let client = LogQueryClient::new(engine);
    let mut rows = seeded_rows;
    client
        .batch_write_log_rows(&mut rows, &tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    client
}
