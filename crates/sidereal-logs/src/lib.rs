//! Sidereal Logs - query engine for time-ordered application logs.
//!
//! This crate reads and writes log rows held in columnar tables:
//! - Compiles filter trees into parameterised SQL scans over a column mapping
//! - Pages through results with opaque `(timestamp, uuid)` keyset cursors
//! - Buckets matching rows into severity histograms, reading a sampled
//!   table for wide ranges
//! - Evaluates the same filter trees in memory against single rows
//!
//! ## Architecture
//!
//! ```text
//! LogQueryClient ── Pagination ──→ PageRequest ─┐
//!       │                                       ↓
//!       │            Filter + ColumnMapping → ScanBuilder → ScanQuery
//!       │                                                      ↓
//!       │                                     LogStore (DataFusion QueryEngine)
//!       │                                                      ↓
//!       │                      RecordBatch → LogRow → Page / LogsHistogram
//!       ↓
//! BatchWriter → RecordBatch → logs (+ sampled subset → logs_sampling)
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod mapping;
pub mod matcher;
pub mod query;
pub mod row;
pub mod schema;
pub mod store;
pub mod writer;

#[cfg(test)]
pub mod test_fixtures;

pub use client::{LogQueryClient, LogsQuery};
pub use config::LogQueryConfig;
pub use error::LogQueryError;
pub use filter::{CompareOp, Field, Filter, LogFilter};
pub use mapping::{ColumnMapping, ReservedKey, ReservedLogKey};
pub use matcher::{log_matches_query, matches, MatchRow};
pub use row::LogRow;
pub use schema::LogLevel;
pub use store::LogStore;
pub use writer::BatchWriter;
