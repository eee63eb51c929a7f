//! Scan construction, result shaping and the embedded DataFusion store.

pub mod builders;
pub mod cursor;
pub mod engine;
pub mod histogram;
pub mod pagination;
pub mod udfs;

pub use builders::{
    DateRange, PageBound, PageRequest, QueryParam, ScanBuilder, ScanOrdering, ScanQuery,
    SortDirection, PAGE_SIZE,
};
pub use cursor::{decode_cursor, encode_cursor, CursorKey};
pub use engine::{MemoryPoolStrategy, QueryEngine, QueryEngineBuilder};
pub use histogram::{BucketCount, HistogramBucket, LogsHistogram};
pub use pagination::{LogConnection, LogEdge, PageInfo, Pagination, SessionLogEdge};
pub use udfs::all_udfs;
