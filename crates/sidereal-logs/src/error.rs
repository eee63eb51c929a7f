//! Error types for the log query crate.

/// Errors that can occur while building, executing, or decoding a log query.
///
/// Large foreign error types are boxed to keep the enum small, which keeps
/// `Result<T, LogQueryError>` cheap to move around.
///
/// Every variant aborts the whole operation: a page, count, or histogram is
/// either fully produced or not produced at all.
#[derive(Debug, thiserror::Error)]
pub enum LogQueryError {
    /// Configuration error: a reserved key with no column in the mapping, an
    /// inconsistent mapping, or an unreadable configuration source.
    #[error("configuration error: {0}")]
    Config(String),

    /// More than one of `after`, `before` and `at` was supplied.
    #[error("invalid pagination request: {0}")]
    InvalidPagination(String),

    /// A pagination cursor could not be decoded.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// The filter tree or request cannot be compiled into a safe query.
    #[error("query build error: {0}")]
    QueryBuild(String),

    /// DataFusion error (boxed - large type).
    #[error("DataFusion error: {0}")]
    DataFusion(Box<datafusion::error::DataFusionError>),

    /// Arrow error (boxed - large type).
    #[error("Arrow error: {0}")]
    Arrow(Box<arrow::error::ArrowError>),

    /// Any other store failure reported by a [`LogStore`](crate::store::LogStore)
    /// implementation.
    #[error("store error: {0}")]
    Store(String),

    /// A result row could not be decoded into a domain type.
    #[error("decode error: {0}")]
    Decode(String),

    /// CBOR serialisation error.
    #[error("CBOR serialisation error: {0}")]
    Cbor(String),

    /// Query timed out.
    #[error("query timed out after {duration:?}")]
    QueryTimeout {
        /// The duration after which the query timed out.
        duration: std::time::Duration,
    },

    /// The caller cancelled the operation while a store call was in flight.
    #[error("operation cancelled")]
    Cancelled,
}

impl LogQueryError {
    /// Whether the error came from the store rather than from request
    /// validation or cancellation.
    pub const fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::DataFusion(_)
                | Self::Arrow(_)
                | Self::Store(_)
                | Self::Decode(_)
                | Self::QueryTimeout { .. }
        )
    }
}

// Manual From implementations for boxed error types
impl From<datafusion::error::DataFusionError> for LogQueryError {
    fn from(err: datafusion::error::DataFusionError) -> Self {
        Self::DataFusion(Box::new(err))
    }
}

impl From<arrow::error::ArrowError> for LogQueryError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Arrow(Box::new(err))
    }
}

impl<T> From<ciborium::ser::Error<T>> for LogQueryError
where
    T: std::fmt::Debug,
{
    fn from(err: ciborium::ser::Error<T>) -> Self {
        Self::Cbor(format!("{err:?}"))
    }
}

impl<T> From<ciborium::de::Error<T>> for LogQueryError
where
    T: std::fmt::Debug,
{
    fn from(err: ciborium::de::Error<T>) -> Self {
        Self::Decode(format!("attributes: {err:?}"))
    }
}
