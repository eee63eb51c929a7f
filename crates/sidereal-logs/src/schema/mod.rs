//! Arrow schema definitions for the log tables.
//!
//! Two physical tables hold the same logical data:
//!
//! - **Dense** (`logs`): every ingested row.
//! - **Sampled** (`logs_sampling`): a deterministic subset of the dense rows,
//!   each carrying the factor it should be multiplied by when extrapolating
//!   counts. Used to bound the cost of histograms over wide time ranges.

pub mod logs;

pub use logs::{
    columns, logs_sampling_schema, logs_schema, LogLevel, LOGS_SAMPLING_TABLE, LOGS_TABLE,
    SEVERITY_SLOTS,
};
