//! Arrow schema for log records.
//!
//! The dense `logs` table and the sampled `logs_sampling` table share the
//! same columns; the sampled table carries one extra `sample_factor` column
//! recording how many dense rows each sampled row stands for.

use arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Physical column names.
pub mod columns {
    pub const TIME_UNIX_NANO: &str = "time_unix_nano";
    pub const UUID: &str = "uuid";
    pub const PROJECT_ID: &str = "project_id";
    pub const SEVERITY_TEXT: &str = "severity_text";
    pub const SEVERITY_NUMBER: &str = "severity_number";
    pub const BODY: &str = "body";
    pub const LOG_ATTRIBUTES: &str = "log_attributes";
    pub const TRACE_ID: &str = "trace_id";
    pub const SPAN_ID: &str = "span_id";
    pub const SECURE_SESSION_ID: &str = "secure_session_id";
    pub const SOURCE: &str = "source";
    pub const SERVICE_NAME: &str = "service_name";
    pub const SERVICE_VERSION: &str = "service_version";

    /// Only present in the sampled table.
    pub const SAMPLE_FACTOR: &str = "sample_factor";
}

/// Dense log table name.
pub const LOGS_TABLE: &str = "logs";

/// Sampled log table name.
pub const LOGS_SAMPLING_TABLE: &str = "logs_sampling";

/// Number of severity slots reserved per histogram bucket in a packed group key.
pub const SEVERITY_SLOTS: u64 = 8;

/// Log severity level.
///
/// Ordinals follow the logrus numbering used by ingestion (`fatal = 1` through
/// `trace = 6`); ordinal `0` (panic) is folded into [`LogLevel::Fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

// Group keys pack the severity ordinal into the low three bits.
const _: () = assert!(LogLevel::MAX_SEVERITY_NUMBER < SEVERITY_SLOTS as u8);

impl LogLevel {
    /// Every defined level, in histogram output order.
    pub const ALL: [Self; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Fatal,
    ];

    const MAX_SEVERITY_NUMBER: u8 = 6;

    /// Stored `severity_number` for this level.
    pub const fn severity_number(self) -> u8 {
        match self {
            Self::Fatal => 1,
            Self::Error => 2,
            Self::Warn => 3,
            Self::Info => 4,
            Self::Debug => 5,
            Self::Trace => 6,
        }
    }

    pub const fn from_severity_number(n: u8) -> Option<Self> {
        match n {
            0 | 1 => Some(Self::Fatal),
            2 => Some(Self::Error),
            3 => Some(Self::Warn),
            4 => Some(Self::Info),
            5 => Some(Self::Debug),
            6 => Some(Self::Trace),
            _ => None,
        }
    }

    /// Stored `severity_text` for this level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Parse a stored severity text. Unknown text decodes as `info`, the
    /// level ingestion assigns when none is given.
    pub fn from_text(text: &str) -> Self {
        match text {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" => Self::Warn,
            "error" => Self::Error,
            "fatal" | "panic" => Self::Fatal,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create the Arrow schema for the dense `logs` table.
///
/// Every string column is non-nullable: unset reserved fields are stored as
/// the empty string so that SQL comparisons never see NULL.
/// `log_attributes` holds a CBOR-encoded `map<string, string>`.
pub fn logs_schema() -> Arc<Schema> {
    Arc::new(Schema::new(log_fields()))
}

/// Create the Arrow schema for the sampled `logs_sampling` table.
pub fn logs_sampling_schema() -> Arc<Schema> {
    let mut fields = log_fields();
    fields.push(Field::new(columns::SAMPLE_FACTOR, DataType::Float64, false));
    Arc::new(Schema::new(fields))
}

fn log_fields() -> Vec<Field> {
    vec![
        Field::new(columns::TIME_UNIX_NANO, DataType::Int64, false),
        Field::new(columns::UUID, DataType::Utf8, false),
        Field::new(columns::PROJECT_ID, DataType::Int32, false),
        Field::new(columns::SEVERITY_TEXT, DataType::Utf8, false),
        Field::new(columns::SEVERITY_NUMBER, DataType::UInt8, false),
        Field::new(columns::BODY, DataType::Utf8, false),
        Field::new(columns::LOG_ATTRIBUTES, DataType::Binary, false),
        Field::new(columns::TRACE_ID, DataType::Utf8, false),
        Field::new(columns::SPAN_ID, DataType::Utf8, false),
        Field::new(columns::SECURE_SESSION_ID, DataType::Utf8, false),
        Field::new(columns::SOURCE, DataType::Utf8, false),
        Field::new(columns::SERVICE_NAME, DataType::Utf8, false),
        Field::new(columns::SERVICE_VERSION, DataType::Utf8, false),
    ]
}
