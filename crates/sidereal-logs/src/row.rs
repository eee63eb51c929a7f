//! Log rows and their Arrow encoding.
//!
//! Timestamps are stored as nanoseconds since the Unix epoch in an `Int64`
//! column. Attributes are stored as a CBOR-encoded `map<string, string>`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BinaryBuilder, Int32Array, Int32Builder, Int64Array,
    Int64Builder, StringArray, StringBuilder, UInt8Builder,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use ciborium::Value as CborValue;
use serde::Serialize;

use crate::mapping::ReservedLogKey;
use crate::matcher::MatchRow;
use crate::query::udfs::cbor_value_to_string;
use crate::schema::{columns, logs_schema, LogLevel};
use crate::LogQueryError;

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRow {
    pub timestamp: DateTime<Utc>,
    /// Row identifier. Assigned by the writer when empty.
    pub uuid: String,
    pub project_id: i32,
    pub level: LogLevel,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    pub trace_id: String,
    pub span_id: String,
    pub secure_session_id: String,
    pub source: String,
    pub service_name: String,
    pub service_version: String,
}

impl Default for LogRow {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::default(),
            uuid: String::new(),
            project_id: 0,
            level: LogLevel::Info,
            body: String::new(),
            attributes: BTreeMap::new(),
            trace_id: String::new(),
            span_id: String::new(),
            secure_session_id: String::new(),
            source: String::new(),
            service_name: String::new(),
            service_version: String::new(),
        }
    }
}

impl LogRow {
    pub fn builder() -> LogRowBuilder {
        LogRowBuilder::default()
    }

    /// Timestamp as stored: nanoseconds since the epoch.
    pub fn time_unix_nano(&self) -> i64 {
        timestamp_nanos(self.timestamp)
    }
}

impl MatchRow<ReservedLogKey> for LogRow {
    fn reserved_value(&self, key: ReservedLogKey) -> &str {
        match key {
            ReservedLogKey::Level => self.level.as_str(),
            ReservedLogKey::SecureSessionId => &self.secure_session_id,
            ReservedLogKey::SpanId => &self.span_id,
            ReservedLogKey::TraceId => &self.trace_id,
            ReservedLogKey::Source => &self.source,
            ReservedLogKey::ServiceName => &self.service_name,
            ReservedLogKey::ServiceVersion => &self.service_version,
        }
    }

    fn body(&self) -> &str {
        &self.body
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Builder for [`LogRow`].
#[derive(Debug, Clone, Default)]
#[must_use = "builders do nothing until .build() is called"]
pub struct LogRowBuilder {
    row: LogRow,
}

impl LogRowBuilder {
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.row.timestamp = timestamp;
        self
    }

    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.row.uuid = uuid.into();
        self
    }

    pub const fn project_id(mut self, project_id: i32) -> Self {
        self.row.project_id = project_id;
        self
    }

    pub const fn level(mut self, level: LogLevel) -> Self {
        self.row.level = level;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.row.body = body.into();
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.row.attributes.insert(key.into(), value.into());
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.row.trace_id = trace_id.into();
        self
    }

    pub fn span_id(mut self, span_id: impl Into<String>) -> Self {
        self.row.span_id = span_id.into();
        self
    }

    pub fn secure_session_id(mut self, id: impl Into<String>) -> Self {
        self.row.secure_session_id = id.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.row.source = source.into();
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.row.service_name = name.into();
        self
    }

    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.row.service_version = version.into();
        self
    }

    pub fn build(self) -> LogRow {
        self.row
    }
}

/// The narrow projection returned for a session's log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionLogRow {
    pub timestamp: DateTime<Utc>,
    pub uuid: String,
    pub level: LogLevel,
    pub body: String,
}

/// Nanoseconds since the epoch, saturating outside the representable range
/// (roughly years 1677 to 2262).
pub fn timestamp_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or(if ts.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

/// Encode attributes as a CBOR map.
pub fn encode_attributes(attributes: &BTreeMap<String, String>) -> Result<Vec<u8>, LogQueryError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(attributes, &mut bytes)?;
    Ok(bytes)
}

/// Decode a CBOR attribute map. Non-string values are rendered the same way
/// the `cbor_extract` SQL function renders them; null values are dropped.
pub fn decode_attributes(bytes: &[u8]) -> Result<BTreeMap<String, String>, LogQueryError> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }

    let value: CborValue = ciborium::from_reader(bytes)?;
    let CborValue::Map(entries) = value else {
        return Err(LogQueryError::Decode(
            "attributes: expected a CBOR map".to_owned(),
        ));
    };

    // First entry wins on repeated keys, as in `cbor_extract`.
    let mut seen = BTreeSet::new();
    let mut attributes = BTreeMap::new();
    for (k, v) in entries {
        let CborValue::Text(key) = k else { continue };
        if !seen.insert(key.clone()) {
            continue;
        }
        if let Some(value) = cbor_value_to_string(&v) {
            attributes.insert(key, value);
        }
    }
    Ok(attributes)
}

/// Build a record batch in the dense table layout.
pub fn rows_to_batch(rows: &[LogRow]) -> Result<RecordBatch, LogQueryError> {
    let mut time = Int64Builder::with_capacity(rows.len());
    let mut uuid = StringBuilder::new();
    let mut project_id = Int32Builder::with_capacity(rows.len());
    let mut severity_text = StringBuilder::new();
    let mut severity_number = UInt8Builder::with_capacity(rows.len());
    let mut body = StringBuilder::new();
    let mut attributes = BinaryBuilder::new();
    let mut trace_id = StringBuilder::new();
    let mut span_id = StringBuilder::new();
    let mut secure_session_id = StringBuilder::new();
    let mut source = StringBuilder::new();
    let mut service_name = StringBuilder::new();
    let mut service_version = StringBuilder::new();

    for row in rows {
        time.append_value(row.time_unix_nano());
        uuid.append_value(&row.uuid);
        project_id.append_value(row.project_id);
        severity_text.append_value(row.level.as_str());
        severity_number.append_value(row.level.severity_number());
        body.append_value(&row.body);
        attributes.append_value(encode_attributes(&row.attributes)?);
        trace_id.append_value(&row.trace_id);
        span_id.append_value(&row.span_id);
        secure_session_id.append_value(&row.secure_session_id);
        source.append_value(&row.source);
        service_name.append_value(&row.service_name);
        service_version.append_value(&row.service_version);
    }

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(time.finish()),
        Arc::new(uuid.finish()),
        Arc::new(project_id.finish()),
        Arc::new(severity_text.finish()),
        Arc::new(severity_number.finish()),
        Arc::new(body.finish()),
        Arc::new(attributes.finish()),
        Arc::new(trace_id.finish()),
        Arc::new(span_id.finish()),
        Arc::new(secure_session_id.finish()),
        Arc::new(source.finish()),
        Arc::new(service_name.finish()),
        Arc::new(service_version.finish()),
    ];

    Ok(RecordBatch::try_new(logs_schema(), arrays)?)
}

/// Decode full log rows from query results.
pub fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<LogRow>, LogQueryError> {
    let mut rows = Vec::new();

    for batch in batches {
        let time = int64_column(batch, columns::TIME_UNIX_NANO)?;
        let uuid = string_column(batch, columns::UUID)?;
        let project_id = int32_column(batch, columns::PROJECT_ID)?;
        let severity_text = string_column(batch, columns::SEVERITY_TEXT)?;
        let body = string_column(batch, columns::BODY)?;
        let attributes = binary_column(batch, columns::LOG_ATTRIBUTES)?;
        let trace_id = string_column(batch, columns::TRACE_ID)?;
        let span_id = string_column(batch, columns::SPAN_ID)?;
        let secure_session_id = string_column(batch, columns::SECURE_SESSION_ID)?;
        let source = string_column(batch, columns::SOURCE)?;
        let service_name = string_column(batch, columns::SERVICE_NAME)?;
        let service_version = string_column(batch, columns::SERVICE_VERSION)?;

        for i in 0..batch.num_rows() {
            rows.push(LogRow {
                timestamp: DateTime::from_timestamp_nanos(time.value(i)),
                uuid: string_value(uuid, i),
                project_id: project_id.value(i),
                level: LogLevel::from_text(severity_text.value(i)),
                body: string_value(body, i),
                attributes: if attributes.is_null(i) {
                    BTreeMap::new()
                } else {
                    decode_attributes(attributes.value(i))?
                },
                trace_id: string_value(trace_id, i),
                span_id: string_value(span_id, i),
                secure_session_id: string_value(secure_session_id, i),
                source: string_value(source, i),
                service_name: string_value(service_name, i),
                service_version: string_value(service_version, i),
            });
        }
    }

    Ok(rows)
}

/// Decode session log rows from query results.
pub fn batches_to_session_rows(batches: &[RecordBatch]) -> Result<Vec<SessionLogRow>, LogQueryError> {
    let mut rows = Vec::new();

    for batch in batches {
        let time = int64_column(batch, columns::TIME_UNIX_NANO)?;
        let uuid = string_column(batch, columns::UUID)?;
        let severity_text = string_column(batch, columns::SEVERITY_TEXT)?;
        let body = string_column(batch, columns::BODY)?;

        for i in 0..batch.num_rows() {
            rows.push(SessionLogRow {
                timestamp: DateTime::from_timestamp_nanos(time.value(i)),
                uuid: string_value(uuid, i),
                level: LogLevel::from_text(severity_text.value(i)),
                body: string_value(body, i),
            });
        }
    }

    Ok(rows)
}

fn string_value(array: &StringArray, i: usize) -> String {
    if array.is_null(i) {
        String::new()
    } else {
        array.value(i).to_owned()
    }
}

pub(crate) fn string_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a StringArray, LogQueryError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| missing_column(name, "Utf8"))
}

pub(crate) fn int64_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a Int64Array, LogQueryError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| missing_column(name, "Int64"))
}

fn int32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array, LogQueryError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| missing_column(name, "Int32"))
}

fn binary_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a BinaryArray, LogQueryError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<BinaryArray>())
        .ok_or_else(|| missing_column(name, "Binary"))
}

fn missing_column(name: &str, expected: &str) -> LogQueryError {
    LogQueryError::Decode(format!("missing or mistyped column {name} (expected {expected})"))
}
