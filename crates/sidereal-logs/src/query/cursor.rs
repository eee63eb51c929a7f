//! Opaque pagination cursors.
//!
//! A cursor identifies one row by its `(timestamp, uuid)` sort key. The wire
//! form is URL-safe base64 (no padding) over `"{seconds}:{nanos}:{uuid}"`.
//! Callers must treat it as opaque.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::LogQueryError;

/// Decoded form of a cursor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CursorKey {
    pub timestamp: DateTime<Utc>,
    pub uuid: String,
}

impl CursorKey {
    pub fn new(timestamp: DateTime<Utc>, uuid: impl Into<String>) -> Self {
        Self {
            timestamp,
            uuid: uuid.into(),
        }
    }
}

/// Encode a row's sort key as a cursor string.
pub fn encode_cursor(timestamp: DateTime<Utc>, uuid: &str) -> String {
    let raw = format!(
        "{}:{}:{}",
        timestamp.timestamp(),
        timestamp.timestamp_subsec_nanos(),
        uuid
    );
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decode a cursor string.
///
/// # Errors
///
/// Returns [`LogQueryError::InvalidCursor`] if the string is not valid
/// base64, not UTF-8, not three `:`-separated parts, has non-numeric time
/// parts, an out-of-range timestamp, or an empty uuid.
pub fn decode_cursor(cursor: &str) -> Result<CursorKey, LogQueryError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| LogQueryError::InvalidCursor(format!("not base64: {e}")))?;
    let raw = String::from_utf8(bytes)
        .map_err(|_| LogQueryError::InvalidCursor("not UTF-8".to_owned()))?;

    let mut parts = raw.splitn(3, ':');
    let (Some(secs), Some(nanos), Some(uuid)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(LogQueryError::InvalidCursor(format!(
            "expected seconds:nanos:uuid, got {raw:?}"
        )));
    };

    let secs: i64 = secs
        .parse()
        .map_err(|_| LogQueryError::InvalidCursor(format!("bad seconds {secs:?}")))?;
    let nanos: u32 = nanos
        .parse()
        .map_err(|_| LogQueryError::InvalidCursor(format!("bad nanoseconds {nanos:?}")))?;
    if uuid.is_empty() {
        return Err(LogQueryError::InvalidCursor("empty uuid".to_owned()));
    }

    let timestamp = DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| LogQueryError::InvalidCursor(format!("timestamp {secs}.{nanos} out of range")))?;

    Ok(CursorKey::new(timestamp, uuid))
}
