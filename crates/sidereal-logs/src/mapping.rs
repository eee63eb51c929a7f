//! Per-table column mappings.
//!
//! A [`ColumnMapping`] tells the scan builder and the matcher which physical
//! column backs each reserved key, where the body text and the attribute map
//! live, and which columns a full row fetch projects. The same query logic
//! serves every table by swapping the mapping value.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::schema::{columns, LOGS_SAMPLING_TABLE, LOGS_TABLE};
use crate::LogQueryError;

/// A closed enumeration of semantically named fields.
pub trait ReservedKey: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every variant of the enumeration.
    const ALL: &'static [Self];

    /// Name used in filter expressions.
    fn as_str(&self) -> &'static str;
}

/// Reserved keys of the log tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservedLogKey {
    Level,
    SecureSessionId,
    SpanId,
    TraceId,
    Source,
    ServiceName,
    ServiceVersion,
}

impl ReservedKey for ReservedLogKey {
    const ALL: &'static [Self] = &[
        Self::Level,
        Self::SecureSessionId,
        Self::SpanId,
        Self::TraceId,
        Self::Source,
        Self::ServiceName,
        Self::ServiceVersion,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::SecureSessionId => "secure_session_id",
            Self::SpanId => "span_id",
            Self::TraceId => "trace_id",
            Self::Source => "source",
            Self::ServiceName => "service_name",
            Self::ServiceVersion => "service_version",
        }
    }
}

/// Physical layout of one log table.
#[derive(Debug, Clone)]
pub struct ColumnMapping<K: ReservedKey> {
    table_name: &'static str,
    keys_to_columns: HashMap<K, &'static str>,
    reserved_keys: &'static [K],
    body_column: &'static str,
    attributes_column: &'static str,
    select_columns: Vec<&'static str>,
    sample_factor_column: Option<&'static str>,
}

impl<K: ReservedKey> ColumnMapping<K> {
    /// Create a mapping, checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`LogQueryError::Config`] if a mapped key is not one of the
    /// reserved keys, or if a non-empty projection omits the body or
    /// attributes column.
    pub fn new(
        table_name: &'static str,
        keys_to_columns: HashMap<K, &'static str>,
        reserved_keys: &'static [K],
        body_column: &'static str,
        attributes_column: &'static str,
        select_columns: Vec<&'static str>,
    ) -> Result<Self, LogQueryError> {
        let mapping = Self {
            table_name,
            keys_to_columns,
            reserved_keys,
            body_column,
            attributes_column,
            select_columns,
            sample_factor_column: None,
        };
        mapping.validate()?;
        Ok(mapping)
    }

    /// Check the mapping invariants.
    pub fn validate(&self) -> Result<(), LogQueryError> {
        if let Some(key) = self
            .keys_to_columns
            .keys()
            .find(|key| !self.reserved_keys.contains(key))
        {
            return Err(LogQueryError::Config(format!(
                "table {}: column mapping for {key:?} which is not a reserved key",
                self.table_name
            )));
        }

        if !self.select_columns.is_empty() {
            for required in [self.body_column, self.attributes_column] {
                if !self.select_columns.contains(&required) {
                    return Err(LogQueryError::Config(format!(
                        "table {}: projection is missing column {required}",
                        self.table_name
                    )));
                }
            }
        }

        Ok(())
    }

    pub const fn table_name(&self) -> &'static str {
        self.table_name
    }

    pub const fn body_column(&self) -> &'static str {
        self.body_column
    }

    pub const fn attributes_column(&self) -> &'static str {
        self.attributes_column
    }

    /// Columns projected by a full row fetch. Empty for tables that are only
    /// ever aggregated.
    pub fn select_columns(&self) -> &[&'static str] {
        &self.select_columns
    }

    /// Column holding per-row extrapolation factors. Set only on sampled tables.
    pub const fn sample_factor_column(&self) -> Option<&'static str> {
        self.sample_factor_column
    }

    /// Physical column for a reserved key, if mapped.
    pub fn column_for(&self, key: K) -> Option<&'static str> {
        self.keys_to_columns.get(&key).copied()
    }

    /// Physical column for a reserved key.
    ///
    /// # Errors
    ///
    /// Returns [`LogQueryError::Config`] when the key has no column in this
    /// table. This is a programming error in the mapping, never a user error.
    pub fn require_column(&self, key: K) -> Result<&'static str, LogQueryError> {
        self.column_for(key).ok_or_else(|| {
            LogQueryError::Config(format!(
                "table {}: no column for reserved key {}",
                self.table_name,
                key.as_str()
            ))
        })
    }
}

fn log_keys_to_columns() -> HashMap<ReservedLogKey, &'static str> {
    HashMap::from([
        (ReservedLogKey::Level, columns::SEVERITY_TEXT),
        (ReservedLogKey::SecureSessionId, columns::SECURE_SESSION_ID),
        (ReservedLogKey::SpanId, columns::SPAN_ID),
        (ReservedLogKey::TraceId, columns::TRACE_ID),
        (ReservedLogKey::Source, columns::SOURCE),
        (ReservedLogKey::ServiceName, columns::SERVICE_NAME),
        (ReservedLogKey::ServiceVersion, columns::SERVICE_VERSION),
    ])
}

static LOGS_MAPPING: LazyLock<ColumnMapping<ReservedLogKey>> = LazyLock::new(|| ColumnMapping {
    table_name: LOGS_TABLE,
    keys_to_columns: log_keys_to_columns(),
    reserved_keys: ReservedLogKey::ALL,
    body_column: columns::BODY,
    attributes_column: columns::LOG_ATTRIBUTES,
    select_columns: vec![
        columns::TIME_UNIX_NANO,
        columns::UUID,
        columns::PROJECT_ID,
        columns::SEVERITY_TEXT,
        columns::BODY,
        columns::LOG_ATTRIBUTES,
        columns::TRACE_ID,
        columns::SPAN_ID,
        columns::SECURE_SESSION_ID,
        columns::SOURCE,
        columns::SERVICE_NAME,
        columns::SERVICE_VERSION,
    ],
    sample_factor_column: None,
});

static LOGS_SAMPLING_MAPPING: LazyLock<ColumnMapping<ReservedLogKey>> =
    LazyLock::new(|| ColumnMapping {
        table_name: LOGS_SAMPLING_TABLE,
        keys_to_columns: log_keys_to_columns(),
        reserved_keys: ReservedLogKey::ALL,
        body_column: columns::BODY,
        attributes_column: columns::LOG_ATTRIBUTES,
        select_columns: Vec::new(),
        sample_factor_column: Some(columns::SAMPLE_FACTOR),
    });

/// Mapping of the dense `logs` table.
pub fn logs_mapping() -> &'static ColumnMapping<ReservedLogKey> {
    &LOGS_MAPPING
}

/// Mapping of the sampled `logs_sampling` table.
pub fn logs_sampling_mapping() -> &'static ColumnMapping<ReservedLogKey> {
    &LOGS_SAMPLING_MAPPING
}
