//! In-memory filter evaluation.
//!
//! [`matches`] must select exactly the rows the compiled scan predicate
//! selects. The integration tests check this by running random filters over
//! random rows through both evaluators.

use crate::filter::{wildcard_matches, CompareOp, Field, Filter, LogFilter};
use crate::mapping::{logs_mapping, ColumnMapping, ReservedKey, ReservedLogKey};

/// A materialised row the matcher can read fields from.
pub trait MatchRow<K> {
    /// Value of a reserved field; unset fields are the empty string.
    fn reserved_value(&self, key: K) -> &str;

    fn body(&self) -> &str;

    /// Value of an attribute, `None` when the row does not carry it.
    fn attribute(&self, key: &str) -> Option<&str>;
}

/// Evaluate `filter` against `row` under the column layout of `mapping`.
///
/// A reserved key with no column in `mapping` cannot be compiled into a scan,
/// so a leaf referencing one never matches.
pub fn matches<K, R>(row: &R, mapping: &ColumnMapping<K>, filter: &Filter<K>) -> bool
where
    K: ReservedKey,
    R: MatchRow<K> + ?Sized,
{
    match filter {
        Filter::All => true,
        Filter::Compare { field, op, value } => match field_value(row, mapping, field) {
            Some(actual) => compare(actual, *op, value),
            None => false,
        },
        Filter::Exists { key } => row.attribute(key).is_some(),
        Filter::And(filters) => filters.iter().all(|f| matches(row, mapping, f)),
        Filter::Or(filters) => filters.iter().any(|f| matches(row, mapping, f)),
        Filter::Not(inner) => !matches(row, mapping, inner),
    }
}

/// Evaluate a filter against a log row using the dense table mapping.
pub fn log_matches_query<R>(row: &R, filter: &LogFilter) -> bool
where
    R: MatchRow<ReservedLogKey> + ?Sized,
{
    matches(row, logs_mapping(), filter)
}

fn field_value<'r, K, R>(row: &'r R, mapping: &ColumnMapping<K>, field: &Field<K>) -> Option<&'r str>
where
    K: ReservedKey,
    R: MatchRow<K> + ?Sized,
{
    match field {
        Field::Reserved(key) => mapping
            .column_for(*key)
            .map(|_| row.reserved_value(*key)),
        Field::Body => Some(row.body()),
        Field::Attribute(key) => Some(row.attribute(key).unwrap_or("")),
    }
}

fn compare(actual: &str, op: CompareOp, expected: &str) -> bool {
    match op {
        CompareOp::Eq => actual == expected,
        CompareOp::Lt => actual < expected,
        CompareOp::Le => actual <= expected,
        CompareOp::Gt => actual > expected,
        CompareOp::Ge => actual >= expected,
        CompareOp::Wildcard => wildcard_matches(expected, actual),
        CompareOp::Contains => actual.contains(expected),
    }
}
