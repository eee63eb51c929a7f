//! Structured filter trees.
//!
//! A filter arrives already parsed from the query language. Two total
//! functions consume it: the scan builder compiles it to a SQL predicate and
//! the matcher evaluates it against an in-memory row. Both match exhaustively
//! on the variants below, so a new operator cannot be added to one evaluator
//! without the other.
//!
//! # Value semantics
//!
//! Every field resolves to a non-null string. Unset reserved fields are the
//! empty string, and so is an attribute the row does not carry. Comparisons
//! are byte-wise and case-sensitive.

use serde::{Deserialize, Serialize};

use crate::mapping::ReservedLogKey;

/// Field a filter leaf reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Field<K> {
    /// A reserved key with a dedicated column.
    Reserved(K),
    /// The log message.
    Body,
    /// A free-form attribute.
    Attribute(String),
}

/// Comparison applied by a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Whole-value match where `*` stands for any run of characters.
    Wildcard,
    /// Substring match.
    Contains,
}

/// Filter tree over reserved keys `K`, the body, and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter<K = ReservedLogKey> {
    /// Matches every row.
    All,
    Compare {
        field: Field<K>,
        op: CompareOp,
        value: String,
    },
    /// The row carries the attribute `key`.
    Exists { key: String },
    And(Vec<Filter<K>>),
    Or(Vec<Filter<K>>),
    Not(Box<Filter<K>>),
}

/// Filter over the log tables.
pub type LogFilter = Filter<ReservedLogKey>;

impl<K> Default for Filter<K> {
    fn default() -> Self {
        Self::All
    }
}

impl<K> Filter<K> {
    pub fn compare(field: Field<K>, op: CompareOp, value: impl Into<String>) -> Self {
        Self::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    /// `key = value` on a reserved key.
    pub fn reserved(key: K, value: impl Into<String>) -> Self {
        Self::compare(Field::Reserved(key), CompareOp::Eq, value)
    }

    /// `key = value` on an attribute.
    pub fn attribute(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(Field::Attribute(key.into()), CompareOp::Eq, value)
    }

    /// Body contains `text`.
    pub fn body_contains(text: impl Into<String>) -> Self {
        Self::compare(Field::Body, CompareOp::Contains, text)
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists { key: key.into() }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}

/// Match `value` against a wildcard pattern in which `*` matches any run of
/// characters (including none) and every other character matches itself.
pub fn wildcard_matches(pattern: &str, value: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return value.is_empty();
    };
    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };

    let middle: Vec<&str> = parts.collect();
    let Some((last, middle)) = middle.split_last() else {
        // No `*` at all: the prefix must be the whole value.
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}
