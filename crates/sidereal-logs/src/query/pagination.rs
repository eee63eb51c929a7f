//! Keyset pagination.
//!
//! A request names at most one cursor. The scan fetches one row more than a
//! page so that overflow can be detected without a second query; this module
//! turns the fetched rows back into a page in the caller's order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::query::builders::{PageBound, PageRequest, SortDirection, PAGE_SIZE, WINDOW_SIDE};
use crate::query::cursor::{decode_cursor, encode_cursor, CursorKey};
use crate::row::{LogRow, SessionLogRow};
use crate::LogQueryError;

/// Pagination request as received from the API layer.
///
/// Empty cursor strings are treated as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub after: Option<String>,
    pub before: Option<String>,
    pub at: Option<String>,
    pub direction: SortDirection,
    pub count_only: bool,
}

impl Pagination {
    pub fn after(cursor: impl Into<String>) -> Self {
        Self {
            after: Some(cursor.into()),
            ..Self::default()
        }
    }

    pub fn before(cursor: impl Into<String>) -> Self {
        Self {
            before: Some(cursor.into()),
            ..Self::default()
        }
    }

    pub fn at(cursor: impl Into<String>) -> Self {
        Self {
            at: Some(cursor.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Validate the request and decode its cursor.
    ///
    /// # Errors
    ///
    /// [`LogQueryError::InvalidPagination`] when more than one cursor is set,
    /// [`LogQueryError::InvalidCursor`] when the cursor does not decode.
    pub fn resolve(&self) -> Result<PageRequest, LogQueryError> {
        let bound = match (set(&self.after), set(&self.before), set(&self.at)) {
            (None, None, None) => PageBound::Unbounded,
            (Some(c), None, None) => PageBound::After(decode_cursor(c)?),
            (None, Some(c), None) => PageBound::Before(decode_cursor(c)?),
            (None, None, Some(c)) => PageBound::At(decode_cursor(c)?),
            _ => {
                return Err(LogQueryError::InvalidPagination(
                    "at most one of after, before and at may be set".to_owned(),
                ))
            }
        };

        Ok(PageRequest {
            bound,
            direction: self.direction,
            count_only: self.count_only,
        })
    }
}

fn set(cursor: &Option<String>) -> Option<&str> {
    cursor.as_deref().filter(|s| !s.is_empty())
}

/// Rows that can be positioned by a cursor.
pub trait SortKey {
    fn timestamp(&self) -> DateTime<Utc>;
    fn uuid(&self) -> &str;

    fn cursor(&self) -> String {
        encode_cursor(self.timestamp(), self.uuid())
    }
}

impl SortKey for LogRow {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl SortKey for SessionLogRow {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }
}

fn key_cmp<T: SortKey>(row: &T, key: &CursorKey) -> std::cmp::Ordering {
    row.timestamp()
        .cmp(&key.timestamp)
        .then_with(|| row.uuid().cmp(key.uuid.as_str()))
}

/// Rows of one page in the caller's order, with overflow flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// Turn rows fetched for an unbounded, `after` or `before` scan into a page.
///
/// `rows` must be in fetch order: natural order for unbounded and `after`
/// scans, inverted order for `before` scans.
pub fn assemble_page<T>(mut rows: Vec<T>, bound: &PageBound) -> Page<T> {
    let overflow = rows.len() > PAGE_SIZE;
    // The probe row is the one furthest from the boundary.
    rows.truncate(PAGE_SIZE);

    let (has_next_page, has_previous_page) = match bound {
        PageBound::Unbounded | PageBound::At(_) => (overflow, false),
        PageBound::After(_) => (overflow, true),
        PageBound::Before(_) => {
            rows.reverse();
            (true, overflow)
        }
    };

    Page {
        rows,
        has_next_page,
        has_previous_page,
    }
}

/// Turn the rows of an `at` window into a page centred on `key`.
///
/// Rows may arrive in any order. Each side of the cursor is trimmed to
/// [`WINDOW_SIDE`] rows, keeping the rows nearest the cursor.
pub fn assemble_window<T: SortKey>(
    mut rows: Vec<T>,
    key: &CursorKey,
    direction: SortDirection,
) -> Page<T> {
    rows.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.uuid().cmp(b.uuid()))
    });
    if direction == SortDirection::Descending {
        rows.reverse();
    }

    let precedes = |row: &T| {
        let ord = key_cmp(row, key);
        match direction {
            SortDirection::Ascending => ord.is_lt(),
            SortDirection::Descending => ord.is_gt(),
        }
    };
    let follows = |row: &T| {
        let ord = key_cmp(row, key);
        match direction {
            SortDirection::Ascending => ord.is_gt(),
            SortDirection::Descending => ord.is_lt(),
        }
    };

    let before_count = rows.iter().filter(|r| precedes(*r)).count();
    let after_count = rows.iter().filter(|r| follows(*r)).count();
    let skip = before_count.saturating_sub(WINDOW_SIDE);
    let keep = rows.len() - skip - after_count.saturating_sub(WINDOW_SIDE);

    Page {
        rows: rows.into_iter().skip(skip).take(keep).collect(),
        has_next_page: after_count > WINDOW_SIDE,
        has_previous_page: before_count > WINDOW_SIDE,
    }
}

/// Cursor and row of one page entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

pub type LogEdge = Edge<LogRow>;
pub type SessionLogEdge = Edge<SessionLogRow>;

impl<T: SortKey> Edge<T> {
    pub fn new(node: T) -> Self {
        Self {
            cursor: node.cursor(),
            node,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: String,
    pub end_cursor: String,
}

/// One page of log rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogConnection {
    pub edges: Vec<LogEdge>,
    pub page_info: PageInfo,
}

impl From<Page<LogRow>> for LogConnection {
    fn from(page: Page<LogRow>) -> Self {
        let edges: Vec<LogEdge> = page.rows.into_iter().map(Edge::new).collect();
        let page_info = PageInfo {
            has_next_page: page.has_next_page,
            has_previous_page: page.has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()).unwrap_or_default(),
            end_cursor: edges.last().map(|e| e.cursor.clone()).unwrap_or_default(),
        };
        Self { edges, page_info }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Row(i64, &'static str);

    impl SortKey for Row {
        fn timestamp(&self) -> DateTime<Utc> {
            Utc.timestamp_opt(self.0, 0).unwrap()
        }

        fn uuid(&self) -> &str {
            self.1
        }
    }

    fn rows(range: std::ops::Range<i64>) -> Vec<Row> {
        range.map(|i| Row(i, "x")).collect()
    }

    fn key(secs: i64, uuid: &str) -> CursorKey {
        CursorKey::new(Utc.timestamp_opt(secs, 0).unwrap(), uuid)
    }

    #[test]
    fn two_cursors_are_ambiguous() {
        let pagination = Pagination {
            after: Some("a".to_owned()),
            before: Some("b".to_owned()),
            ..Pagination::default()
        };
        assert!(matches!(
            pagination.resolve(),
            Err(LogQueryError::InvalidPagination(_))
        ));
    }

    #[test]
    fn bad_cursor_is_rejected() {
        assert!(matches!(
            Pagination::after("***").resolve(),
            Err(LogQueryError::InvalidCursor(_))
        ));
    }

    #[test]
    fn empty_cursor_is_unset() {
        let request = Pagination::after("").resolve().unwrap();
        assert_eq!(request.bound, PageBound::Unbounded);
    }

    #[test]
    fn resolve_decodes_cursor() {
        let ts = Utc.timestamp_opt(1_000, 7).unwrap();
        let request = Pagination::before(encode_cursor(ts, "id"))
            .with_direction(SortDirection::Ascending)
            .resolve()
            .unwrap();
        assert_eq!(request.bound, PageBound::Before(CursorKey::new(ts, "id")));
        assert_eq!(request.direction, SortDirection::Ascending);
        assert!(!request.count_only);
    }

    #[test]
    fn pagination_deserialises_with_defaults() {
        let pagination: Pagination = serde_json::from_str(r#"{"after": "abc"}"#).unwrap();
        assert_eq!(pagination.direction, SortDirection::Descending);
        assert_eq!(pagination.after.as_deref(), Some("abc"));
    }

    #[rstest]
    #[case::unbounded_full(PageBound::Unbounded, 51, true, false)]
    #[case::unbounded_short(PageBound::Unbounded, 10, false, false)]
    #[case::after_full(PageBound::After(key(0, "x")), 51, true, true)]
    #[case::after_exact(PageBound::After(key(0, "x")), 50, false, true)]
    #[case::before_full(PageBound::Before(key(0, "x")), 51, true, true)]
    #[case::before_short(PageBound::Before(key(0, "x")), 3, true, false)]
    fn page_flags(
        #[case] bound: PageBound,
        #[case] fetched: i64,
        #[case] has_next: bool,
        #[case] has_previous: bool,
    ) {
        let page = assemble_page(rows(0..fetched), &bound);
        assert_eq!(page.rows.len(), usize::try_from(fetched).unwrap().min(PAGE_SIZE));
        assert_eq!(page.has_next_page, has_next);
        assert_eq!(page.has_previous_page, has_previous);
    }

    #[test]
    fn before_page_drops_furthest_row_then_reverses() {
        // Fetched nearest-first: 100, 99, ..., 50.
        let fetched: Vec<Row> = (50..=100).rev().map(|i| Row(i, "x")).collect();
        let page = assemble_page(fetched, &PageBound::Before(key(101, "x")));

        assert_eq!(page.rows.first(), Some(&Row(51, "x")));
        assert_eq!(page.rows.last(), Some(&Row(100, "x")));
        assert!(page.has_previous_page);
    }

    #[test]
    fn window_centres_on_cursor_row() {
        // Shuffled union of 26 before, the row, 26 after.
        let mut fetched: Vec<Row> = (74..=126).map(|i| Row(i, "x")).collect();
        fetched.reverse();
        let page = assemble_window(fetched, &key(100, "x"), SortDirection::Ascending);

        assert_eq!(page.rows.len(), 2 * WINDOW_SIDE + 1);
        assert_eq!(page.rows[WINDOW_SIDE], Row(100, "x"));
        assert_eq!(page.rows.first(), Some(&Row(75, "x")));
        assert_eq!(page.rows.last(), Some(&Row(125, "x")));
        assert!(page.has_previous_page);
        assert!(page.has_next_page);
    }

    #[test]
    fn window_descending_without_overflow() {
        let fetched = rows(95..103);
        let page = assemble_window(fetched, &key(100, "x"), SortDirection::Descending);

        let got: Vec<i64> = page.rows.iter().map(|r| r.0).collect();
        assert_eq!(got, (95..103).rev().collect::<Vec<_>>());
        assert!(!page.has_previous_page);
        assert!(!page.has_next_page);
    }

    #[test]
    fn window_breaks_timestamp_ties_by_uuid() {
        let fetched = vec![Row(5, "c"), Row(5, "a"), Row(5, "b")];
        let page = assemble_window(fetched, &key(5, "b"), SortDirection::Ascending);
        assert_eq!(page.rows, vec![Row(5, "a"), Row(5, "b"), Row(5, "c")]);
    }

    #[test]
    fn connection_cursors_come_from_edges() {
        let row = LogRow::builder()
            .timestamp(Utc.timestamp_opt(1_000, 0).unwrap())
            .uuid("u1")
            .build();
        let connection = LogConnection::from(Page {
            rows: vec![row.clone()],
            has_next_page: false,
            has_previous_page: false,
        });

        let cursor = encode_cursor(row.timestamp, "u1");
        assert_eq!(connection.edges[0].cursor, cursor);
        assert_eq!(connection.page_info.start_cursor, cursor);
        assert_eq!(connection.page_info.end_cursor, cursor);
    }

    #[test]
    fn empty_connection_has_empty_cursors() {
        let connection = LogConnection::from(Page {
            rows: Vec::new(),
            has_next_page: false,
            has_previous_page: false,
        });
        assert!(connection.edges.is_empty());
        assert_eq!(connection.page_info, PageInfo::default());
    }
}
