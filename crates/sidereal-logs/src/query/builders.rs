//! Scan query builder.
//!
//! Compiles a column mapping, a filter tree, a date range and a pagination
//! request into one SQL statement with bound parameters (`$1`, `$2`, ...).
//! Filter values are always bound; only column names from the static
//! mappings and validated attribute keys are written into the SQL text.

#![allow(clippy::format_push_string)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::{CompareOp, Field, Filter};
use crate::mapping::{ColumnMapping, ReservedKey};
use crate::query::cursor::CursorKey;
use crate::row::timestamp_nanos;
use crate::schema::columns;
use crate::LogQueryError;

/// Rows per page.
pub const PAGE_SIZE: usize = 50;

/// Rows kept on each side of the cursor row in an `at` window.
pub const WINDOW_SIDE: usize = PAGE_SIZE / 2;

/// Sort direction requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// The four orderings a scan can use, each over `(time_unix_nano, uuid)`.
///
/// The natural ordering is the one the caller asked for. The inverted
/// ordering is its exact reverse and is used to fetch the rows nearest a
/// `before` cursor first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanOrdering {
    ForwardNatural,
    BackwardNatural,
    ForwardInverted,
    BackwardInverted,
}

impl ScanOrdering {
    pub const fn natural(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Ascending => Self::ForwardNatural,
            SortDirection::Descending => Self::BackwardNatural,
        }
    }

    pub const fn inverted(self) -> Self {
        match self {
            Self::ForwardNatural => Self::ForwardInverted,
            Self::BackwardNatural => Self::BackwardInverted,
            Self::ForwardInverted => Self::ForwardNatural,
            Self::BackwardInverted => Self::BackwardNatural,
        }
    }

    pub const fn is_ascending(self) -> bool {
        matches!(self, Self::ForwardNatural | Self::BackwardInverted)
    }

    /// Comparison selecting the rows that follow a cursor in this ordering.
    const fn seek_operator(self) -> &'static str {
        if self.is_ascending() {
            ">"
        } else {
            "<"
        }
    }

    fn order_by(self) -> String {
        let dir = if self.is_ascending() { "ASC" } else { "DESC" };
        format!(
            "{} {dir}, {} {dir}",
            quote_ident(columns::TIME_UNIX_NANO),
            quote_ident(columns::UUID)
        )
    }
}

/// Inclusive time bounds of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl DateRange {
    pub const fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            start_date,
            end_date,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_date - self.start_date
    }
}

/// Decoded position of a page relative to a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PageBound {
    #[default]
    Unbounded,
    After(CursorKey),
    Before(CursorKey),
    At(CursorKey),
}

/// A validated pagination request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub bound: PageBound,
    pub direction: SortDirection,
    /// Suppress projection, ordering and limit so the scan can feed an aggregate.
    pub count_only: bool,
}

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    Int32(i32),
    Int64(i64),
    Utf8(String),
}

/// A compiled scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanQuery {
    /// Table the scan reads.
    pub table: &'static str,
    pub sql: String,
    /// Values for `$1..$n`, in order.
    pub params: Vec<QueryParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Limit {
    PageProbe,
    Fixed(usize),
    Unlimited,
}

/// Builder for scans over one mapped table.
///
/// # Example
///
/// ```
/// use sidereal_logs::filter::Filter;
/// use sidereal_logs::mapping::{logs_mapping, ReservedLogKey};
/// use sidereal_logs::query::ScanBuilder;
///
/// let filter = Filter::reserved(ReservedLogKey::ServiceName, "api");
/// let scan = ScanBuilder::new(logs_mapping(), 1)
///     .filter(&filter)
///     .build()
///     .unwrap();
///
/// assert!(scan.sql.contains("\"service_name\" = $2"));
/// assert!(scan.sql.ends_with("LIMIT 51"));
/// ```
#[derive(Debug, Clone)]
#[must_use = "builders do nothing until .build() is called"]
pub struct ScanBuilder<'a, K: ReservedKey> {
    mapping: &'a ColumnMapping<K>,
    project_id: i32,
    projection: Option<String>,
    extra_predicates: Vec<String>,
    filter: Option<&'a Filter<K>>,
    date_range: Option<DateRange>,
    request: PageRequest,
    orderings: Option<(ScanOrdering, ScanOrdering)>,
    limit: Limit,
}

impl<'a, K: ReservedKey> ScanBuilder<'a, K> {
    /// Create a builder for a project-scoped scan of `mapping`'s table.
    pub const fn new(mapping: &'a ColumnMapping<K>, project_id: i32) -> Self {
        Self {
            mapping,
            project_id,
            projection: None,
            extra_predicates: Vec::new(),
            filter: None,
            date_range: None,
            request: PageRequest {
                bound: PageBound::Unbounded,
                direction: SortDirection::Descending,
                count_only: false,
            },
            orderings: None,
            limit: Limit::PageProbe,
        }
    }

    /// Replace the mapping's column list with a caller-supplied projection,
    /// typically an aggregate for count-only scans.
    pub fn projection(mut self, projection: impl Into<String>) -> Self {
        self.projection = Some(projection.into());
        self
    }

    /// AND a trusted SQL predicate into the scan.
    pub fn extra_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.extra_predicates.push(predicate.into());
        self
    }

    pub const fn filter(mut self, filter: &'a Filter<K>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub const fn date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn pagination(mut self, request: PageRequest) -> Self {
        self.request = request;
        self
    }

    /// Override the natural and inverted orderings derived from the sort
    /// direction.
    pub const fn orderings(mut self, natural: ScanOrdering, inverted: ScanOrdering) -> Self {
        self.orderings = Some((natural, inverted));
        self
    }

    /// Fetch at most `n` rows instead of one page plus a probe row.
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Limit::Fixed(n);
        self
    }

    /// Fetch every matching row.
    pub const fn unlimited(mut self) -> Self {
        self.limit = Limit::Unlimited;
        self
    }

    /// Compile the scan.
    ///
    /// # Errors
    ///
    /// - [`LogQueryError::Config`] if the filter names a reserved key the
    ///   mapping has no column for.
    /// - [`LogQueryError::QueryBuild`] for unsafe attribute keys, a missing
    ///   projection, or a count-only scan centred on a cursor.
    pub fn build(&self) -> Result<ScanQuery, LogQueryError> {
        let mut params = Params::default();
        let projection = self.projection_sql()?;
        let table = quote_ident(self.mapping.table_name());
        let base = self.base_predicate(&mut params)?;
        let (natural, inverted) = self
            .orderings
            .unwrap_or_else(|| {
                let natural = ScanOrdering::natural(self.request.direction);
                (natural, natural.inverted())
            });

        let sql = match &self.request.bound {
            PageBound::At(_) if self.request.count_only => {
                return Err(LogQueryError::QueryBuild(
                    "count-only scans cannot be centred on a cursor".to_owned(),
                ));
            }
            PageBound::At(key) => {
                let (t, u) = push_cursor(&mut params, key);
                let before = format!(
                    "SELECT {projection} FROM {table} WHERE {base} AND {} ORDER BY {} LIMIT {}",
                    seek_predicate(inverted, &t, &u),
                    inverted.order_by(),
                    WINDOW_SIDE + 1
                );
                let exact = format!(
                    "SELECT {projection} FROM {table} WHERE {base} AND {} = {t} AND {} = {u}",
                    quote_ident(columns::TIME_UNIX_NANO),
                    quote_ident(columns::UUID)
                );
                let after = format!(
                    "SELECT {projection} FROM {table} WHERE {base} AND {} ORDER BY {} LIMIT {}",
                    seek_predicate(natural, &t, &u),
                    natural.order_by(),
                    WINDOW_SIDE + 1
                );
                format!(
                    "SELECT * FROM ({before}) AS before_cursor \
                     UNION ALL SELECT * FROM ({exact}) AS at_cursor \
                     UNION ALL SELECT * FROM ({after}) AS after_cursor"
                )
            }
            bound => {
                let (ordering, seek) = match bound {
                    PageBound::After(key) => {
                        let (t, u) = push_cursor(&mut params, key);
                        (natural, Some(seek_predicate(natural, &t, &u)))
                    }
                    PageBound::Before(key) => {
                        let (t, u) = push_cursor(&mut params, key);
                        (inverted, Some(seek_predicate(inverted, &t, &u)))
                    }
                    PageBound::Unbounded | PageBound::At(_) => (natural, None),
                };

                let mut sql = format!("SELECT {projection} FROM {table} WHERE {base}");
                if let Some(seek) = seek {
                    sql.push_str(&format!(" AND {seek}"));
                }
                if !self.request.count_only {
                    sql.push_str(&format!(" ORDER BY {}", ordering.order_by()));
                    match self.limit {
                        Limit::PageProbe => sql.push_str(&format!(" LIMIT {}", PAGE_SIZE + 1)),
                        Limit::Fixed(n) => sql.push_str(&format!(" LIMIT {n}")),
                        Limit::Unlimited => {}
                    }
                }
                sql
            }
        };

        Ok(ScanQuery {
            table: self.mapping.table_name(),
            sql,
            params: params.into_inner(),
        })
    }

    fn projection_sql(&self) -> Result<String, LogQueryError> {
        if let Some(projection) = &self.projection {
            return Ok(projection.clone());
        }
        if self.request.count_only {
            return Err(LogQueryError::QueryBuild(
                "count-only scans need an aggregate projection".to_owned(),
            ));
        }

        let columns = self.mapping.select_columns();
        if columns.is_empty() {
            return Err(LogQueryError::QueryBuild(format!(
                "table {} has no row projection",
                self.mapping.table_name()
            )));
        }
        Ok(columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "))
    }

    /// Project scope, date range, extra predicates and the filter, ANDed.
    fn base_predicate(&self, params: &mut Params) -> Result<String, LogQueryError> {
        let mut predicates = vec![format!(
            "{} = {}",
            quote_ident(columns::PROJECT_ID),
            params.push(QueryParam::Int32(self.project_id))
        )];

        if let Some(range) = &self.date_range {
            let ts = quote_ident(columns::TIME_UNIX_NANO);
            let start = params.push(QueryParam::Int64(timestamp_nanos(range.start_date)));
            let end = params.push(QueryParam::Int64(timestamp_nanos(range.end_date)));
            predicates.push(format!("{ts} >= {start} AND {ts} <= {end}"));
        }

        predicates.extend(self.extra_predicates.iter().map(|p| format!("({p})")));

        if let Some(filter) = self.filter {
            if !matches!(filter, Filter::All) {
                predicates.push(self.compile(filter, params)?);
            }
        }

        Ok(predicates.join(" AND "))
    }

    fn compile(&self, filter: &Filter<K>, params: &mut Params) -> Result<String, LogQueryError> {
        Ok(match filter {
            Filter::All => "TRUE".to_owned(),
            Filter::Compare { field, op, value } => {
                let lhs = self.field_expr(field)?;
                match op {
                    CompareOp::Eq => format!("{lhs} = {}", params.utf8(value)),
                    CompareOp::Lt => format!("{lhs} < {}", params.utf8(value)),
                    CompareOp::Le => format!("{lhs} <= {}", params.utf8(value)),
                    CompareOp::Gt => format!("{lhs} > {}", params.utf8(value)),
                    CompareOp::Ge => format!("{lhs} >= {}", params.utf8(value)),
                    // Through `regexp_like` rather than `~`: the planner rewrites
                    // literal `~` patterns into LIKE, where `\` is an escape.
                    CompareOp::Wildcard => {
                        format!("regexp_like({lhs}, {})", params.utf8(&wildcard_regex(value)))
                    }
                    CompareOp::Contains => {
                        format!("regexp_like({lhs}, {})", params.utf8(&contains_regex(value)))
                    }
                }
            }
            Filter::Exists { key } => format!("{} IS NOT NULL", self.attribute_lookup(key)?),
            Filter::And(filters) => self.compile_all(filters, " AND ", "TRUE", params)?,
            Filter::Or(filters) => self.compile_all(filters, " OR ", "FALSE", params)?,
            Filter::Not(inner) => format!("(NOT {})", self.compile(inner, params)?),
        })
    }

    fn compile_all(
        &self,
        filters: &[Filter<K>],
        separator: &str,
        empty: &str,
        params: &mut Params,
    ) -> Result<String, LogQueryError> {
        if filters.is_empty() {
            return Ok(empty.to_owned());
        }
        let parts = filters
            .iter()
            .map(|f| self.compile(f, params))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(separator)))
    }

    fn field_expr(&self, field: &Field<K>) -> Result<String, LogQueryError> {
        match field {
            Field::Reserved(key) => Ok(quote_ident(self.mapping.require_column(*key)?)),
            Field::Body => Ok(quote_ident(self.mapping.body_column())),
            Field::Attribute(key) => Ok(format!("COALESCE({}, '')", self.attribute_lookup(key)?)),
        }
    }

    fn attribute_lookup(&self, key: &str) -> Result<String, LogQueryError> {
        let key = validate_attribute_key(key)?;
        Ok(format!(
            "cbor_extract({}, '{key}')",
            quote_ident(self.mapping.attributes_column())
        ))
    }
}

#[derive(Debug, Default)]
struct Params(Vec<QueryParam>);

impl Params {
    /// Bind a value, returning its placeholder.
    fn push(&mut self, param: QueryParam) -> String {
        self.0.push(param);
        format!("${}", self.0.len())
    }

    fn utf8(&mut self, value: &str) -> String {
        self.push(QueryParam::Utf8(value.to_owned()))
    }

    fn into_inner(self) -> Vec<QueryParam> {
        self.0
    }
}

fn push_cursor(params: &mut Params, key: &CursorKey) -> (String, String) {
    let t = params.push(QueryParam::Int64(timestamp_nanos(key.timestamp)));
    let u = params.push(QueryParam::Utf8(key.uuid.clone()));
    (t, u)
}

/// Rows strictly after the cursor `(t, u)` in `ordering`.
fn seek_predicate(ordering: ScanOrdering, t: &str, u: &str) -> String {
    let op = ordering.seek_operator();
    let ts = quote_ident(columns::TIME_UNIX_NANO);
    let id = quote_ident(columns::UUID);
    format!("({ts} {op} {t} OR ({ts} = {t} AND {id} {op} {u}))")
}

fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// Check that an attribute key is safe to embed in a string literal.
///
/// Only ASCII alphanumerics and `_ . - /` are allowed.
pub fn validate_attribute_key(key: &str) -> Result<&str, LogQueryError> {
    if key.is_empty() {
        return Err(LogQueryError::QueryBuild("empty attribute key".to_owned()));
    }
    if key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'))
    {
        Ok(key)
    } else {
        Err(LogQueryError::QueryBuild(format!(
            "attribute key {key:?} contains unsupported characters"
        )))
    }
}

/// Regex equivalent of a whole-value wildcard match.
pub fn wildcard_regex(pattern: &str) -> String {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("(?s)^{body}$")
}

/// Regex equivalent of a substring match.
pub fn contains_regex(text: &str) -> String {
    format!("(?s){}", regex::escape(text))
}
