//! Severity histograms.
//!
//! A histogram query groups rows by a single synthetic key that packs the
//! time bucket and the severity ordinal together:
//!
//! ```text
//! group_key = bucket * 8 + severity_number
//! bucket    = n_buckets * (ts_seconds - start_seconds) / (end_seconds - start_seconds)
//! ```
//!
//! Wide ranges are answered from the sampled table, whose per-row sample
//! factor scales the counts back up.

use std::collections::BTreeMap;

use arrow::array::{Array, Float64Array};
use arrow::record_batch::RecordBatch;
use serde::Serialize;

use crate::mapping::{ColumnMapping, ReservedKey};
use crate::query::builders::DateRange;
use crate::row::int64_column;
use crate::schema::{columns, LogLevel, SEVERITY_SLOTS};
use crate::LogQueryError;

#[allow(clippy::as_conversions, clippy::cast_possible_wrap)]
const SLOTS: i64 = SEVERITY_SLOTS as i64;

/// Output column holding the packed group key.
pub const GROUP_KEY: &str = "group_key";
/// Output column holding the (extrapolated) row count of a group.
pub const ROW_COUNT: &str = "row_count";
/// Output column holding the sample factor of a group.
pub const SAMPLE_FACTOR: &str = "sample_factor";

/// Largest bucket count a histogram request may ask for.
pub const MAX_BUCKETS: u64 = 10_000;

/// Ranges at least this wide are read from the sampled table.
pub fn sampling_threshold() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Whether a histogram over `range` reads the sampled table.
pub fn uses_sampled_table(range: &DateRange) -> bool {
    range.duration() >= sampling_threshold()
}

/// Count of one severity level in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketCount {
    pub level: LogLevel,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    pub bucket_id: u64,
    /// One entry per level, in [`LogLevel::ALL`] order.
    pub counts: Vec<BucketCount>,
}

/// Severity counts over evenly sized time buckets.
///
/// Only buckets that saw at least one row are present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogsHistogram {
    pub buckets: Vec<HistogramBucket>,
    pub bucket_count: u64,
    pub object_count: u64,
    pub sample_factor: f64,
}

/// One row of a grouped histogram query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupRow {
    pub group_key: i64,
    pub count: u64,
    pub sample_factor: f64,
}

pub const fn pack_group_key(bucket: i64, severity_number: u8) -> i64 {
    bucket * SLOTS + severity_number as i64
}

/// Split a group key into `(bucket, severity_number)`.
#[allow(clippy::as_conversions, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn unpack_group_key(group_key: i64) -> (i64, u8) {
    (
        group_key.div_euclid(SLOTS),
        group_key.rem_euclid(SLOTS) as u8,
    )
}

/// Bucket of a row at `ts_seconds`, computed the way the histogram query
/// computes it: integer division truncating toward zero, before clamping.
pub const fn bucket_index(ts_seconds: i64, start_seconds: i64, end_seconds: i64, n_buckets: u64) -> i64 {
    #[allow(clippy::as_conversions, clippy::cast_possible_wrap)]
    let n = n_buckets as i64;
    n * (ts_seconds - start_seconds) / bucket_width(start_seconds, end_seconds)
}

const fn bucket_width(start_seconds: i64, end_seconds: i64) -> i64 {
    let width = end_seconds - start_seconds;
    if width < 1 {
        1
    } else {
        width
    }
}

/// Check the histogram request.
pub fn validate_request(range: &DateRange, n_buckets: u64) -> Result<(), LogQueryError> {
    if n_buckets == 0 {
        return Err(LogQueryError::QueryBuild(
            "histogram needs at least one bucket".to_owned(),
        ));
    }
    if n_buckets > MAX_BUCKETS {
        return Err(LogQueryError::QueryBuild(format!(
            "histogram asks for {n_buckets} buckets, at most {MAX_BUCKETS} are allowed"
        )));
    }
    if range.end_date < range.start_date {
        return Err(LogQueryError::QueryBuild(format!(
            "histogram range ends ({}) before it starts ({})",
            range.end_date, range.start_date
        )));
    }
    Ok(())
}

/// Aggregate projection of a histogram query over the table `mapping` describes.
///
/// Tables with a sample factor column scale each group's count by it.
pub fn histogram_projection<K: ReservedKey>(
    range: &DateRange,
    n_buckets: u64,
    mapping: &ColumnMapping<K>,
) -> String {
    let start = range.start_date.timestamp();
    let width = bucket_width(start, range.end_date.timestamp());
    let group_key = format!(
        "({n_buckets} * (\"{ts}\" / 1000000000 - {start})) / {width} * {SLOTS} \
         + CAST(\"{sev}\" AS BIGINT) AS {GROUP_KEY}",
        ts = columns::TIME_UNIX_NANO,
        sev = columns::SEVERITY_NUMBER,
    );

    match mapping.sample_factor_column() {
        Some(factor) => format!(
            "{group_key}, \
             CAST(round(CAST(count(*) AS DOUBLE) * max(\"{factor}\")) AS BIGINT) AS {ROW_COUNT}, \
             max(\"{factor}\") AS {SAMPLE_FACTOR}"
        ),
        None => {
            format!("{group_key}, count(*) AS {ROW_COUNT}, CAST(1.0 AS DOUBLE) AS {SAMPLE_FACTOR}")
        }
    }
}

/// Decode grouped histogram rows.
pub fn decode_group_rows(batches: &[RecordBatch]) -> Result<Vec<GroupRow>, LogQueryError> {
    let mut rows = Vec::new();
    for batch in batches {
        let keys = int64_column(batch, GROUP_KEY)?;
        let counts = int64_column(batch, ROW_COUNT)?;
        let factors = batch
            .column_by_name(SAMPLE_FACTOR)
            .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
            .ok_or_else(|| {
                LogQueryError::Decode(format!("missing or mistyped column {SAMPLE_FACTOR}"))
            })?;

        for i in 0..batch.num_rows() {
            if keys.is_null(i) {
                continue;
            }
            rows.push(GroupRow {
                group_key: keys.value(i),
                count: u64::try_from(counts.value(i)).unwrap_or(0),
                sample_factor: if factors.is_null(i) { 1.0 } else { factors.value(i) },
            });
        }
    }
    Ok(rows)
}

/// Build the histogram from grouped rows.
///
/// Buckets past the end are clamped into the last bucket (a row exactly at
/// the range end lands one past it). Ordinals with no defined level are
/// counted as `info`. Every present bucket lists every level.
pub fn assemble_histogram(rows: &[GroupRow], n_buckets: u64) -> LogsHistogram {
    #[allow(clippy::as_conversions, clippy::cast_possible_wrap)]
    let last = (n_buckets.max(1) - 1) as i64;

    let mut by_bucket: BTreeMap<i64, BTreeMap<LogLevel, u64>> = BTreeMap::new();
    let mut object_count = 0u64;

    for row in rows {
        let (bucket, severity) = unpack_group_key(row.group_key);
        let bucket = bucket.clamp(0, last);
        let level = LogLevel::from_severity_number(severity).unwrap_or(LogLevel::Info);

        *by_bucket.entry(bucket).or_default().entry(level).or_default() += row.count;
        object_count += row.count;
    }

    let buckets = by_bucket
        .into_iter()
        .map(|(bucket, counts)| HistogramBucket {
            bucket_id: u64::try_from(bucket).unwrap_or(0),
            counts: LogLevel::ALL
                .iter()
                .map(|level| BucketCount {
                    level: *level,
                    count: counts.get(level).copied().unwrap_or(0),
                })
                .collect(),
        })
        .collect();

    LogsHistogram {
        buckets,
        bucket_count: n_buckets,
        object_count,
        sample_factor: rows.first().map_or(1.0, |r| r.sample_factor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{logs_mapping, logs_sampling_mapping};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn range(hours: i64) -> DateRange {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        DateRange::new(start, start + chrono::Duration::hours(hours))
    }

    fn row(bucket: i64, level: LogLevel, count: u64) -> GroupRow {
        GroupRow {
            group_key: pack_group_key(bucket, level.severity_number()),
            count,
            sample_factor: 1.0,
        }
    }

    #[test]
    fn source_switches_at_exactly_one_day() {
        assert!(uses_sampled_table(&range(24)));
        assert!(uses_sampled_table(&range(48)));
        assert!(!uses_sampled_table(&range(23)));

        let mut almost = range(24);
        almost.end_date -= chrono::Duration::minutes(1);
        assert!(!uses_sampled_table(&almost));
    }

    #[test]
    fn group_key_roundtrip() {
        for level in LogLevel::ALL {
            let key = pack_group_key(9, level.severity_number());
            assert_eq!(unpack_group_key(key), (9, level.severity_number()));
        }
    }

    #[test]
    fn bucket_index_spans_range() {
        assert_eq!(bucket_index(0, 0, 100, 10), 0);
        assert_eq!(bucket_index(9, 0, 100, 10), 0);
        assert_eq!(bucket_index(10, 0, 100, 10), 1);
        assert_eq!(bucket_index(99, 0, 100, 10), 9);
        // A row exactly at the end falls one past the last bucket.
        assert_eq!(bucket_index(100, 0, 100, 10), 10);
        // Zero-width ranges divide by one.
        assert_eq!(bucket_index(5, 5, 5, 3), 0);
    }

    #[test]
    fn end_edge_row_is_clamped_into_last_bucket() {
        let rows = [row(9, LogLevel::Info, 2), row(10, LogLevel::Info, 1)];
        let histogram = assemble_histogram(&rows, 10);

        assert_eq!(histogram.buckets.len(), 1);
        assert_eq!(histogram.buckets[0].bucket_id, 9);
        let info = histogram.buckets[0]
            .counts
            .iter()
            .find(|c| c.level == LogLevel::Info)
            .unwrap();
        assert_eq!(info.count, 3);
    }

    #[test]
    fn present_buckets_are_zero_filled() {
        let rows = [row(0, LogLevel::Error, 4), row(3, LogLevel::Warn, 1)];
        let histogram = assemble_histogram(&rows, 5);

        assert_eq!(histogram.buckets.len(), 2);
        for bucket in &histogram.buckets {
            let levels: Vec<LogLevel> = bucket.counts.iter().map(|c| c.level).collect();
            assert_eq!(levels, LogLevel::ALL.to_vec());
        }
        assert_eq!(histogram.object_count, 5);
        assert_eq!(histogram.bucket_count, 5);
    }

    #[test]
    fn unknown_ordinal_counts_as_info() {
        let rows = [GroupRow {
            group_key: pack_group_key(0, 7),
            count: 3,
            sample_factor: 1.0,
        }];
        let histogram = assemble_histogram(&rows, 1);
        let info = histogram.buckets[0]
            .counts
            .iter()
            .find(|c| c.level == LogLevel::Info)
            .unwrap();
        assert_eq!(info.count, 3);
    }

    #[test]
    fn empty_result_is_an_empty_histogram() {
        let histogram = assemble_histogram(&[], 12);
        assert!(histogram.buckets.is_empty());
        assert_eq!(histogram.object_count, 0);
        assert_eq!(histogram.bucket_count, 12);
        assert!((histogram.sample_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sample_factor_is_reported() {
        let rows = [GroupRow {
            group_key: 0,
            count: 40,
            sample_factor: 4.0,
        }];
        assert!((assemble_histogram(&rows, 1).sample_factor - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_requests_are_rejected() {
        assert!(validate_request(&range(1), 0).is_err());
        let backwards = DateRange::new(range(1).end_date, range(1).start_date);
        assert!(matches!(
            validate_request(&backwards, 10),
            Err(LogQueryError::QueryBuild(_))
        ));
        assert!(validate_request(&range(0), 10).is_ok());
    }

    #[test]
    fn bucket_count_is_capped() {
        assert!(validate_request(&range(1), MAX_BUCKETS).is_ok());
        assert!(matches!(
            validate_request(&range(1), MAX_BUCKETS + 1),
            Err(LogQueryError::QueryBuild(_))
        ));
        assert!(matches!(
            validate_request(&range(1), u64::MAX),
            Err(LogQueryError::QueryBuild(_))
        ));
    }

    #[test]
    fn capped_bucket_count_cannot_overflow() {
        // A century of seconds at the largest bucket count stays in range.
        let century = 100 * 366 * 86_400;
        let last = bucket_index(century, 0, century, MAX_BUCKETS);
        assert_eq!(last, i64::try_from(MAX_BUCKETS).unwrap());
        assert!(pack_group_key(last, 6) > 0);
    }

    #[test]
    fn projection_matches_source() {
        let dense = histogram_projection(&range(1), 10, logs_mapping());
        assert!(dense.contains("count(*) AS row_count"));
        assert!(dense.contains("CAST(1.0 AS DOUBLE) AS sample_factor"));
        assert!(dense.contains("/ 3600 * 8"));

        let sampled = histogram_projection(&range(48), 10, logs_sampling_mapping());
        assert!(sampled.contains("max(\"sample_factor\") AS sample_factor"));
        assert!(sampled.contains("round("));
    }

    proptest! {
        #[test]
        fn every_row_lands_in_a_valid_bucket(
            offset in 0i64..=86_400,
            n in 1u64..500,
            level_idx in 0usize..6,
        ) {
            let level = LogLevel::ALL[level_idx];
            let bucket = bucket_index(offset, 0, 86_400, n);
            let rows = [GroupRow {
                group_key: pack_group_key(bucket, level.severity_number()),
                count: 1,
                sample_factor: 1.0,
            }];
            let histogram = assemble_histogram(&rows, n);
            prop_assert_eq!(histogram.buckets.len(), 1);
            prop_assert!(histogram.buckets[0].bucket_id < n);
            let total: u64 = histogram.buckets[0].counts.iter().map(|c| c.count).sum();
            prop_assert_eq!(total, 1);
        }
    }
}
