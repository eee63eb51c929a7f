//! Embedded DataFusion log store.
//!
//! Holds the dense `logs` table and the sampled `logs_sampling` table as
//! in-memory DataFusion tables. Writes to `logs` also append a deterministic
//! subset of the rows to `logs_sampling`, each tagged with the sample rate as
//! its extrapolation factor.

use std::sync::Arc;
use std::time::Duration;

use arrow::array::{ArrayRef, BooleanArray, Float64Array};
use arrow::compute::filter_record_batch;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::datasource::MemTable;
use datafusion::execution::memory_pool::{FairSpillPool, GreedyMemoryPool};
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use datafusion::execution::SessionStateBuilder;
use datafusion::prelude::*;
use datafusion::scalar::ScalarValue;
use datafusion::sql::TableReference;
use sha2::{Digest, Sha256};

use crate::config::QueryConfig;
use crate::query::builders::{QueryParam, ScanQuery};
use crate::row::string_column;
use crate::schema::{columns, logs_sampling_schema, logs_schema, LOGS_SAMPLING_TABLE, LOGS_TABLE};
use crate::store::LogStore;
use crate::LogQueryError;

/// Memory pool strategy for query execution.
#[derive(Debug, Clone, Copy, Default)]
pub enum MemoryPoolStrategy {
    /// No memory limit (default).
    #[default]
    Unlimited,
    /// Greedy allocation up to a limit, then fail.
    Greedy {
        /// Maximum memory in bytes.
        max_bytes: usize,
    },
    /// Fair allocation with spilling support.
    FairSpill {
        /// Maximum memory in bytes.
        max_bytes: usize,
    },
}

/// Default query timeout (30 seconds).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default DataFusion batch size for query execution.
pub const DEFAULT_QUERY_BATCH_SIZE: usize = 8192;

/// Default sample rate: one dense row in ten is copied to the sampled table.
pub const DEFAULT_SAMPLE_RATE: u32 = 10;

/// Whether the row with `uuid` belongs to the sampled table at `rate`.
///
/// The decision takes the first eight bytes of the SHA-256 of the uuid, so
/// the sampled set is the same across processes and toolchains.
pub fn is_sampled(uuid: &str, rate: u32) -> bool {
    if rate <= 1 {
        return true;
    }
    let mut hasher = Sha256::new();
    hasher.update(uuid.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % u64::from(rate) == 0
}

/// Log store wrapping a DataFusion SessionContext.
pub struct QueryEngine {
    ctx: SessionContext,
    query_timeout: Option<Duration>,
    sample_rate: u32,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("session_id", &self.ctx.session_id())
            .field("query_timeout", &self.query_timeout)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a QueryEngine.
#[derive(Debug, Clone)]
#[must_use = "builders do nothing until .build() is called"]
pub struct QueryEngineBuilder {
    memory_pool: MemoryPoolStrategy,
    query_timeout: Option<Duration>,
    batch_size: usize,
    sample_rate: u32,
}

impl Default for QueryEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngineBuilder {
    /// Create a builder with the default timeout, batch size and sample rate.
    pub const fn new() -> Self {
        Self {
            memory_pool: MemoryPoolStrategy::Unlimited,
            query_timeout: Some(DEFAULT_QUERY_TIMEOUT),
            batch_size: DEFAULT_QUERY_BATCH_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Create a builder from loaded configuration.
    pub fn from_config(config: &QueryConfig) -> Self {
        let builder = Self::new()
            .with_timeout(config.timeout())
            .with_batch_size(config.batch_size)
            .with_sample_rate(config.sample_rate);
        match config.memory_limit_bytes {
            Some(max_bytes) => builder.with_memory_limit(max_bytes),
            None => builder,
        }
    }

    /// Set a query timeout.
    ///
    /// Queries that exceed this duration will return a `QueryTimeout` error.
    /// Use `None` to disable the timeout.
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Disable the query timeout.
    #[allow(clippy::missing_const_for_fn)]
    pub fn without_timeout(self) -> Self {
        self.with_timeout(None)
    }

    /// Set the memory pool strategy.
    pub const fn with_memory_pool(mut self, strategy: MemoryPoolStrategy) -> Self {
        self.memory_pool = strategy;
        self
    }

    /// Set a greedy memory limit (convenience method).
    #[allow(clippy::missing_const_for_fn)]
    pub fn with_memory_limit(self, max_bytes: usize) -> Self {
        self.with_memory_pool(MemoryPoolStrategy::Greedy { max_bytes })
    }

    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Copy one dense row in `rate` to the sampled table. A rate of 0 or 1
    /// copies every row.
    pub const fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = if rate == 0 { 1 } else { rate };
        self
    }

    /// Build the engine and register the log tables.
    pub fn build(self) -> Result<QueryEngine, LogQueryError> {
        let runtime = match self.memory_pool {
            MemoryPoolStrategy::Unlimited => RuntimeEnvBuilder::new().build_arc()?,
            MemoryPoolStrategy::Greedy { max_bytes } => RuntimeEnvBuilder::new()
                .with_memory_pool(Arc::new(GreedyMemoryPool::new(max_bytes)))
                .build_arc()?,
            MemoryPoolStrategy::FairSpill { max_bytes } => RuntimeEnvBuilder::new()
                .with_memory_pool(Arc::new(FairSpillPool::new(max_bytes)))
                .build_arc()?,
        };

        let config = SessionConfig::new()
            .with_collect_statistics(true)
            // Histogram queries are grouped aggregates.
            .with_repartition_aggregations(true)
            .with_batch_size(self.batch_size);

        let state = SessionStateBuilder::new()
            .with_default_features()
            .with_config(config)
            .with_runtime_env(runtime)
            .build();
        let ctx = SessionContext::from(state);

        for udf in super::udfs::all_udfs() {
            ctx.register_udf(udf);
        }

        register_table(&ctx, LOGS_TABLE, logs_schema())?;
        register_table(&ctx, LOGS_SAMPLING_TABLE, logs_sampling_schema())?;

        Ok(QueryEngine {
            ctx,
            query_timeout: self.query_timeout,
            sample_rate: self.sample_rate,
        })
    }
}

fn register_table(ctx: &SessionContext, name: &str, schema: SchemaRef) -> Result<(), LogQueryError> {
    let table = MemTable::try_new(schema, vec![Vec::new()])?;
    ctx.register_table(TableReference::bare(name), Arc::new(table))?;
    tracing::info!(table = name, "Registered in-memory log table");
    Ok(())
}

impl QueryEngine {
    /// Create an engine with default settings.
    pub fn new() -> Result<Self, LogQueryError> {
        QueryEngineBuilder::new().build()
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Execute raw SQL and collect all results.
    ///
    /// The query is subject to the configured timeout.
    #[tracing::instrument(skip(self), fields(sql_len = sql.len()))]
    pub async fn sql(&self, sql: &str) -> Result<Vec<RecordBatch>, LogQueryError> {
        let df = self.ctx.sql(sql).await?;
        self.collect(df).await
    }

    /// Get the underlying SessionContext for advanced use cases.
    pub const fn session_context(&self) -> &SessionContext {
        &self.ctx
    }

    async fn collect(&self, df: DataFrame) -> Result<Vec<RecordBatch>, LogQueryError> {
        let collect_future = df.collect();

        if let Some(timeout) = self.query_timeout {
            match tokio::time::timeout(timeout, collect_future).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(LogQueryError::QueryTimeout { duration: timeout }),
            }
        } else {
            collect_future.await.map_err(Into::into)
        }
    }

    async fn append(&self, table: &str, batch: RecordBatch) -> Result<(), LogQueryError> {
        self.ctx
            .read_batch(batch)?
            .write_table(table, DataFrameWriteOptions::new())
            .await?;
        Ok(())
    }

    /// Rows of a dense batch that belong to the sampled table, with their
    /// sample factor appended.
    fn sample(&self, batch: &RecordBatch) -> Result<RecordBatch, LogQueryError> {
        let uuids = string_column(batch, columns::UUID)?;
        let mask: BooleanArray = uuids
            .iter()
            .map(|uuid| Some(is_sampled(uuid.unwrap_or_default(), self.sample_rate)))
            .collect();
        let sampled = filter_record_batch(batch, &mask)?;

        let factor = Float64Array::from(vec![f64::from(self.sample_rate); sampled.num_rows()]);
        let mut arrays: Vec<ArrayRef> = sampled.columns().to_vec();
        arrays.push(Arc::new(factor));

        Ok(RecordBatch::try_new(logs_sampling_schema(), arrays)?)
    }
}

fn to_scalar(param: &QueryParam) -> ScalarValue {
    match param {
        QueryParam::Int32(v) => ScalarValue::Int32(Some(*v)),
        QueryParam::Int64(v) => ScalarValue::Int64(Some(*v)),
        QueryParam::Utf8(v) => ScalarValue::Utf8(Some(v.clone())),
    }
}

#[async_trait]
impl LogStore for QueryEngine {
    #[tracing::instrument(skip_all, fields(table = scan.table, sql_len = scan.sql.len(), params = scan.params.len()))]
    async fn query(&self, scan: &ScanQuery) -> Result<Vec<RecordBatch>, LogQueryError> {
        let params: Vec<ScalarValue> = scan.params.iter().map(to_scalar).collect();
        let df = self.ctx.sql(&scan.sql).await?.with_param_values(params)?;
        let batches = self.collect(df).await?;
        tracing::debug!(
            rows = batches.iter().map(RecordBatch::num_rows).sum::<usize>(),
            "Scan complete"
        );
        Ok(batches)
    }

    #[tracing::instrument(skip(self, batch), fields(rows = batch.num_rows()))]
    async fn insert(&self, table: &str, batch: RecordBatch) -> Result<(), LogQueryError> {
        match table {
            LOGS_TABLE => {
                let sampled = self.sample(&batch)?;
                self.append(LOGS_TABLE, batch).await?;
                if sampled.num_rows() > 0 {
                    self.append(LOGS_SAMPLING_TABLE, sampled).await?;
                }
                Ok(())
            }
            LOGS_SAMPLING_TABLE => self.append(LOGS_SAMPLING_TABLE, batch).await,
            other => Err(LogQueryError::Store(format!("unknown table {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{rows_to_batch, LogRow};
    use arrow::array::Int64Array;

    fn rows(n: usize) -> Vec<LogRow> {
        (0..n)
            .map(|i| {
                LogRow::builder()
                    .uuid(format!("row-{i:04}"))
                    .project_id(1)
                    .body(format!("message {i}"))
                    .build()
            })
            .collect()
    }

    async fn count(engine: &QueryEngine, table: &str) -> i64 {
        let batches = engine
            .sql(&format!("SELECT count(*) AS n FROM \"{table}\""))
            .await
            .unwrap();
        batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .value(0)
    }

    #[tokio::test]
    async fn tables_start_empty() {
        let engine = QueryEngine::new().unwrap();
        assert_eq!(count(&engine, "logs").await, 0);
        assert_eq!(count(&engine, "logs_sampling").await, 0);
    }

    #[tokio::test]
    async fn insert_maintains_sampled_table() {
        let engine = QueryEngineBuilder::new().with_sample_rate(3).build().unwrap();
        let rows = rows(300);
        let expected = rows.iter().filter(|r| is_sampled(&r.uuid, 3)).count();

        engine
            .insert("logs", rows_to_batch(&rows).unwrap())
            .await
            .unwrap();

        assert_eq!(count(&engine, "logs").await, 300);
        assert_eq!(
            count(&engine, "logs_sampling").await,
            i64::try_from(expected).unwrap()
        );

        let factors = engine
            .sql("SELECT DISTINCT sample_factor FROM logs_sampling")
            .await
            .unwrap();
        let factors: Vec<f64> = factors
            .iter()
            .flat_map(|b| {
                b.column(0)
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .unwrap()
                    .values()
                    .to_vec()
            })
            .collect();
        assert_eq!(factors, vec![3.0]);
    }

    #[tokio::test]
    async fn rate_one_samples_everything() {
        let engine = QueryEngineBuilder::new().with_sample_rate(1).build().unwrap();
        engine
            .insert("logs", rows_to_batch(&rows(20)).unwrap())
            .await
            .unwrap();
        assert_eq!(count(&engine, "logs_sampling").await, 20);
    }

    #[tokio::test]
    async fn unknown_table_is_rejected() {
        let engine = QueryEngine::new().unwrap();
        let err = engine
            .insert("traces", rows_to_batch(&rows(1)).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LogQueryError::Store(_)));
    }

    #[tokio::test]
    async fn scan_binds_parameters() {
        let engine = QueryEngine::new().unwrap();
        engine
            .insert("logs", rows_to_batch(&rows(5)).unwrap())
            .await
            .unwrap();

        let scan = ScanQuery {
            table: "logs",
            sql: "SELECT \"uuid\" FROM \"logs\" WHERE \"project_id\" = $1 AND \"uuid\" > $2 \
                  ORDER BY \"uuid\""
                .to_owned(),
            params: vec![QueryParam::Int32(1), QueryParam::Utf8("row-0002".to_owned())],
        };
        let batches = engine.query(&scan).await.unwrap();
        let total: usize = batches.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn cbor_extract_is_registered() {
        let engine = QueryEngine::new().unwrap();
        let row = LogRow::builder()
            .uuid("a")
            .attribute("region", "eu")
            .build();
        engine
            .insert("logs", rows_to_batch(&[row]).unwrap())
            .await
            .unwrap();

        let batches = engine
            .sql("SELECT cbor_extract(log_attributes, 'region') AS region FROM logs")
            .await
            .unwrap();
        let region = string_column(&batches[0], "region").unwrap();
        assert_eq!(region.value(0), "eu");
    }

    #[test]
    fn sampling_is_deterministic() {
        for i in 0..100 {
            let uuid = format!("id-{i}");
            assert_eq!(is_sampled(&uuid, 7), is_sampled(&uuid, 7));
        }
        assert!(is_sampled("anything", 1));
        assert!(is_sampled("anything", 0));
    }

    #[rstest::rstest]
    #[case("row-0000", 4, false)]
    #[case("row-0001", 7, true)]
    #[case("row-0002", 7, true)]
    #[case("row-0003", 7, false)]
    #[case("hist-00001", 4, true)]
    #[case("hist-00000", 4, false)]
    #[case("a", 10, true)]
    #[case("row-0000", 10, false)]
    fn sampling_follows_sha256_prefix(#[case] uuid: &str, #[case] rate: u32, #[case] sampled: bool) {
        assert_eq!(is_sampled(uuid, rate), sampled);
    }

    #[test]
    fn config_feeds_builder() {
        let config = QueryConfig {
            timeout_secs: 0,
            batch_size: 1024,
            memory_limit_bytes: Some(1 << 20),
            sample_rate: 0,
        };
        let builder = QueryEngineBuilder::from_config(&config);
        assert!(builder.query_timeout.is_none());
        assert_eq!(builder.batch_size, 1024);
        assert_eq!(builder.sample_rate, 1);
        assert!(matches!(
            builder.memory_pool,
            MemoryPoolStrategy::Greedy { max_bytes: 1_048_576 }
        ));
    }
}
