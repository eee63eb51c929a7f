//! Configuration for the embedded log store.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::query::engine::{DEFAULT_QUERY_BATCH_SIZE, DEFAULT_QUERY_TIMEOUT, DEFAULT_SAMPLE_RATE};
use crate::LogQueryError;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "logs.toml";

/// Prefix of configuration environment variables. Nested keys are separated
/// by `__`, e.g. `SIDEREAL_LOGS_QUERY__TIMEOUT_SECS`.
pub const ENV_PREFIX: &str = "SIDEREAL_LOGS_";

/// Log query configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogQueryConfig {
    /// Query execution configuration.
    pub query: QueryConfig,
}

impl LogQueryConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order (later sources override earlier):
    /// 1. Default values
    /// 2. `logs.toml` in current directory
    /// 3. Environment variables prefixed with `SIDEREAL_LOGS_`
    pub fn load() -> Result<Self, LogQueryError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, LogQueryError> {
        Self::extract(path.as_ref(), ENV_PREFIX)
    }

    fn extract(path: &Path, env_prefix: &str) -> Result<Self, LogQueryError> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
            .extract()
            .map_err(|e| LogQueryError::Config(e.to_string()))
    }
}

/// Query execution configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Query timeout in seconds. `0` disables the timeout.
    pub timeout_secs: u64,
    /// DataFusion batch size.
    pub batch_size: usize,
    /// Memory limit for query execution. Unlimited when unset.
    pub memory_limit_bytes: Option<usize>,
    /// One dense row in `sample_rate` is copied to the sampled table.
    pub sample_rate: u32,
}

impl QueryConfig {
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_QUERY_TIMEOUT.as_secs(),
            batch_size: DEFAULT_QUERY_BATCH_SIZE,
            memory_limit_bytes: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = LogQueryConfig::default();
        assert_eq!(config.query.timeout(), Some(DEFAULT_QUERY_TIMEOUT));
        assert_eq!(config.query.batch_size, DEFAULT_QUERY_BATCH_SIZE);
        assert_eq!(config.query.memory_limit_bytes, None);
        assert_eq!(config.query.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = QueryConfig {
            timeout_secs: 0,
            ..QueryConfig::default()
        };
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogQueryConfig::extract(&dir.path().join("absent.toml"), "SIDEREAL_LOGS_TEST_ABSENT_")
            .unwrap();
        assert_eq!(config.query, QueryConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[query]\ntimeout_secs = 5\nsample_rate = 4\nmemory_limit_bytes = 1048576"
        )
        .unwrap();

        let config = LogQueryConfig::extract(file.path(), "SIDEREAL_LOGS_TEST_FILE_").unwrap();
        assert_eq!(config.query.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.query.sample_rate, 4);
        assert_eq!(config.query.memory_limit_bytes, Some(1_048_576));
        assert_eq!(config.query.batch_size, DEFAULT_QUERY_BATCH_SIZE);
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query]\nsample_rate = 4").unwrap();

        std::env::set_var("SIDEREAL_LOGS_TEST_ENV_QUERY__SAMPLE_RATE", "16");
        let config = LogQueryConfig::extract(file.path(), "SIDEREAL_LOGS_TEST_ENV_").unwrap();
        std::env::remove_var("SIDEREAL_LOGS_TEST_ENV_QUERY__SAMPLE_RATE");

        assert_eq!(config.query.sample_rate, 16);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query]\nsample_rate = \"lots\"").unwrap();

        let err = LogQueryConfig::extract(file.path(), "SIDEREAL_LOGS_TEST_BAD_").unwrap_err();
        assert!(matches!(err, LogQueryError::Config(_)));
    }
}
