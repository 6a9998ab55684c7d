// 8.0 config.rs: all ledger settings in one place. transaction budgets, the
// reconciliation pool, hierarchy rounding, logging.
// 8.1 every section has defaults so a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Bounds on every atomic unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionLimits {
    // How long a caller may wait for the transaction slot
    pub lock_wait_ms: u64,
    // Longest a transaction body may run before it is thrown away
    pub max_runtime_ms: u64,
}

impl TransactionLimits {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_millis(self.max_runtime_ms)
    }
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            lock_wait_ms: 250,
            max_runtime_ms: 2_000,
        }
    }
}

/// Background reconciliation pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    // Number of shards; a wager always lands on shard `id % workers`
    pub workers: usize,
    // Bounded queue per shard
    pub queue_capacity: usize,
    // Attempts per job before giving up and leaving the fast lock in place
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl ReconcileConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1_024,
            max_attempts: 3,
            retry_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    // Decimal places kept on commission entries; the residual goes to the top
    pub amount_scale: u32,
    pub max_depth: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            amount_scale: 2,
            max_depth: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Install the global tracing subscriber. `RUST_LOG` overrides `level`.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        // a subscriber may already be installed (tests, embedding hosts)
        let _ = match self.format.as_str() {
            "json" => fmt().json().with_env_filter(filter).try_init(),
            _ => fmt().with_env_filter(filter).try_init(),
        };
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// The complete ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub transactions: TransactionLimits,
    pub reconcile: ReconcileConfig,
    pub hierarchy: HierarchyConfig,
    pub logging: LoggingConfig,
    // Maximum number of events kept in the in-memory audit log
    pub max_events: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            transactions: TransactionLimits::default(),
            reconcile: ReconcileConfig::default(),
            hierarchy: HierarchyConfig::default(),
            logging: LoggingConfig::default(),
            max_events: 100_000,
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml_str(&content)
    }

    // Fewer workers and debug logs for local runs
    pub fn development() -> Self {
        let mut config = Self::default();
        config.reconcile.workers = 2;
        config.logging.level = "debug".into();
        config
    }

    pub fn staging() -> Self {
        let mut config = Self::default();
        config.logging.format = "json".into();
        config
    }

    // Wider pool, more retries, json logs
    pub fn production() -> Self {
        let mut config = Self::default();
        config.transactions.lock_wait_ms = 500;
        config.transactions.max_runtime_ms = 5_000;
        config.reconcile.workers = 16;
        config.reconcile.queue_capacity = 16_384;
        config.reconcile.max_attempts = 5;
        config.reconcile.retry_delay_ms = 200;
        config.logging.format = "json".into();
        config.max_events = 1_000_000;
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tx = &self.transactions;
        if tx.lock_wait_ms == 0 {
            return Err(invalid("transactions.lock_wait_ms", "must be positive"));
        }
        if tx.max_runtime_ms < tx.lock_wait_ms {
            return Err(invalid(
                "transactions.max_runtime_ms",
                "must not be shorter than lock_wait_ms",
            ));
        }

        let rc = &self.reconcile;
        if rc.workers == 0 {
            return Err(invalid("reconcile.workers", "need at least 1 worker"));
        }
        if rc.queue_capacity == 0 {
            return Err(invalid("reconcile.queue_capacity", "must be positive"));
        }
        if rc.max_attempts == 0 {
            return Err(invalid("reconcile.max_attempts", "must be positive"));
        }

        if self.hierarchy.amount_scale > 8 {
            return Err(invalid("hierarchy.amount_scale", "at most 8 decimal places"));
        }
        if self.hierarchy.max_depth == 0 {
            return Err(invalid("hierarchy.max_depth", "must be positive"));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "logging.level",
            });
        }
        if self.max_events == 0 {
            return Err(invalid("max_events", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn config(&self) -> LedgerConfig {
        match self {
            Environment::Development => LedgerConfig::development(),
            Environment::Staging => LedgerConfig::staging(),
            Environment::Production => LedgerConfig::production(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_valid() {
        assert!(LedgerConfig::default().validate().is_ok());

        let mut config = LedgerConfig::default();
        config.reconcile.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "reconcile.workers", .. })
        ));
    }

    #[test]
    fn environment_presets_validate() {
        for env in [Environment::Development, Environment::Staging, Environment::Production] {
            assert!(env.config().validate().is_ok(), "{env:?}");
        }
        assert_eq!(Environment::Production.config().logging.format, "json");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = LedgerConfig::from_toml_str(
            r#"
            max_events = 500

            [reconcile]
            workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.reconcile.workers, 8);
        assert_eq!(config.reconcile.queue_capacity, 1_024);
        assert_eq!(config.transactions.lock_wait_ms, 250);
        assert_eq!(config.max_events, 500);
    }

    #[test]
    fn runtime_shorter_than_wait_is_rejected() {
        let err = LedgerConfig::from_toml_str(
            r#"
            max_events = 10
            [transactions]
            lock_wait_ms = 100
            max_runtime_ms = 50
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "transactions.max_runtime_ms", .. }
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            LedgerConfig::from_toml_str("max_events = ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_events = 42\n[hierarchy]\namount_scale = 4").unwrap();
        let config = LedgerConfig::load(file.path()).unwrap();
        assert_eq!(config.max_events, 42);
        assert_eq!(config.hierarchy.amount_scale, 4);

        assert!(matches!(
            LedgerConfig::load("/definitely/not/here.toml"),
            Err(ConfigError::ReadFile(_))
        ));
    }
}
