use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::warn;

use crate::ingest::AnomalyThresholds;

/// Top-level configuration for the satgate gateway.
///
/// Every option is read from the process environment and falls back to a
/// default, so an empty environment yields a runnable configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind port. Env: PORT. Default: 8080.
    pub port: u16,

    /// Store connection string (clickhouse-rs TCP DSN).
    /// Env: DATABASE_URL. Default: "tcp://localhost:9000/satgate".
    pub database_url: String,

    /// Size-trigger threshold for a drain. Env: BATCH_SIZE. Default: 1000.
    pub batch_size: usize,

    /// Writer ticker period. Env: BATCH_TIMEOUT. Default: 1s.
    pub batch_timeout: Duration,

    /// Store pool upper bound. Env: MAX_CONNECTIONS. Default: 50.
    pub max_connections: u32,

    /// Anomaly classifier thresholds.
    /// Env: ANOMALY_THRESHOLD_BATTERY / _STORAGE / _SIGNAL.
    /// Defaults: 10.0, 95000.0, -100.0.
    pub anomaly: AnomalyThresholds,

    /// WAL file path. Env: WAL_PATH. Default: /var/lib/satgate/wal/data.wal.
    pub wal_path: PathBuf,

    /// Advisory WAL size bound in bytes (not enforced as rotation).
    /// Env: WAL_MAX_SIZE. Default: 100 MiB.
    pub wal_max_size: u64,

    /// Store attempts per batch. Env: MAX_RETRIES. Default: 5.
    pub max_retries: u32,

    /// Base backoff between attempts. Env: RETRY_DELAY. Default: 1s.
    pub retry_delay: Duration,

    /// Consecutive failures before the circuit opens.
    /// Env: CIRCUIT_BREAKER_THRESHOLD. Default: 3.
    pub circuit_breaker_threshold: u32,

    /// How long an open circuit waits before probing recovery.
    /// Env: CIRCUIT_BREAKER_TIMEOUT. Default: 30s.
    pub circuit_breaker_timeout: Duration,

    /// Hard cap on buffered samples. Env: MAX_BUFFER_SIZE. Default: 10000.
    pub max_buffer_size: usize,

    /// Store probe period. Env: HEALTH_CHECK_INTERVAL. Default: 5s.
    pub health_check_interval: Duration,

    /// Deadline for graceful shutdown. Env: SHUTDOWN_TIMEOUT. Default: 30s.
    pub shutdown_timeout: Duration,
}

// --- Default value functions ---

fn default_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "tcp://localhost:9000/satgate".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_batch_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_max_connections() -> u32 {
    50
}

fn default_anomaly_thresholds() -> AnomalyThresholds {
    AnomalyThresholds {
        battery_min_percent: 10.0,
        storage_max_mb: 95_000.0,
        signal_min_dbm: -100.0,
    }
}

fn default_wal_path() -> PathBuf {
    PathBuf::from("/var/lib/satgate/wal/data.wal")
}

fn default_wal_max_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_circuit_breaker_threshold() -> u32 {
    3
}

fn default_circuit_breaker_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_buffer_size() -> usize {
    10_000
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            database_url: default_database_url(),
            batch_size: default_batch_size(),
            batch_timeout: default_batch_timeout(),
            max_connections: default_max_connections(),
            anomaly: default_anomaly_thresholds(),
            wal_path: default_wal_path(),
            wal_max_size: default_wal_max_size(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_timeout: default_circuit_breaker_timeout(),
            max_buffer_size: default_max_buffer_size(),
            health_check_interval: default_health_check_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

// --- Loading and validation ---

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Unset variables use their defaults; values that fail to parse are
    /// logged and replaced by the default rather than aborting startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: env_parse("PORT", defaults.port),
            database_url: env_string("DATABASE_URL", defaults.database_url),
            batch_size: env_parse("BATCH_SIZE", defaults.batch_size),
            batch_timeout: env_duration("BATCH_TIMEOUT", defaults.batch_timeout),
            max_connections: env_parse("MAX_CONNECTIONS", defaults.max_connections),
            anomaly: AnomalyThresholds {
                battery_min_percent: env_parse(
                    "ANOMALY_THRESHOLD_BATTERY",
                    defaults.anomaly.battery_min_percent,
                ),
                storage_max_mb: env_parse(
                    "ANOMALY_THRESHOLD_STORAGE",
                    defaults.anomaly.storage_max_mb,
                ),
                signal_min_dbm: env_parse(
                    "ANOMALY_THRESHOLD_SIGNAL",
                    defaults.anomaly.signal_min_dbm,
                ),
            },
            wal_path: PathBuf::from(env_string(
                "WAL_PATH",
                defaults.wal_path.display().to_string(),
            )),
            wal_max_size: env_parse("WAL_MAX_SIZE", defaults.wal_max_size),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            retry_delay: env_duration("RETRY_DELAY", defaults.retry_delay),
            circuit_breaker_threshold: env_parse(
                "CIRCUIT_BREAKER_THRESHOLD",
                defaults.circuit_breaker_threshold,
            ),
            circuit_breaker_timeout: env_duration(
                "CIRCUIT_BREAKER_TIMEOUT",
                defaults.circuit_breaker_timeout,
            ),
            max_buffer_size: env_parse("MAX_BUFFER_SIZE", defaults.max_buffer_size),
            health_check_interval: env_duration(
                "HEALTH_CHECK_INTERVAL",
                defaults.health_check_interval,
            ),
            shutdown_timeout: env_duration("SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
        }
    }

    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            bail!("DATABASE_URL must not be empty");
        }

        if self.batch_size == 0 {
            bail!("BATCH_SIZE must be positive");
        }

        if self.max_buffer_size == 0 {
            bail!("MAX_BUFFER_SIZE must be positive");
        }

        if self.batch_size > self.max_buffer_size {
            bail!(
                "BATCH_SIZE ({}) must not exceed MAX_BUFFER_SIZE ({})",
                self.batch_size,
                self.max_buffer_size,
            );
        }

        if self.batch_timeout.is_zero() {
            bail!("BATCH_TIMEOUT must be positive");
        }

        if self.health_check_interval.is_zero() {
            bail!("HEALTH_CHECK_INTERVAL must be positive");
        }

        Ok(())
    }
}

// --- Environment helpers ---

fn env_string(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default,
    }
}

fn env_parse<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(key, value = %value, %default, "unparseable environment value, using default");
                default
            }
        },
        _ => default,
    }
}

fn env_duration(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => match humantime::parse_duration(&value) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(key, value = %value, "unparseable duration, using default");
                default
            }
        },
        _ => default,
    }
}
