use std::fmt::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clickhouse_rs::Pool;
use tracing::info;

use crate::ingest::Sample;

use super::StoreError;

/// ClickHouse-backed telemetry store.
///
/// Each batch is written with one multi-row INSERT statement so the whole
/// batch lands as a single atomic unit.
pub struct ClickHouseStore {
    pool: Pool,
    table: String,
}

impl ClickHouseStore {
    /// Opens the connection pool and verifies connectivity with a ping.
    ///
    /// `url` is a clickhouse-rs TCP DSN (`tcp://[user[:pass]@]host:port/db`);
    /// `max_connections` is appended as the pool upper bound.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let dsn = build_dsn(url, max_connections);
        let pool = Pool::new(dsn);

        let mut handle = pool
            .get_handle()
            .await
            .context("opening ClickHouse connection")?;
        handle.ping().await.context("pinging ClickHouse")?;

        info!(url, "connected to ClickHouse store");

        Ok(Self {
            pool,
            table: "telemetry".to_string(),
        })
    }

    /// Returns the backend name for logging.
    pub fn name(&self) -> &str {
        "clickhouse"
    }

    /// Inserts the batch with a single multi-row INSERT.
    pub async fn insert_batch(&self, batch: &[Sample]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut sql = String::with_capacity(192 + batch.len() * 160);
        let _ = write!(
            sql,
            "INSERT INTO {} (time, satellite_id, battery_charge_percent, \
             storage_usage_mb, signal_strength_dbm, is_anomaly, \
             latitude, longitude, altitude_km, velocity_kmph) VALUES ",
            self.table,
        );

        for (idx, row) in batch.iter().enumerate() {
            if idx > 0 {
                sql.push_str(", ");
            }

            let time = row.timestamp.unwrap_or_else(Utc::now);
            let _ = write!(
                sql,
                "({}, '{}', {}, {}, {}, {}, ",
                format_datetime(time),
                escape_sql(&row.satellite_id),
                row.battery_charge_percent,
                row.storage_usage_mb,
                row.signal_strength_dbm,
                u8::from(row.is_anomaly),
            );
            append_nullable(&mut sql, row.latitude);
            sql.push_str(", ");
            append_nullable(&mut sql, row.longitude);
            sql.push_str(", ");
            append_nullable(&mut sql, row.altitude_km);
            sql.push_str(", ");
            append_nullable(&mut sql, row.velocity_kmph);
            sql.push(')');
        }

        let mut handle = self.pool.get_handle().await?;
        handle.execute(sql.as_str()).await?;

        Ok(batch.len() as u64)
    }

    /// Liveness probe over a pooled connection.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut handle = self.pool.get_handle().await?;
        handle.ping().await?;
        Ok(())
    }
}

/// Appends `pool_max` to the DSN, preserving any options already present.
fn build_dsn(url: &str, max_connections: u32) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}pool_max={max_connections}")
}

/// Formats a timestamp as a ClickHouse DateTime64(3) literal.
fn format_datetime(t: DateTime<Utc>) -> String {
    format!("'{}'", t.format("%Y-%m-%d %H:%M:%S%.3f"))
}

/// Escapes a string value for SQL insertion (single-quote escaping).
fn escape_sql(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn append_nullable(buf: &mut String, value: Option<f64>) {
    match value {
        Some(v) => {
            let _ = write!(buf, "{v}");
        }
        None => buf.push_str("NULL"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_dsn_appends_pool_max() {
        assert_eq!(
            build_dsn("tcp://localhost:9000/satgate", 50),
            "tcp://localhost:9000/satgate?pool_max=50"
        );
    }

    #[test]
    fn test_build_dsn_preserves_existing_options() {
        assert_eq!(
            build_dsn("tcp://ch:9000/db?compression=lz4", 10),
            "tcp://ch:9000/db?compression=lz4&pool_max=10"
        );
    }

    #[test]
    fn test_format_datetime() {
        let t = DateTime::<Utc>::from_timestamp(0, 0).expect("epoch");
        assert_eq!(format_datetime(t), "'1970-01-01 00:00:00.000'");
    }

    #[test]
    fn test_escape_sql() {
        assert_eq!(escape_sql("SAT-01"), "SAT-01");
        assert_eq!(escape_sql("it's"), "it\\'s");
        assert_eq!(escape_sql("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_append_nullable() {
        let mut buf = String::new();
        append_nullable(&mut buf, Some(12.5));
        buf.push(' ');
        append_nullable(&mut buf, None);
        assert_eq!(buf, "12.5 NULL");
    }
}
