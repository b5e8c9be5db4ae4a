pub mod clickhouse;
pub mod mem;

use thiserror::Error;

use crate::ingest::Sample;

pub use self::clickhouse::ClickHouseStore;
pub use self::mem::MemStore;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("clickhouse: {0}")]
    ClickHouse(#[from] clickhouse_rs::errors::Error),
    #[error("injected failure")]
    Injected,
}

/// Downstream time-series store.
///
/// Uses enum dispatch rather than trait objects for zero-cost async dispatch.
/// The in-memory backend exists for tests and local development; it honors
/// the same batch-atomicity contract as the ClickHouse backend.
pub enum Store {
    ClickHouse(ClickHouseStore),
    Mem(MemStore),
}

impl Store {
    /// Returns the backend name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::ClickHouse(s) => s.name(),
            Self::Mem(s) => s.name(),
        }
    }

    /// Writes a batch of samples as a single atomic unit.
    ///
    /// Either every row of the batch becomes visible or none does; on error
    /// the whole batch counts as not written. Returns the row count.
    pub async fn insert_batch(&self, batch: &[Sample]) -> Result<u64, StoreError> {
        match self {
            Self::ClickHouse(s) => s.insert_batch(batch).await,
            Self::Mem(s) => s.insert_batch(batch).await,
        }
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::ClickHouse(s) => s.ping().await,
            Self::Mem(s) => s.ping().await,
        }
    }
}
