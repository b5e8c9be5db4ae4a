use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ingest::Sample;

use super::StoreError;

#[derive(Default)]
struct MemInner {
    rows: Mutex<Vec<Sample>>,
    fail_writes: AtomicBool,
    fail_pings: AtomicBool,
}

/// In-memory store backend for tests and local development.
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// assertions and failure injection while the gateway owns another.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the backend name for logging.
    pub fn name(&self) -> &str {
        "mem"
    }

    /// When set, every insert fails without applying any row.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// When set, every ping fails.
    pub fn set_fail_pings(&self, fail: bool) {
        self.inner.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all rows written so far, in insertion order.
    pub fn rows(&self) -> Vec<Sample> {
        self.inner.rows.lock().clone()
    }

    pub async fn insert_batch(&self, batch: &[Sample]) -> Result<u64, StoreError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Injected);
        }

        self.inner.rows.lock().extend_from_slice(batch);
        Ok(batch.len() as u64)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        if self.inner.fail_pings.load(Ordering::SeqCst) {
            return Err(StoreError::Injected);
        }
        Ok(())
    }
}
