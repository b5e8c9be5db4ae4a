use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::store::Store;
use crate::wal::Wal;

use super::buffer::IngestBuffer;
use super::Sample;

/// Retry and fallback tuning for the batched writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Store attempts per batch before falling back to the WAL.
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_delay: Duration,
    /// Deadline for a single store attempt.
    pub flush_timeout: Duration,
    /// Advisory WAL size bound; exceeding it is logged, not enforced.
    pub wal_max_size: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(10),
            wal_max_size: 100 * 1024 * 1024,
        }
    }
}

/// Drains the ingest buffer into the store in batches.
///
/// A batch that cannot be written after `max_retries` attempts (or that the
/// circuit breaker refuses) is appended to the WAL instead. The only path
/// that drops data is a batch with no usable WAL, and it is logged as such.
pub struct BatchWriter {
    buffer: Arc<IngestBuffer>,
    store: Arc<Store>,
    wal: Option<Arc<Wal>>,
    breaker: Arc<CircuitBreaker>,
    cfg: WriterConfig,
    /// Non-reentrance gate: at most one flush in flight per buffer.
    flush_gate: tokio::sync::Mutex<()>,
}

impl BatchWriter {
    pub fn new(
        buffer: Arc<IngestBuffer>,
        store: Arc<Store>,
        wal: Option<Arc<Wal>>,
        breaker: Arc<CircuitBreaker>,
        cfg: WriterConfig,
    ) -> Self {
        Self {
            buffer,
            store,
            wal,
            breaker,
            cfg,
            flush_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Spawns the periodic drain loop. On cancellation the loop performs one
    /// final flush before the task exits.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.final_flush().await;
                        return;
                    }
                    _ = ticker.tick() => {
                        self.flush().await;
                    }
                }
            }
        })
    }

    /// Drains the buffer and writes the batch.
    ///
    /// Skips silently when another flush is already in flight; the running
    /// flush (or the next tick) will pick up the extra records.
    pub async fn flush(&self) {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            return;
        };

        let batch = self.buffer.drain();
        if batch.is_empty() {
            return;
        }

        self.flush_with_retry(batch).await;
    }

    /// Shutdown flush: waits for any in-flight flush, then drains the rest.
    async fn final_flush(&self) {
        let _gate = self.flush_gate.lock().await;

        let batch = self.buffer.drain();
        if batch.is_empty() {
            return;
        }

        info!(records = batch.len(), "final flush on shutdown");
        self.flush_with_retry(batch).await;
    }

    async fn flush_with_retry(&self, batch: Vec<Sample>) {
        for attempt in 0..self.cfg.max_retries {
            if !self.breaker.allow() {
                info!(
                    records = batch.len(),
                    "circuit breaker open, routing batch to WAL",
                );
                self.fall_back_to_wal(&batch);
                return;
            }

            let started = Instant::now();
            let result =
                tokio::time::timeout(self.cfg.flush_timeout, self.store.insert_batch(&batch)).await;

            match result {
                Ok(Ok(rows)) => {
                    self.breaker.record_success();
                    let elapsed = started.elapsed();
                    debug!(
                        rows,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "flushed batch to store",
                    );
                    return;
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure();
                    warn!(attempt = attempt + 1, error = %e, "flush attempt failed");
                }
                Err(_) => {
                    self.breaker.record_failure();
                    warn!(
                        attempt = attempt + 1,
                        timeout_ms = self.cfg.flush_timeout.as_millis() as u64,
                        "flush attempt timed out",
                    );
                }
            }

            if attempt + 1 < self.cfg.max_retries {
                tokio::time::sleep(backoff_delay(self.cfg.retry_delay, attempt)).await;
            }
        }

        warn!(
            attempts = self.cfg.max_retries,
            records = batch.len(),
            "all flush attempts failed, routing batch to WAL",
        );
        self.fall_back_to_wal(&batch);
    }

    /// Appends the batch to the WAL in order. A missing WAL or a failed
    /// append drops the batch; this is the only data-loss path.
    fn fall_back_to_wal(&self, batch: &[Sample]) {
        let Some(wal) = &self.wal else {
            error!(
                records = batch.len(),
                "data loss: no WAL configured, dropping batch",
            );
            return;
        };

        for record in batch {
            if let Err(e) = wal.append(record) {
                error!(
                    error = %e,
                    records = batch.len(),
                    "data loss: WAL append failed, dropping batch",
                );
                return;
            }
        }

        info!(records = batch.len(), "wrote batch to WAL");

        let size = wal.size();
        if size > self.cfg.wal_max_size {
            warn!(
                size_bytes = size,
                max_bytes = self.cfg.wal_max_size,
                "WAL exceeds configured maximum size",
            );
        }
    }
}

/// Exponential backoff with symmetric uniform jitter of ±20%.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let delay = base.saturating_mul(1u32 << attempt.min(16));
    let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
    delay.mul_f64(1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::breaker::BreakerState;
    use crate::ingest::AnomalyThresholds;
    use crate::store::MemStore;

    fn thresholds() -> AnomalyThresholds {
        AnomalyThresholds {
            battery_min_percent: 10.0,
            storage_max_mb: 95_000.0,
            signal_min_dbm: -100.0,
        }
    }

    fn writer_with(
        mem: &MemStore,
        wal: Option<Arc<Wal>>,
        breaker_threshold: u32,
        max_retries: u32,
    ) -> (Arc<IngestBuffer>, Arc<CircuitBreaker>, BatchWriter) {
        let buffer = Arc::new(IngestBuffer::new(10_000, 1_000, thresholds()));
        let breaker = Arc::new(CircuitBreaker::new(
            breaker_threshold,
            Duration::from_secs(30),
        ));
        let writer = BatchWriter::new(
            Arc::clone(&buffer),
            Arc::new(Store::Mem(mem.clone())),
            wal,
            Arc::clone(&breaker),
            WriterConfig {
                max_retries,
                retry_delay: Duration::from_millis(1),
                flush_timeout: Duration::from_secs(1),
                ..WriterConfig::default()
            },
        );
        (buffer, breaker, writer)
    }

    #[test]
    fn test_backoff_delay_doubles_with_symmetric_jitter() {
        let base = Duration::from_millis(100);
        for attempt in 0..4u32 {
            let nominal = 100u64 << attempt;
            let low = Duration::from_millis(nominal * 8 / 10 - 1);
            let high = Duration::from_millis(nominal * 12 / 10 + 1);
            for _ in 0..50 {
                let d = backoff_delay(base, attempt);
                assert!(d >= low, "attempt {attempt}: {d:?} below jitter floor");
                assert!(d <= high, "attempt {attempt}: {d:?} above jitter ceiling");
            }
        }
    }

    #[tokio::test]
    async fn test_flush_writes_batch_to_store() {
        let mem = MemStore::new();
        let (buffer, breaker, writer) = writer_with(&mem, None, 3, 5);

        buffer
            .admit(Sample::for_test("SAT-1", 50.0, 100.0, -60.0))
            .expect("admit");
        buffer
            .admit(Sample::for_test("SAT-2", 60.0, 200.0, -70.0))
            .expect("admit");

        writer.flush().await;

        assert_eq!(mem.rows().len(), 2);
        assert!(buffer.is_empty());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_flush_on_empty_buffer_is_noop() {
        let mem = MemStore::new();
        let (_buffer, _breaker, writer) = writer_with(&mem, None, 3, 5);

        writer.flush().await;
        assert!(mem.rows().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back_to_wal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wal = Arc::new(Wal::open(dir.path().join("data.wal")).expect("wal"));

        let mem = MemStore::new();
        mem.set_fail_writes(true);
        let (buffer, breaker, writer) = writer_with(&mem, Some(Arc::clone(&wal)), 10, 2);

        buffer
            .admit(Sample::for_test("SAT-1", 50.0, 100.0, -60.0))
            .expect("admit");
        writer.flush().await;

        assert!(mem.rows().is_empty());
        assert_eq!(wal.count().expect("count"), 1);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits_to_wal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wal = Arc::new(Wal::open(dir.path().join("data.wal")).expect("wal"));

        let mem = MemStore::new();
        // Healthy store, but the breaker is already open: no attempt is made.
        let (buffer, breaker, writer) = writer_with(&mem, Some(Arc::clone(&wal)), 1, 5);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        buffer
            .admit(Sample::for_test("SAT-1", 50.0, 100.0, -60.0))
            .expect("admit");
        writer.flush().await;

        assert!(mem.rows().is_empty());
        assert_eq!(wal.count().expect("count"), 1);
    }

    #[tokio::test]
    async fn test_wal_preserves_admission_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wal = Arc::new(Wal::open(dir.path().join("data.wal")).expect("wal"));

        let mem = MemStore::new();
        mem.set_fail_writes(true);
        let (buffer, _breaker, writer) = writer_with(&mem, Some(Arc::clone(&wal)), 10, 1);

        for i in 0..5 {
            buffer
                .admit(Sample::for_test(&format!("SAT-{i}"), 50.0, 100.0, -60.0))
                .expect("admit");
        }
        writer.flush().await;

        let ids: Vec<String> = wal
            .read_all()
            .expect("read")
            .into_iter()
            .map(|s| s.satellite_id)
            .collect();
        let expected: Vec<String> = (0..5).map(|i| format!("SAT-{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_missing_wal_drops_batch() {
        let mem = MemStore::new();
        mem.set_fail_writes(true);
        let (buffer, _breaker, writer) = writer_with(&mem, None, 10, 1);

        buffer
            .admit(Sample::for_test("SAT-1", 50.0, 100.0, -60.0))
            .expect("admit");
        writer.flush().await;

        // Dropped on the floor; the process keeps running.
        assert!(mem.rows().is_empty());
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_success_closes_breaker_from_half_open() {
        let mem = MemStore::new();
        mem.set_fail_writes(true);

        let buffer = Arc::new(IngestBuffer::new(10_000, 1_000, thresholds()));
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_millis(20)));
        let writer = BatchWriter::new(
            Arc::clone(&buffer),
            Arc::new(Store::Mem(mem.clone())),
            None,
            Arc::clone(&breaker),
            WriterConfig {
                max_retries: 1,
                retry_delay: Duration::from_millis(1),
                flush_timeout: Duration::from_secs(1),
                ..WriterConfig::default()
            },
        );

        buffer
            .admit(Sample::for_test("SAT-1", 50.0, 100.0, -60.0))
            .expect("admit");
        writer.flush().await;
        assert_eq!(breaker.state(), BreakerState::Open);

        mem.set_fail_writes(false);
        tokio::time::sleep(Duration::from_millis(30)).await;

        buffer
            .admit(Sample::for_test("SAT-2", 50.0, 100.0, -60.0))
            .expect("admit");
        writer.flush().await;

        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(mem.rows().len(), 1);
    }
}
