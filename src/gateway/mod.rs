use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::http::{self, AppState};
use crate::ingest::buffer::IngestBuffer;
use crate::ingest::writer::{BatchWriter, WriterConfig};
use crate::monitor::{HealthMonitor, HealthState, MonitorConfig};
use crate::store::Store;
use crate::wal::Wal;

/// Gateway wires the ingest pipeline together and owns its task lifecycles.
///
/// The buffer, WAL, breaker and store are process-scoped resources created
/// here at startup and released by `stop` in reverse order.
pub struct Gateway {
    cfg: Config,
    buffer: Arc<IngestBuffer>,
    writer: Arc<BatchWriter>,
    monitor: Arc<HealthMonitor>,
    wal: Option<Arc<Wal>>,
    breaker: Arc<CircuitBreaker>,
    health: Arc<HealthState>,
    cancel: CancellationToken,
    writer_task: Option<JoinHandle<()>>,
    monitor_task: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Builds the pipeline from configuration and a connected store.
    ///
    /// A WAL that cannot be opened is downgraded to a warning: the gateway
    /// runs without fallback rather than refusing to start.
    pub fn new(cfg: Config, store: Arc<Store>) -> Self {
        info!(store = store.name(), "wiring ingest pipeline");

        let wal = match Wal::open(&cfg.wal_path) {
            Ok(wal) => {
                info!(path = %cfg.wal_path.display(), "WAL opened");
                match wal.count() {
                    Ok(count) if count > 0 => {
                        info!(
                            records = count,
                            "found existing WAL records, they will be replayed once the store is healthy",
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "could not count existing WAL records"),
                }
                Some(Arc::new(wal))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %cfg.wal_path.display(),
                    "failed to open WAL, data may be lost if the store becomes unavailable",
                );
                None
            }
        };

        let buffer = Arc::new(IngestBuffer::new(
            cfg.max_buffer_size,
            cfg.batch_size,
            cfg.anomaly,
        ));

        let breaker = Arc::new(CircuitBreaker::new(
            cfg.circuit_breaker_threshold,
            cfg.circuit_breaker_timeout,
        ));

        let writer = Arc::new(BatchWriter::new(
            Arc::clone(&buffer),
            Arc::clone(&store),
            wal.clone(),
            Arc::clone(&breaker),
            WriterConfig {
                max_retries: cfg.max_retries,
                retry_delay: cfg.retry_delay,
                wal_max_size: cfg.wal_max_size,
                ..WriterConfig::default()
            },
        ));

        let health = Arc::new(HealthState::new());
        let monitor = Arc::new(HealthMonitor::new(
            store,
            wal.clone(),
            Arc::clone(&health),
            MonitorConfig::default(),
        ));

        Self {
            cfg,
            buffer,
            writer,
            monitor,
            wal,
            breaker,
            health,
            cancel: CancellationToken::new(),
            writer_task: None,
            monitor_task: None,
        }
    }

    /// Starts the writer ticker and the health monitor.
    pub fn start(&mut self) {
        self.writer_task = Some(
            Arc::clone(&self.writer).spawn(self.cfg.batch_timeout, self.cancel.child_token()),
        );
        self.monitor_task = Some(
            Arc::clone(&self.monitor)
                .spawn(self.cfg.health_check_interval, self.cancel.child_token()),
        );

        info!(
            batch_size = self.cfg.batch_size,
            batch_timeout_ms = self.cfg.batch_timeout.as_millis() as u64,
            max_retries = self.cfg.max_retries,
            circuit_breaker_threshold = self.cfg.circuit_breaker_threshold,
            max_buffer_size = self.cfg.max_buffer_size,
            "gateway started",
        );
    }

    /// Builds the HTTP router backed by this gateway.
    pub fn router(&self) -> Router {
        http::router(Arc::new(AppState {
            buffer: Arc::clone(&self.buffer),
            writer: Arc::clone(&self.writer),
            wal: self.wal.clone(),
            breaker: Arc::clone(&self.breaker),
            health: Arc::clone(&self.health),
        }))
    }

    /// Gracefully stops the pipeline.
    ///
    /// Order: stop admissions, cancel the tickers, wait for the writer's
    /// final flush, wait for the monitor, close the WAL. Callers bound the
    /// whole sequence with the configured shutdown deadline.
    pub async fn stop(&mut self) {
        self.buffer.stop_accepting();
        self.cancel.cancel();

        if let Some(task) = self.writer_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "writer task join failed");
            }
        }

        if let Some(task) = self.monitor_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "monitor task join failed");
            }
        }

        if let Some(wal) = &self.wal {
            wal.close();
        }

        info!("gateway stopped");
    }

    /// Current number of buffered samples.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// The WAL handle, when one was opened.
    pub fn wal(&self) -> Option<&Arc<Wal>> {
        self.wal.as_ref()
    }

    /// The circuit breaker guarding the store path.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}
