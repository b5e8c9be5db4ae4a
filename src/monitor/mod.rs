use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::Store;
use crate::wal::Wal;

/// Shared view of the last store probe, read by the health endpoint.
#[derive(Default)]
pub struct HealthState {
    healthy: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the most recent store probe succeeded.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::SeqCst)
    }
}

/// Probe and replay tuning.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Deadline for a single liveness probe.
    pub probe_timeout: Duration,
    /// Records per replay transaction.
    pub replay_batch_size: usize,
    /// Deadline for a single replay transaction.
    pub replay_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            replay_batch_size: 1_000,
            replay_timeout: Duration::from_secs(30),
        }
    }
}

/// Periodically probes the store and replays the WAL once it recovers.
///
/// Replay applies contiguous sub-batches in WAL order; any failed sub-batch
/// aborts the replay without clearing, so the next probe retries everything.
/// Records already written stay in the store, which is why the persistent
/// side of the contract is at-least-once.
pub struct HealthMonitor {
    store: Arc<Store>,
    wal: Option<Arc<Wal>>,
    state: Arc<HealthState>,
    cfg: MonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<Store>,
        wal: Option<Arc<Wal>>,
        state: Arc<HealthState>,
        cfg: MonitorConfig,
    ) -> Self {
        Self {
            store,
            wal,
            state,
            cfg,
        }
    }

    /// Spawns the monitoring loop. The first probe fires immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        self.check().await;
                    }
                }
            }
        })
    }

    /// Runs one probe, updates the cached flag, and replays on success.
    pub async fn check(&self) {
        let result = tokio::time::timeout(self.cfg.probe_timeout, self.store.ping()).await;
        let healthy = matches!(&result, Ok(Ok(())));

        let was_healthy = self.state.set_healthy(healthy);
        if healthy && !was_healthy {
            info!("store is healthy");
        } else if !healthy && was_healthy {
            match result {
                Ok(Err(e)) => warn!(error = %e, "store is unhealthy"),
                _ => warn!(
                    timeout_ms = self.cfg.probe_timeout.as_millis() as u64,
                    "store is unhealthy (probe timed out)",
                ),
            }
        }

        if healthy {
            self.replay_wal().await;
        }
    }

    /// Replays all WAL records into the store, then clears the WAL.
    pub async fn replay_wal(&self) {
        let Some(wal) = &self.wal else {
            return;
        };

        let records = match wal.read_all() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to read WAL for replay");
                return;
            }
        };

        if records.is_empty() {
            return;
        }

        info!(records = records.len(), "replaying WAL into store");

        let mut replayed = 0usize;
        for chunk in records.chunks(self.cfg.replay_batch_size) {
            let result =
                tokio::time::timeout(self.cfg.replay_timeout, self.store.insert_batch(chunk)).await;

            match result {
                Ok(Ok(_)) => {
                    replayed += chunk.len();
                    debug!(replayed, total = records.len(), "replayed WAL sub-batch");
                }
                Ok(Err(e)) => {
                    // WAL is left intact; the next probe retries from the top.
                    warn!(error = %e, replayed, "WAL replay failed, will retry");
                    return;
                }
                Err(_) => {
                    warn!(replayed, "WAL replay timed out, will retry");
                    return;
                }
            }
        }

        if let Err(e) = wal.clear() {
            warn!(error = %e, "failed to clear WAL after replay");
            return;
        }

        info!(records = replayed, "replayed and cleared WAL");
    }
}
