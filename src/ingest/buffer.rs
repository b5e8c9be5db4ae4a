use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use super::{classify, AnomalyThresholds, Sample};

/// Admission errors surfaced to producers.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("buffer at maximum capacity ({0})")]
    BufferFull(usize),
    #[error("gateway is shutting down")]
    ShuttingDown,
}

/// Bounded FIFO buffer between admission and the batched writer.
///
/// Admission assigns the server timestamp when absent, classifies the
/// sample, and enqueues it; the buffer mutex is held only for the length
/// check and append, never across I/O.
pub struct IngestBuffer {
    samples: Mutex<Vec<Sample>>,
    max_size: usize,
    batch_size: usize,
    thresholds: AnomalyThresholds,
    accepting: AtomicBool,
}

impl IngestBuffer {
    /// Creates a buffer with hard capacity `max_size` that reports a drain
    /// trigger once `batch_size` samples are queued.
    pub fn new(max_size: usize, batch_size: usize, thresholds: AnomalyThresholds) -> Self {
        Self {
            samples: Mutex::new(Vec::with_capacity(batch_size.min(max_size))),
            max_size,
            batch_size,
            thresholds,
            accepting: AtomicBool::new(true),
        }
    }

    /// Admits one sample.
    ///
    /// Returns `Ok(true)` when the post-append size reached the batch-size
    /// trigger, in which case the caller should schedule an asynchronous
    /// drain. Admission past capacity fails without mutating the buffer.
    pub fn admit(&self, mut sample: Sample) -> Result<bool, AdmitError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(AdmitError::ShuttingDown);
        }

        if sample.timestamp.is_none() {
            sample.timestamp = Some(Utc::now());
        }
        sample.is_anomaly = classify(&sample, &self.thresholds);

        let mut samples = self.samples.lock();
        if samples.len() >= self.max_size {
            warn!(
                capacity = self.max_size,
                satellite_id = %sample.satellite_id,
                "ingest buffer full, rejecting sample",
            );
            return Err(AdmitError::BufferFull(self.max_size));
        }

        samples.push(sample);
        Ok(samples.len() >= self.batch_size)
    }

    /// Takes the buffered samples, leaving the buffer empty with its
    /// capacity preserved. Returns an empty vec when nothing is queued.
    pub fn drain(&self) -> Vec<Sample> {
        let mut samples = self.samples.lock();
        if samples.is_empty() {
            return Vec::new();
        }

        std::mem::replace(
            &mut *samples,
            Vec::with_capacity(self.batch_size.min(self.max_size)),
        )
    }

    /// Current number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Turns further admissions into `ShuttingDown` errors.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}
