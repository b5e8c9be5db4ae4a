pub mod buffer;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single telemetry record from a satellite producer.
///
/// `timestamp` is assigned on admission when the producer leaves it unset.
/// `is_anomaly` is derived by the classifier; any value supplied on the wire
/// is overwritten. The four position fields are optional and round-trip
/// through the WAL without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub satellite_id: String,

    #[serde(default)]
    pub battery_charge_percent: f64,

    #[serde(default)]
    pub storage_usage_mb: f64,

    #[serde(default)]
    pub signal_strength_dbm: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_anomaly: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_km: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_kmph: Option<f64>,
}

/// Threshold configuration for the anomaly classifier.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyThresholds {
    /// Battery charge below this percentage is anomalous.
    pub battery_min_percent: f64,
    /// Storage usage above this many MB is anomalous.
    pub storage_max_mb: f64,
    /// Signal strength below this many dBm is anomalous.
    pub signal_min_dbm: f64,
}

/// Classifies a sample against the configured thresholds.
///
/// Comparisons are strict: a value exactly at a threshold is not anomalous.
/// Every triggering condition emits its own log line; the result is the OR
/// of all three conditions. The sample itself is never rejected or modified.
pub fn classify(sample: &Sample, thresholds: &AnomalyThresholds) -> bool {
    let mut anomaly = false;

    if sample.battery_charge_percent < thresholds.battery_min_percent {
        warn!(
            satellite_id = %sample.satellite_id,
            battery_charge_percent = sample.battery_charge_percent,
            threshold = thresholds.battery_min_percent,
            "anomaly: battery charge critically low",
        );
        anomaly = true;
    }

    if sample.storage_usage_mb > thresholds.storage_max_mb {
        warn!(
            satellite_id = %sample.satellite_id,
            storage_usage_mb = sample.storage_usage_mb,
            threshold = thresholds.storage_max_mb,
            "anomaly: storage usage critically high",
        );
        anomaly = true;
    }

    if sample.signal_strength_dbm < thresholds.signal_min_dbm {
        warn!(
            satellite_id = %sample.satellite_id,
            signal_strength_dbm = sample.signal_strength_dbm,
            threshold = thresholds.signal_min_dbm,
            "anomaly: signal strength critically weak",
        );
        anomaly = true;
    }

    anomaly
}

impl Sample {
    /// Creates a sample with only the required scalar fields set.
    #[cfg(test)]
    pub(crate) fn for_test(satellite_id: &str, battery: f64, storage: f64, signal: f64) -> Self {
        Self {
            satellite_id: satellite_id.to_string(),
            battery_charge_percent: battery,
            storage_usage_mb: storage,
            signal_strength_dbm: signal,
            timestamp: None,
            is_anomaly: false,
            latitude: None,
            longitude: None,
            altitude_km: None,
            velocity_kmph: None,
        }
    }
}
