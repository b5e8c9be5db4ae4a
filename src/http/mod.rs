use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::ingest::buffer::IngestBuffer;
use crate::ingest::writer::BatchWriter;
use crate::ingest::Sample;
use crate::monitor::HealthState;
use crate::wal::Wal;

/// Maximum satellite identifier length in code points.
const MAX_SATELLITE_ID_LEN: usize = 50;

/// Shared state for the axum handlers.
pub struct AppState {
    pub buffer: Arc<IngestBuffer>,
    pub writer: Arc<BatchWriter>,
    pub wal: Option<Arc<Wal>>,
    pub breaker: Arc<CircuitBreaker>,
    pub health: Arc<HealthState>,
}

/// Builds the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/telemetry", post(ingest_sample))
        .route("/telemetry/batch", post(ingest_batch))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    satellite_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    database_status: &'static str,
    wal_size_bytes: u64,
    wal_record_count: usize,
    buffer_size: usize,
    circuit_breaker: &'static str,
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message })).into_response()
}

fn validate(sample: &Sample) -> Result<(), String> {
    let len = sample.satellite_id.chars().count();
    if len == 0 || len > MAX_SATELLITE_ID_LEN {
        return Err(format!(
            "satellite_id must be 1-{MAX_SATELLITE_ID_LEN} characters, got {len}",
        ));
    }
    Ok(())
}

/// Schedules an asynchronous drain when an admission hit the size trigger.
///
/// The admission path never drains synchronously; the writer's flush gate
/// absorbs redundant triggers.
fn schedule_flush(state: &Arc<AppState>) {
    let writer = Arc::clone(&state.writer);
    tokio::spawn(async move {
        writer.flush().await;
    });
}

/// POST /telemetry - admit a single sample.
async fn ingest_sample(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Sample>, JsonRejection>,
) -> Response {
    let Json(sample) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    if let Err(message) = validate(&sample) {
        return bad_request(message);
    }

    let satellite_id = sample.satellite_id.clone();
    match state.buffer.admit(sample) {
        Ok(reached_trigger) => {
            if reached_trigger {
                schedule_flush(&state);
            }

            (
                StatusCode::ACCEPTED,
                Json(IngestResponse {
                    status: "accepted",
                    satellite_id: Some(satellite_id),
                    count: None,
                }),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// POST /telemetry/batch - admit an array of samples.
///
/// Points are admitted one by one; per-point failures are logged and skipped
/// so a full buffer mid-array does not reject the rest.
async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<Sample>>, JsonRejection>,
) -> Response {
    let Json(samples) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let mut accepted = 0usize;
    let mut reached_trigger = false;

    for (idx, sample) in samples.into_iter().enumerate() {
        if let Err(message) = validate(&sample) {
            warn!(index = idx, reason = %message, "skipping invalid batch sample");
            continue;
        }

        match state.buffer.admit(sample) {
            Ok(trigger) => {
                accepted += 1;
                reached_trigger |= trigger;
            }
            Err(e) => {
                warn!(index = idx, error = %e, "failed to admit batch sample");
            }
        }
    }

    if reached_trigger {
        schedule_flush(&state);
    }

    (
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "accepted",
            satellite_id: None,
            count: Some(accepted),
        }),
    )
        .into_response()
}

/// GET /health - durability-layer introspection.
///
/// `database_status` reflects the monitor's cached probe result; WAL and
/// buffer figures are read live.
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let db_healthy = state.health.is_healthy();

    let (wal_size_bytes, wal_record_count) = match &state.wal {
        Some(wal) => (wal.size(), wal.count().unwrap_or(0)),
        None => (0, 0),
    };

    let body = HealthResponse {
        status: if db_healthy { "healthy" } else { "degraded" },
        timestamp: Utc::now().to_rfc3339(),
        database_status: if db_healthy { "up" } else { "down" },
        wal_size_bytes,
        wal_record_count,
        buffer_size: state.buffer.len(),
        circuit_breaker: state.breaker.state().as_str(),
    };

    let status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_reasonable_ids() {
        let sample = Sample::for_test("SAT-01", 50.0, 100.0, -60.0);
        assert!(validate(&sample).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let sample = Sample::for_test("", 50.0, 100.0, -60.0);
        assert!(validate(&sample).is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_id() {
        let sample = Sample::for_test(&"x".repeat(51), 50.0, 100.0, -60.0);
        assert!(validate(&sample).is_err());

        let sample = Sample::for_test(&"x".repeat(50), 50.0, 100.0, -60.0);
        assert!(validate(&sample).is_ok());
    }

    #[test]
    fn test_validate_counts_code_points_not_bytes() {
        // 50 two-byte code points: valid despite 100 bytes.
        let sample = Sample::for_test(&"é".repeat(50), 50.0, 100.0, -60.0);
        assert!(validate(&sample).is_ok());
    }
}
