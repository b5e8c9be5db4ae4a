//! Satellite telemetry ingestion gateway.
//!
//! Producers post timestamped device health samples over HTTP; the gateway
//! validates, classifies, accumulates into bounded batches, and persists
//! them atomically to a time-series store. When the store fails, batches
//! are routed to a durable write-ahead log and replayed transparently once
//! the store recovers, so an accepted record is never lost.

pub mod breaker;
pub mod config;
pub mod gateway;
pub mod http;
pub mod ingest;
pub mod monitor;
pub mod store;
pub mod wal;
