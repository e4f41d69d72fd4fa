use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use serde::Serialize;

use crate::metric_consts::{
    BATCHES_PROCESSED, BATCH_PROCESSING_TIME, BATCH_SIZE, CONSUMER_LAG, EVENTS_RECEIVED,
    EVENTS_WRITTEN,
};

/// Running totals for the pipeline, written by the consumer loop and read
/// concurrently by the metrics streamer. Plain atomics are enough: there is a
/// single writer, and readers only ever need a point-in-time view.
///
/// Everything is also mirrored into the process-wide prometheus recorder, so
/// the same numbers show up on `/metrics`.
pub struct PipelineStats {
    received: AtomicU64,
    written: AtomicU64,
    latency_count: AtomicU64,
    latency_total_nanos: AtomicU64,
    last_lag: AtomicI64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of [`PipelineStats`], in the shape the live stream
/// serializes. Counters never decrease across snapshots within one process
/// lifetime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub received_total: u64,
    pub written_total: u64,
    pub avg_processing_ms: f64,
    pub lag: i64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            written: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_total_nanos: AtomicU64::new(0),
            // Lag is unknown until the first batch refreshes it
            last_lag: AtomicI64::new(-1),
        }
    }

    /// Record one processed batch: how many records came in, how many rows the
    /// store actually wrote, and how long the whole cycle took.
    pub fn record_batch(&self, received: usize, written: u64, elapsed: Duration) {
        if received > 0 {
            self.received.fetch_add(received as u64, Ordering::Relaxed);
            counter!(EVENTS_RECEIVED).increment(received as u64);
        }
        if written > 0 {
            self.written.fetch_add(written, Ordering::Relaxed);
            counter!(EVENTS_WRITTEN).increment(written);
        }
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_total_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);

        counter!(BATCHES_PROCESSED).increment(1);
        histogram!(BATCH_SIZE).record(received as f64);
        histogram!(BATCH_PROCESSING_TIME).record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn update_lag(&self, lag: i64) {
        self.last_lag.store(lag, Ordering::Relaxed);
        gauge!(CONSUMER_LAG).set(lag as f64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let count = self.latency_count.load(Ordering::Relaxed);
        let total_nanos = self.latency_total_nanos.load(Ordering::Relaxed);
        let avg_processing_ms = if count == 0 {
            0.0
        } else {
            total_nanos as f64 / count as f64 / 1_000_000.0
        };

        StatsSnapshot {
            received_total: self.received.load(Ordering::Relaxed),
            written_total: self.written.load(Ordering::Relaxed),
            avg_processing_ms,
            lag: self.last_lag.load(Ordering::Relaxed),
        }
    }
}
