use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use metrics::gauge;
use serde::Serialize;
use tracing::{error, info};

use crate::metric_consts::STREAM_SUBSCRIBERS;
use crate::stats::{PipelineStats, StatsSnapshot};

const PUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct StreamedSnapshot {
    #[serde(flatten)]
    snapshot: StatsSnapshot,
    ts: String,
}

/// One `metrics` event body: the snapshot plus the time it was taken.
pub fn metrics_event_payload(snapshot: StatsSnapshot, ts: DateTime<Utc>) -> Option<String> {
    let streamed = StreamedSnapshot {
        snapshot,
        ts: ts.to_rfc3339(),
    };
    match serde_json::to_string(&streamed) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(error = %e, "failed to serialize metrics snapshot");
            None
        }
    }
}

struct SubscriberGuard;

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        gauge!(STREAM_SUBSCRIBERS).decrement(1.0);
        info!("metrics stream subscriber disconnected");
    }
}

/// `GET /metrics/stream`: push one aggregator snapshot per second to this
/// subscriber, starting immediately. Every subscriber owns its own stream and
/// interval; when the client goes away axum drops the stream, the guard runs,
/// and nothing else is affected.
pub async fn metrics_stream(
    State(stats): State<Arc<PipelineStats>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("metrics stream subscriber connected");
    gauge!(STREAM_SUBSCRIBERS).increment(1.0);

    let stream = async_stream::stream! {
        let _guard = SubscriberGuard;
        let mut interval = tokio::time::interval(PUSH_INTERVAL);
        loop {
            interval.tick().await;
            if let Some(payload) = metrics_event_payload(stats.snapshot(), Utc::now()) {
                yield Ok(Event::default().event("metrics").data(payload));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
