use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Datelike, Timelike, Utc};
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info};

use crate::metric_consts::{
    ARCHIVED_PAYLOADS, ARCHIVE_BUFFERED_PAYLOADS, ARCHIVE_FLUSHES, ARCHIVE_FLUSH_FAILURES,
    ARCHIVE_FLUSH_TIME,
};

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("failed to put object: {0}")]
    PutFailed(String),
}

/// Cold storage seam. The production impl wraps the AWS SDK; tests use the
/// in-memory store from `test_utils`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_string(
        &self,
        bucket: &str,
        key: &str,
        body: String,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;
}

pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Credentials come from the default AWS chain (env vars, IRSA, instance
    /// profile). Custom endpoints (MinIO, localstack) need path-style access.
    pub async fn new(region: String, endpoint: Option<String>) -> Self {
        let mut config_loader =
            aws_config::defaults(aws_config::BehaviorVersion::latest()).region(Region::new(region));

        if let Some(endpoint) = endpoint.clone() {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        let mut config = Builder::from(&config_loader.load().await);
        if endpoint.is_some() {
            config = config.force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(config.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_string(
        &self,
        bucket: &str,
        key: &str,
        body: String,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body.into_bytes()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ObjectStoreError::PutFailed(e.to_string()))?;
        Ok(())
    }
}

struct ArchiveBuffer {
    payloads: Vec<String>,
    last_flush: Instant,
}

/// Accumulates raw event payloads and writes them out as one newline-delimited
/// object per flush, partitioned by UTC date and hour.
///
/// Flushing happens inside `append`, under the same lock that guards the
/// buffer: the size check and the flush are one critical section, so
/// concurrent appenders can neither double-flush nor lose a payload. There is
/// deliberately no background timer; if traffic stops, a partial buffer sits
/// until the next append or until `flush` is called on shutdown.
pub struct EventArchiver {
    enabled: bool,
    bucket: String,
    batch_size: usize,
    flush_interval: Duration,
    store: Arc<dyn ObjectStore>,
    buffer: Mutex<ArchiveBuffer>,
}

impl EventArchiver {
    pub fn new(
        enabled: bool,
        bucket: String,
        batch_size: usize,
        flush_interval: Duration,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            enabled,
            bucket,
            batch_size,
            flush_interval,
            store,
            buffer: Mutex::new(ArchiveBuffer {
                payloads: Vec::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Append one raw payload, flushing first if the buffer is full or stale.
    /// A no-op when archiving is disabled.
    pub async fn append(&self, raw: &str) {
        if !self.enabled {
            return;
        }

        let mut buffer = self.buffer.lock().await;
        buffer.payloads.push(raw.to_owned());
        gauge!(ARCHIVE_BUFFERED_PAYLOADS).set(buffer.payloads.len() as f64);

        if buffer.payloads.len() >= self.batch_size
            || buffer.last_flush.elapsed() > self.flush_interval
        {
            self.flush_locked(&mut buffer).await;
        }
    }

    /// Flush whatever is buffered, for the shutdown path.
    pub async fn flush(&self) {
        if !self.enabled {
            return;
        }
        let mut buffer = self.buffer.lock().await;
        self.flush_locked(&mut buffer).await;
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.payloads.len()
    }

    async fn flush_locked(&self, buffer: &mut ArchiveBuffer) {
        if buffer.payloads.is_empty() {
            return;
        }

        let key = object_key(Utc::now());
        let body = buffer.payloads.join("\n");
        let count = buffer.payloads.len();

        let start = Instant::now();
        match self
            .store
            .put_string(&self.bucket, &key, body, "application/json")
            .await
        {
            Ok(()) => {
                histogram!(ARCHIVE_FLUSH_TIME).record(start.elapsed().as_millis() as f64);
                counter!(ARCHIVE_FLUSHES).increment(1);
                counter!(ARCHIVED_PAYLOADS).increment(count as u64);
                info!(count, key, "archived events to s3://{}/{}", self.bucket, key);
                buffer.payloads.clear();
                buffer.last_flush = Instant::now();
                gauge!(ARCHIVE_BUFFERED_PAYLOADS).set(0.0);
            }
            Err(e) => {
                // Keep the buffer so the payloads are retried on the next
                // flush trigger. Under a sustained outage this grows without
                // bound, which we prefer over dropping data silently.
                counter!(ARCHIVE_FLUSH_FAILURES).increment(1);
                error!(error = %e, count, "failed to archive events, retaining buffer");
            }
        }
    }
}

fn object_key(now: DateTime<Utc>) -> String {
    format!(
        "events/{}/{:02}/{:02}/{:02}/events-{}.json",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryObjectStore;
    use chrono::TimeZone;

    fn archiver(enabled: bool, batch_size: usize, store: Arc<MemoryObjectStore>) -> EventArchiver {
        EventArchiver::new(
            enabled,
            "archive-bucket".to_string(),
            batch_size,
            Duration::from_secs(60),
            store,
        )
    }

    #[test]
    fn object_keys_are_partitioned_by_utc_hour() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 15, 0).unwrap();
        let key = object_key(at);
        assert_eq!(
            key,
            format!("events/2024/03/07/09/events-{}.json", at.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn reaching_the_threshold_triggers_exactly_one_flush() {
        let store = Arc::new(MemoryObjectStore::new());
        let archiver = archiver(true, 3, store.clone());

        for i in 0..3 {
            archiver.append(&format!("{{\"n\":{i}}}")).await;
        }

        let puts = store.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].bucket, "archive-bucket");
        assert_eq!(puts[0].content_type, "application/json");
        assert_eq!(puts[0].body, "{\"n\":0}\n{\"n\":1}\n{\"n\":2}");
        assert_eq!(archiver.buffered().await, 0);
    }

    #[tokio::test]
    async fn below_the_threshold_nothing_flushes() {
        let store = Arc::new(MemoryObjectStore::new());
        let archiver = archiver(true, 3, store.clone());

        archiver.append("{}").await;
        archiver.append("{}").await;

        assert!(store.puts().is_empty());
        assert_eq!(archiver.buffered().await, 2);
    }

    #[tokio::test]
    async fn disabled_archiver_neither_buffers_nor_writes() {
        let store = Arc::new(MemoryObjectStore::new());
        let archiver = archiver(false, 1, store.clone());

        for _ in 0..10 {
            archiver.append("{}").await;
        }
        archiver.flush().await;

        assert!(store.puts().is_empty());
        assert_eq!(archiver.buffered().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_buffer_flushes_on_next_append() {
        let store = Arc::new(MemoryObjectStore::new());
        let archiver = EventArchiver::new(
            true,
            "archive-bucket".to_string(),
            1000,
            Duration::from_secs(60),
            store.clone(),
        );

        archiver.append("first").await;
        assert!(store.puts().is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;

        // Nothing happens until a new append observes the stale buffer
        assert!(store.puts().is_empty());

        archiver.append("second").await;
        let puts = store.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].body, "first\nsecond");
        assert_eq!(archiver.buffered().await, 0);
    }

    #[tokio::test]
    async fn failed_flush_retains_the_buffer_for_retry() {
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_next_puts(1);
        let archiver = archiver(true, 2, store.clone());

        archiver.append("a").await;
        archiver.append("b").await;

        // First flush failed, everything still buffered
        assert!(store.puts().is_empty());
        assert_eq!(archiver.buffered().await, 2);

        archiver.append("c").await;
        let puts = store.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].body, "a\nb\nc");
        assert_eq!(archiver.buffered().await, 0);
    }

    #[tokio::test]
    async fn shutdown_flush_drains_a_partial_buffer() {
        let store = Arc::new(MemoryObjectStore::new());
        let archiver = archiver(true, 100, store.clone());

        archiver.append("tail").await;
        archiver.flush().await;

        assert_eq!(store.puts().len(), 1);
        assert_eq!(archiver.buffered().await, 0);
    }
}
