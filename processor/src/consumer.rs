use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::{OffsetHandle, RawRecord, RecvErr, SessionConsumer};
use health::HealthHandle;
use metrics::counter;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::archiver::EventArchiver;
use crate::dead_letter::DeadLetterQueue;
use crate::event::decode_record;
use crate::metric_consts::{EMPTY_RECORDS, RECV_ERRORS};
use crate::retry::RetryPolicy;
use crate::stats::PipelineStats;
use crate::store::{EventWriter, StoreError};

const WATERMARK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub written: u64,
}

/// The per-batch processing steps, kept free of any Kafka types so the whole
/// pipeline can be exercised against the in-memory seams.
pub struct BatchPipeline {
    pub writer: Arc<dyn EventWriter>,
    pub archiver: Arc<EventArchiver>,
    pub stats: Arc<PipelineStats>,
}

impl BatchPipeline {
    /// Archive, decode, persist and account for one batch, in that order. Any
    /// store failure aborts before the stats are touched, so a retried batch
    /// is only ever counted once.
    pub async fn process(&self, records: &[RawRecord]) -> Result<BatchSummary, StoreError> {
        let start = Instant::now();

        for record in records {
            self.archiver.append(&record.payload).await;
        }

        let events: Vec<_> = records
            .iter()
            .map(|record| decode_record(&record.payload))
            .collect();

        let results = self.writer.batch_insert(&events).await?;
        let written: u64 = results.iter().filter(|r| **r >= 0).map(|r| *r as u64).sum();

        self.stats
            .record_batch(records.len(), written, start.elapsed());

        Ok(BatchSummary {
            received: records.len(),
            written,
        })
    }
}

/// Long-lived consumption loop for one partition-group assignment: pull an
/// ordered batch, run it through [`BatchPipeline`] under the retry policy,
/// dead-letter it if the budget runs out, and only then acknowledge offsets.
/// Batches never overlap, so within our partitions acknowledgment of batch N
/// happens before batch N+1 is read.
pub struct PipelineConsumer {
    consumer: SessionConsumer,
    pipeline: BatchPipeline,
    retry: RetryPolicy,
    dead_letters: DeadLetterQueue,
    liveness: HealthHandle,
    batch_size: usize,
    batch_timeout: Duration,
}

impl PipelineConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: SessionConsumer,
        pipeline: BatchPipeline,
        retry: RetryPolicy,
        dead_letters: DeadLetterQueue,
        liveness: HealthHandle,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        Self {
            consumer,
            pipeline,
            retry,
            dead_letters,
            liveness,
            batch_size,
            batch_timeout,
        }
    }

    pub async fn run(&self, shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(topic = self.consumer.topic(), "starting consumer loop");

        loop {
            if *shutdown.borrow() {
                info!("shutdown signal received, stopping consumer loop");
                break;
            }

            self.liveness.report_healthy().await;

            let received = self
                .consumer
                .recv_raw_batch(self.batch_size, self.batch_timeout)
                .await;
            if received.is_empty() {
                continue;
            }

            let mut records = Vec::with_capacity(received.len());
            let mut offsets = Vec::with_capacity(received.len());
            let mut recv_failed = false;
            for item in received {
                match item {
                    Ok((record, offset)) => {
                        records.push(record);
                        offsets.push(offset);
                    }
                    Err(RecvErr::Empty) => {
                        // Offset already stored by the consumer, skip the record
                        counter!(EMPTY_RECORDS).increment(1);
                        warn!("received record with empty payload");
                    }
                    Err(RecvErr::Kafka(e)) => {
                        counter!(RECV_ERRORS).increment(1);
                        error!(error = %e, "kafka receive error");
                        recv_failed = true;
                    }
                }
            }

            if !records.is_empty() {
                self.process_and_ack(records, offsets).await;
            }

            if recv_failed {
                // The connection might be gone, don't spin on it
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        // The in-flight batch was acknowledged above; what's left is whatever
        // the archiver still buffers.
        self.pipeline.archiver.flush().await;
        info!("consumer loop stopped");
    }

    async fn process_and_ack(&self, records: Vec<RawRecord>, offsets: Vec<OffsetHandle>) {
        match self
            .retry
            .retry("batch processing", || self.pipeline.process(&records))
            .await
        {
            Ok(summary) => {
                info!(
                    received = summary.received,
                    written = summary.written,
                    first_offset = records[0].offset,
                    "processed batch"
                );
            }
            Err(e) => {
                error!(
                    error = %e,
                    count = records.len(),
                    "batch failed after retries, redirecting to {}", self.dead_letters.topic()
                );
                counter!(crate::metric_consts::BATCHES_DEAD_LETTERED).increment(1);
                self.dead_letters.publish_batch(&records).await;
            }
        }

        // Acknowledge the whole batch, processed or dead-lettered, so a poison
        // batch cannot stall the partition.
        let mut acked: HashMap<i32, i64> = HashMap::new();
        for offset in offsets {
            let (partition, value) = (offset.partition(), offset.offset());
            if let Err(e) = offset.store() {
                error!(error = %e, partition, offset = value, "failed to store offset");
                continue;
            }
            let entry = acked.entry(partition).or_insert(value);
            *entry = (*entry).max(value);
        }

        self.refresh_lag(&acked);
    }

    /// Last observed consumer lag, from broker watermarks, summed over the
    /// partitions this batch touched.
    fn refresh_lag(&self, acked: &HashMap<i32, i64>) {
        let mut total_lag: i64 = 0;
        for (&partition, &offset) in acked {
            match self.consumer.watermarks(partition, WATERMARK_TIMEOUT) {
                Ok((_, high)) => {
                    total_lag += (high - offset - 1).max(0);
                }
                Err(e) => {
                    warn!(error = %e, partition, "failed to fetch watermarks");
                    return;
                }
            }
        }
        self.pipeline.stats.update_lag(total_lag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryEventWriter, MemoryObjectStore};

    fn raw(payload: &str) -> RawRecord {
        RawRecord {
            key: Some("s1".to_string()),
            payload: payload.to_string(),
            partition: 0,
            offset: 0,
        }
    }

    fn pipeline(
        archive_enabled: bool,
    ) -> (BatchPipeline, Arc<MemoryEventWriter>, Arc<MemoryObjectStore>) {
        let writer = Arc::new(MemoryEventWriter::new());
        let store = Arc::new(MemoryObjectStore::new());
        let archiver = Arc::new(EventArchiver::new(
            archive_enabled,
            "archive-bucket".to_string(),
            1000,
            Duration::from_secs(60),
            store.clone(),
        ));
        let pipeline = BatchPipeline {
            writer: writer.clone(),
            archiver,
            stats: Arc::new(PipelineStats::new()),
        };
        (pipeline, writer, store)
    }

    #[tokio::test]
    async fn batch_flows_through_archive_store_and_stats() {
        let (pipeline, writer, _store) = pipeline(true);
        let records = vec![
            raw(r#"{"sessionId":"s1","eventType":"click","payload":"{}"}"#),
            raw(r#"{"sessionId":"s1","eventType":"scroll","payload":"{}"}"#),
        ];

        let summary = pipeline.process(&records).await.unwrap();

        assert_eq!(summary, BatchSummary { received: 2, written: 2 });
        assert_eq!(writer.row_count(), 2);
        assert_eq!(pipeline.archiver.buffered().await, 2);

        let snapshot = pipeline.stats.snapshot();
        assert_eq!(snapshot.received_total, 2);
        assert_eq!(snapshot.written_total, 2);
        assert!(snapshot.avg_processing_ms >= 0.0);
    }

    #[tokio::test]
    async fn event_without_id_gets_one_assigned_and_written() {
        let (pipeline, writer, _store) = pipeline(false);

        let summary = pipeline
            .process(&[raw(r#"{"sessionId":"s1","eventType":"click","payload":"{}"}"#)])
            .await
            .unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(writer.row_count(), 1);
    }

    #[tokio::test]
    async fn redelivered_events_are_absorbed_by_the_store() {
        let (pipeline, writer, _store) = pipeline(false);
        let records = vec![raw(r#"{"eventId":"e-1","sessionId":"s1","payload":"{}"}"#)];

        let first = pipeline.process(&records).await.unwrap();
        let second = pipeline.process(&records).await.unwrap();

        assert_eq!(first.written, 1);
        assert_eq!(second.written, 0);
        assert_eq!(writer.row_count(), 1);

        // Received counts both deliveries, written only the first
        let snapshot = pipeline.stats.snapshot();
        assert_eq!(snapshot.received_total, 2);
        assert_eq!(snapshot.written_total, 1);
    }

    #[tokio::test]
    async fn written_total_counts_only_rows_the_store_accepted() {
        let (pipeline, _writer, _store) = pipeline(false);

        // Two occurrences of the same id within one batch: one row written
        let records = vec![
            raw(r#"{"eventId":"dup","payload":"{}"}"#),
            raw(r#"{"eventId":"dup","payload":"{}"}"#),
            raw(r#"{"eventId":"other","payload":"{}"}"#),
        ];
        let summary = pipeline.process(&records).await.unwrap();

        assert_eq!(summary, BatchSummary { received: 3, written: 2 });
    }

    #[tokio::test]
    async fn store_failure_propagates_without_touching_stats() {
        let (pipeline, writer, _store) = pipeline(false);
        writer.fail_next_inserts(1);

        let result = pipeline
            .process(&[raw(r#"{"eventId":"e-1","payload":"{}"}"#)])
            .await;

        assert!(result.is_err());
        let snapshot = pipeline.stats.snapshot();
        assert_eq!(snapshot.received_total, 0);
        assert_eq!(snapshot.written_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_store_failure_is_retried_to_success() {
        let (pipeline, writer, _store) = pipeline(false);
        writer.fail_next_inserts(2);

        let retry = RetryPolicy::default();
        let records = vec![raw(r#"{"eventId":"e-1","payload":"{}"}"#)];
        let summary = retry
            .retry("batch processing", || pipeline.process(&records))
            .await
            .unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(writer.row_count(), 1);
    }
}
