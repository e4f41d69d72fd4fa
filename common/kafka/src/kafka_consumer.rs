use std::sync::{Arc, Weak};
use std::time::Duration;

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};

use crate::config::{ConsumerConfig, KafkaConfig};

/// A consumer subscribed to a single topic, yielding raw records rather than
/// deserialized values: downstream needs the original payload bytes for
/// archiving and dead-lettering, not just a typed view of them.
///
/// Offset *storing* is disabled on the client and only happens through the
/// [`OffsetHandle`] returned with each record, so a record is only ever
/// committed after the caller is done with it (at-least-once delivery).
#[derive(Clone)]
pub struct SessionConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

/// One record as pulled from the log, before any decoding.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub key: Option<String>,
    pub payload: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

impl SessionConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                consumer_config.kafka_consumer_offset_reset,
            );

        client_config.set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub async fn recv_raw(&self) -> Result<(RawRecord, OffsetHandle), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let handle = OffsetHandle {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            // We auto-store poison pills, panicking on failure
            handle.store().unwrap();
            return Err(RecvErr::Empty);
        };

        let record = RawRecord {
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: String::from_utf8_lossy(payload).into_owned(),
            partition: message.partition(),
            offset: message.offset(),
        };

        Ok((record, handle))
    }

    /// Pull up to `max` records, waiting at most `timeout` overall. An error
    /// ends the batch early, since it might indicate the connection is gone.
    pub async fn recv_raw_batch(
        &self,
        max: usize,
        timeout: Duration,
    ) -> Vec<Result<(RawRecord, OffsetHandle), RecvErr>> {
        let mut results = Vec::with_capacity(max);

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {},
            _ = async {
                while results.len() < max {
                    let result = self.recv_raw().await;
                    let was_err = result.is_err();
                    results.push(result);
                    if was_err {
                        break;
                    }
                }
            } => {}
        }

        results
    }

    /// Low/high broker watermarks for one partition of the subscribed topic.
    pub fn watermarks(
        &self,
        partition: i32,
        timeout: Duration,
    ) -> Result<(i64, i64), KafkaError> {
        self.inner
            .consumer
            .fetch_watermarks(&self.inner.topic, partition, timeout)
    }
}

/// Acknowledgment token for one record. Storing marks the record processed;
/// the client's periodic auto-commit then advances the group offset.
pub struct OffsetHandle {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl OffsetHandle {
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}
