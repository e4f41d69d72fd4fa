use std::time::Duration;

use common_kafka::kafka_consumer::RawRecord;
use common_kafka::kafka_producer::KafkaContext;
use metrics::counter;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{error, info};

use crate::metric_consts::{DEAD_LETTER_PUBLISH_FAILURES, DEAD_LETTER_RECORDS};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the dead-letter topic for a source topic.
pub fn dlq_topic_for(source_topic: &str) -> String {
    format!("{source_topic}.DLQ")
}

/// Terminal destination for batches that exhausted their retry budget. The
/// original raw records are republished unchanged, on the same partition
/// number they came from, so the failure can be replayed in order later.
///
/// Publishing here is best effort: a failure is logged and counted, never
/// surfaced, because the consumer must advance past the poison batch either
/// way.
pub struct DeadLetterQueue {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

// Not derived: the producer context doesn't need to be Clone, the producer
// itself is reference counted.
impl Clone for DeadLetterQueue {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            topic: self.topic.clone(),
        }
    }
}

impl DeadLetterQueue {
    pub fn new(producer: FutureProducer<KafkaContext>, source_topic: &str) -> Self {
        Self {
            producer,
            topic: dlq_topic_for(source_topic),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish_batch(&self, records: &[RawRecord]) {
        for record in records {
            let produce = FutureRecord {
                topic: &self.topic,
                partition: Some(record.partition),
                payload: Some(&record.payload),
                key: record.key.as_ref(),
                timestamp: None,
                headers: None,
            };

            match self.producer.send(produce, PUBLISH_TIMEOUT).await {
                Ok(_) => {
                    counter!(DEAD_LETTER_RECORDS).increment(1);
                }
                Err((e, _)) => {
                    counter!(DEAD_LETTER_PUBLISH_FAILURES).increment(1);
                    error!(
                        error = %e,
                        partition = record.partition,
                        offset = record.offset,
                        "failed to publish record to {}", self.topic
                    );
                }
            }
        }
        info!(
            count = records.len(),
            topic = self.topic,
            "redirected failed batch to dead letter topic"
        );
    }
}
