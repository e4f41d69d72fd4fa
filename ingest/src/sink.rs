use async_trait::async_trait;
use common_kafka::kafka_producer::KafkaContext;
use metrics::counter;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::producer::future_producer::{FutureProducer, FutureRecord};
use tracing::error;

use crate::api::IngestError;
use crate::event::PublishedEvent;

#[async_trait]
pub trait EventSink {
    async fn send(&self, event: PublishedEvent) -> Result<(), IngestError>;
}

/// Logs instead of producing, for local development without a broker.
pub struct PrintSink {}

#[async_trait]
impl EventSink for PrintSink {
    async fn send(&self, event: PublishedEvent) -> Result<(), IngestError> {
        tracing::info!("event: {:?}", event);
        counter!("ingest_events_published_total").increment(1);
        Ok(())
    }
}

#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaSink {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl EventSink for KafkaSink {
    async fn send(&self, event: PublishedEvent) -> Result<(), IngestError> {
        let payload = serde_json::to_string(&event).map_err(|e| {
            error!("failed to serialize event: {}", e);
            IngestError::NonRetryableSinkError
        })?;

        // Enqueue only: delivery is async, clients get 202 once the event is
        // accepted into the producer queue.
        match self.producer.send_result(FutureRecord {
            topic: self.topic.as_str(),
            payload: Some(&payload),
            partition: None,
            key: Some(event.key()),
            timestamp: None,
            headers: None,
        }) {
            Ok(_) => {
                counter!("ingest_events_published_total").increment(1);
                Ok(())
            }
            Err((e, _)) => match e.rdkafka_error_code() {
                Some(RDKafkaErrorCode::MessageSizeTooLarge) => {
                    counter!("ingest_events_dropped_total", "cause" => "too_big").increment(1);
                    Err(IngestError::EventTooBig)
                }
                _ => {
                    counter!("ingest_events_dropped_total", "cause" => "produce_error")
                        .increment(1);
                    error!("failed to produce event: {}", e);
                    Err(IngestError::RetryableSinkError)
                }
            },
        }
    }
}
