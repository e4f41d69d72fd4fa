use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::SessionConsumer;
use common_kafka::kafka_producer::create_kafka_producer;
use health::{HealthHandle, HealthRegistry};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::archiver::{EventArchiver, S3ObjectStore};
use crate::config::Config;
use crate::dead_letter::DeadLetterQueue;
use crate::error::PipelineError;
use crate::stats::PipelineStats;
use crate::store::PgEventWriter;

pub struct AppContext {
    pub health_registry: HealthRegistry,
    pub worker_liveness: HealthHandle,
    pub consumer: SessionConsumer,
    pub dead_letters: DeadLetterQueue,
    pub writer: Arc<PgEventWriter>,
    pub archiver: Arc<EventArchiver>,
    pub stats: Arc<PipelineStats>,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, PipelineError> {
        let health_registry = HealthRegistry::new("liveness");
        let worker_liveness = health_registry
            .register("consumer".to_string(), Duration::from_secs(60))
            .await;
        let kafka_liveness = health_registry
            .register("rdkafka".to_string(), Duration::from_secs(30))
            .await;

        let consumer = SessionConsumer::new(config.kafka.clone(), config.consumer.clone())?;
        let dlq_producer = create_kafka_producer(&config.kafka, kafka_liveness).await?;
        let dead_letters =
            DeadLetterQueue::new(dlq_producer, &config.consumer.kafka_consumer_topic);

        let options = PgPoolOptions::new().max_connections(config.max_pg_connections);
        let pool = options.connect(&config.database_url).await?;
        if config.run_migrations {
            info!("running database migrations");
            sqlx::migrate!("./migrations").run(&pool).await?;
        }
        let writer = Arc::new(PgEventWriter::new(pool));

        let object_store = Arc::new(
            S3ObjectStore::new(
                config.object_storage_region.clone(),
                config.object_storage_endpoint.clone(),
            )
            .await,
        );
        let archiver = Arc::new(EventArchiver::new(
            config.archive_enabled,
            config.archive_bucket.clone(),
            config.archive_batch_size,
            config.archive_flush_interval(),
            object_store,
        ));
        if archiver.enabled() {
            info!(bucket = config.archive_bucket, "cold archiving enabled");
        }

        Ok(Self {
            health_registry,
            worker_liveness,
            consumer,
            dead_letters,
            writer,
            archiver,
            stats: Arc::new(PipelineStats::new()),
        })
    }
}
