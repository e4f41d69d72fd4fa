use std::time::Duration;

use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use health::HealthRegistry;
use ingest::config::Config;
use ingest::{router, sink};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().unwrap()),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() {
    setup_tracing();
    info!("starting ingest service...");

    let config = Config::init_from_env().expect("invalid configuration");
    let liveness = HealthRegistry::new("liveness");

    let app = if config.print_sink {
        router::router(sink::PrintSink {}, liveness, config.export_prometheus)
    } else {
        let kafka_liveness = liveness
            .register("rdkafka".to_string(), Duration::from_secs(30))
            .await;
        let producer = create_kafka_producer(&config.kafka, kafka_liveness)
            .await
            .expect("failed to create kafka producer");
        let sink = sink::KafkaSink::new(producer, config.kafka_topic.clone());
        router::router(sink, liveness, config.export_prometheus)
    };

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .expect("failed to bind address");
    info!("listening on {}", config.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");
}
