use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use processor::app_context::AppContext;
use processor::config::Config;
use processor::consumer::{BatchPipeline, PipelineConsumer};
use processor::streamer;
use serve_metrics::{serve, setup_metrics_routes};
use tokio::task::JoinHandle;
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

pub async fn index() -> &'static str {
    "session event processor"
}

fn start_server(config: &Config, context: Arc<AppContext>) -> JoinHandle<()> {
    let liveness = context.health_registry.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/metrics/stream", get(streamer::metrics_stream))
        .with_state(context.stats.clone());
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

#[tokio::main]
async fn main() {
    setup_tracing();
    info!("starting processor...");

    let config = Config::init_with_defaults().expect("invalid configuration");
    let context = Arc::new(
        AppContext::new(&config)
            .await
            .expect("failed to create app context"),
    );

    info!(
        topic = config.consumer.kafka_consumer_topic,
        group = config.consumer.kafka_consumer_group,
        "subscribed"
    );

    start_server(&config, context.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let pipeline = BatchPipeline {
        writer: context.writer.clone(),
        archiver: context.archiver.clone(),
        stats: context.stats.clone(),
    };
    let consumer = PipelineConsumer::new(
        context.consumer.clone(),
        pipeline,
        config.retry_policy(),
        context.dead_letters.clone(),
        context.worker_liveness.clone(),
        config.consumer_batch_size,
        config.consumer_batch_timeout(),
    );

    consumer.run(shutdown_rx).await;
    info!("processor shut down");
}
