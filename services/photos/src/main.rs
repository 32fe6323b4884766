use anyhow::{Context, Result};
use photo_service::api::{start_api_server, AppState};
use photo_service::{
    Config, ImageProcessor, IngestionConsumer, KafkaFailureSink, LifecycleSettings,
    NotificationDispatcher, PgPhotoRepository, PgSessionRegistry, PhotoLifecycleService,
    ProcessorSettings, PushHub, RecycleBin, S3ObjectStore,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting photo service");

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let photos = PgPhotoRepository::connect(&config.database)
        .await
        .context("Failed to initialize photo repository")?;

    if config.database.run_migrations {
        photos
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let sessions = Arc::new(PgSessionRegistry::new(photos.pool().clone()));
    let photos = Arc::new(photos);

    let objects = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 object store")?,
    );

    let failures =
        Arc::new(KafkaFailureSink::new(&config.kafka).context("Failed to initialize failure sink")?);

    let push_hub = Arc::new(PushHub::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        sessions.clone(),
        push_hub.clone(),
        config.notifications.prune_stale_sessions,
    ));

    let recycle_bin = RecycleBin::new(config.s3.recycle_prefix.clone());

    let processor = Arc::new(ImageProcessor::new(
        objects.clone(),
        photos.clone(),
        dispatcher,
        failures,
        ProcessorSettings {
            primary_bucket: config.s3.primary_bucket.clone(),
            access_url_ttl: config.s3.access_url_ttl(),
            recycle_bin: recycle_bin.clone(),
            success_message: config.notifications.success_message.clone(),
        },
    ));

    let lifecycle = Arc::new(PhotoLifecycleService::new(
        photos,
        objects,
        LifecycleSettings {
            primary_bucket: config.s3.primary_bucket.clone(),
            access_url_ttl: config.s3.access_url_ttl(),
            share_url_ttl: config.s3.share_url_ttl(),
            recycle_bin,
        },
    ));

    let consumer = IngestionConsumer::new(&config.kafka, processor)
        .context("Failed to initialize Kafka consumer")?;

    let api_state = AppState {
        lifecycle,
        push_hub,
        sessions,
    };

    let shutdown = CancellationToken::new();

    // Spawn Kafka consumer task
    let consumer_shutdown = shutdown.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_shutdown).await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    // Spawn API server task
    let api_config = config.api.clone();
    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Photo service started successfully");

    shutdown_signal().await;

    info!("Shutting down photo service");

    shutdown.cancel();
    let _ = tokio::join!(consumer_handle, api_handle);

    info!("Photo service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
