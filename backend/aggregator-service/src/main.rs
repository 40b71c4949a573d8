use actix_web::{web, App, HttpServer};
use aggregator_service::{configure, AppState, Config, LogFormat};
use anyhow::Context;
use idempotent_ingest::{DrainOutcome, IngestMetrics, IngestPipeline, SqliteEventStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,actix_web=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    info!(
        host = %config.host,
        port = config.port,
        db_path = %config.db_path.display(),
        "Starting aggregator-service"
    );

    // A store that cannot be opened is fatal.
    let store = Arc::new(
        SqliteEventStore::open(&config.store_options())
            .await
            .context("Failed to open event store")?,
    );

    let metrics = IngestMetrics::new("aggregator-service");
    let pipeline = Arc::new(IngestPipeline::new_with_metrics(
        store.clone(),
        config.pipeline_config(),
        metrics,
    ));
    pipeline.start().await;
    info!("✅ Consumer started");

    let state = web::Data::new(AppState::new(pipeline.clone()));

    // actix installs its own SIGINT/SIGTERM handling; run() returns after a
    // graceful stop of the HTTP workers.
    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?
    .run()
    .await
    .context("HTTP server error")?;

    info!("HTTP server stopped, draining intake queue");
    let report = pipeline.shutdown().await;
    if report.drain != DrainOutcome::Drained {
        warn!(drain = ?report.drain, "Shutdown left events unprocessed");
    }
    store.close().await;

    info!("aggregator-service shut down");
    Ok(())
}
