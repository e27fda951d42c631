use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cache;
mod config;
mod db;
mod domain;
mod health;
mod http;
mod ingestion;
mod messaging;
mod metrics;
mod query;
mod utils;

use cache::OrderCache;
use config::Config;
use db::{OrderStore, PostgresOrderStore};
use health::{HealthMonitor, HealthStatus};
use ingestion::IngestionConsumer;
use messaging::{DeadLetterPublisher, RedpandaClient, RedpandaSubscriber};
use metrics::Metrics;
use query::QueryService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_cache=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order cache service");

    let config = Config::from_env();

    // === 1. Metrics and health ===
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let health = Arc::new(HealthMonitor::new());
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    // === 2. PostgreSQL ===
    tracing::info!(
        host = %config.postgres.host,
        port = config.postgres.port,
        database = %config.postgres.database,
        "Connecting to PostgreSQL..."
    );
    let store = match PostgresOrderStore::connect(&config.postgres).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "❌ Cannot reach the order store");
            return Err(e).context("PostgreSQL connection failed");
        }
    };
    if config.postgres.apply_schema {
        store.apply_schema().await.context("Failed to apply schema")?;
    }
    health.update("postgres", HealthStatus::Healthy, None).await;

    // === 3. Cache, queries and HTTP ===
    let cache = Arc::new(OrderCache::new());
    health
        .update("cache", HealthStatus::Degraded("Hydrating".to_string()), None)
        .await;

    let state = http::AppState {
        query: QueryService::new(cache.clone()),
        metrics: metrics.clone(),
        health: health.clone(),
    };
    let server = http::start_server(state, &config.server).context("Failed to bind HTTP server")?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // === 4. Hydrate before ingesting ===
    tracing::info!("Hydrating order cache from PostgreSQL...");
    match cache.load_from(store.load_all()).await {
        Ok(loaded) => {
            metrics.record_hydration(loaded);
            metrics.set_cache_size(cache.len().await);
            health
                .update("cache", HealthStatus::Healthy, Some(format!("{loaded} orders hydrated")))
                .await;
        }
        Err(e) => {
            tracing::error!(error = %e, "❌ Cache hydration failed");
            server_handle.stop(false).await;
            store.close().await;
            return Err(e).context("Cache hydration failed");
        }
    }

    // === 5. Ingestion ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let store_watch = health.clone().watch_store(
        store.clone(),
        Duration::from_secs(10),
        shutdown_rx.clone(),
    );

    let mut ingestion = IngestionConsumer::new(store.clone(), cache.clone(), metrics.clone());
    let mut dead_letter_watch = None;

    if let Some(topic) = &config.redpanda.dead_letter_topic {
        let client = Arc::new(
            RedpandaClient::new(&config.redpanda.brokers, metrics.clone())
                .context("Failed to create Redpanda producer")?,
        );
        dead_letter_watch = Some(health.clone().watch_dead_letters(
            client.clone(),
            Duration::from_secs(10),
            shutdown_rx.clone(),
        ));
        ingestion = ingestion.with_dead_letters(Arc::new(DeadLetterPublisher::new(
            client,
            topic.clone(),
            metrics.clone(),
        )));
        tracing::info!(topic = %topic, "💀 Dead-letter publishing enabled");
    } else {
        tracing::warn!("Dead-letter topic not configured, rejected payloads are only logged");
    }

    let subscriber = RedpandaSubscriber::new(&config.redpanda, health.clone())
        .context("Failed to create Redpanda consumer")?;
    let subscriber_task = tokio::spawn(subscriber.run(Arc::new(ingestion), shutdown_rx));

    tracing::info!("✅ Order cache service ready");

    // === 6. Run until Ctrl+C ===
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        }
        result = server_task => {
            tracing::error!(result = ?result, "HTTP server exited unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = subscriber_task.await {
        tracing::error!(error = %e, "Subscription task panicked");
    }
    if let Some(task) = dead_letter_watch {
        let _ = task.await;
    }
    let _ = store_watch.await;

    server_handle.stop(true).await;
    store.close().await;

    tracing::info!("👋 Order cache service stopped");
    Ok(())
}
