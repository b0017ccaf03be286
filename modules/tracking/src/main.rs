use cache_kit::{Cache, InMemoryCache};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracking_rs::middleware::decrypt::GateState;
use tracking_rs::routes::events::EventsState;
use tracking_rs::routes::ingest::IngestState;
use tracking_rs::stores::{
    PartnerStore, PgPartnerStore, PgReadProjectionStore, PgWatermarkStore, PgWriteEventStore,
    ReadProjectionStore, WatermarkStore, WriteEventStore,
};
use tracking_rs::validation::BasicEventValidator;
use tracking_rs::verify::{EnvelopeVerifier, PartnerKeyResolver, ReplayGuard};
use tracking_rs::{config, db, routes, ProjectionSyncer, SyncerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tracking_rs=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cfg = config::Config::from_env()?;

    // DB + migrations (fail-fast)
    tracing::info!("connecting to write and read databases");
    let write_pool = db::create_pool(&cfg.database_url).await?;
    let read_pool = db::create_pool(&cfg.read_database_url).await?;
    db::run_write_migrations(&write_pool).await?;
    db::run_read_migrations(&read_pool).await?;

    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());

    let partners: Arc<dyn PartnerStore> = Arc::new(PgPartnerStore::new(write_pool.clone()));
    let write_events: Arc<dyn WriteEventStore> =
        Arc::new(PgWriteEventStore::new(write_pool.clone()));
    let projections: Arc<dyn ReadProjectionStore> =
        Arc::new(PgReadProjectionStore::new(read_pool.clone()));
    let watermark: Arc<dyn WatermarkStore> = Arc::new(PgWatermarkStore::new(read_pool));

    // Envelope verification for the ingestion gate
    let verifier = EnvelopeVerifier::new(
        PartnerKeyResolver::new(partners.clone(), cache.clone()),
        ReplayGuard::new(cache.clone()),
    );
    let gate_state = Arc::new(GateState { verifier });

    let ingest_state = Arc::new(IngestState {
        partners: partners.clone(),
        write_events: write_events.clone(),
        validator: Arc::new(BasicEventValidator::new()),
        cache: cache.clone(),
    });

    let events_state = Arc::new(EventsState {
        projections: projections.clone(),
        cache,
    });

    // Projection syncer — single instance per deployment
    let cancel = CancellationToken::new();
    let syncer = ProjectionSyncer::new(
        partners,
        write_events,
        projections,
        watermark,
        SyncerConfig {
            poll_interval: Duration::from_secs(cfg.sync_poll_interval_secs),
            batch_size: cfg.sync_batch_size,
            startup_delay: Duration::from_secs(cfg.sync_startup_delay_secs),
        },
    );
    let syncer_cancel = cancel.clone();
    let syncer_task = tokio::spawn(syncer.run(syncer_cancel));

    let app = routes::router(ingest_state, events_state, gate_state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await?;

    // Let the syncer finish any in-flight batch before exiting.
    cancel.cancel();
    let _ = syncer_task.await;

    Ok(())
}
