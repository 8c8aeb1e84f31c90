//! # Thea Server
//!
//! Self-hosted media-processing server: watches an ingest directory for
//! arriving video files, identifies them against the external catalogue,
//! persists their metadata, and drives workflow-matched transcodes through an
//! external transcoder under a global thread budget.
//!
//! The binary only wires things together: configuration, the Postgres-backed
//! store, the in-process event bus, and the two core services. Everything
//! interesting lives in `thea-core`.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thea_config::TheaConfig;
use thea_core::events::EventBus;
use thea_core::ingest::{FfprobeScraper, IngestService, TmdbSearcher};
use thea_core::store::{MediaStore, PostgresStore, TargetStore, TranscodeStore, WorkflowStore};
use thea_core::transcode::{FfmpegRunner, TranscodeService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (config, source) = TheaConfig::load_from_env().context("failed to load configuration")?;
    info!(?source, ingest_path = %config.ingest.ingest_path.display(), "configuration loaded");

    let store = PostgresStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to the database")?;
    store
        .ensure_schema()
        .await
        .context("failed to prepare the database schema")?;
    let store = Arc::new(store);

    let bus = Arc::new(EventBus::new());
    let shutdown = CancellationToken::new();

    let scraper = Arc::new(FfprobeScraper::new(config.transcode.ffprobe_path.clone()));
    let searcher = Arc::new(TmdbSearcher::new(config.provider.api_key.clone()));
    let runner = Arc::new(FfmpegRunner::new(config.transcode.ffmpeg_path.clone()));

    let ingest = IngestService::start(
        config.ingest.clone(),
        Arc::clone(&bus),
        Arc::clone(&store) as Arc<dyn MediaStore>,
        scraper,
        searcher,
        shutdown.child_token(),
    )
    .await;

    let transcode = TranscodeService::start(
        config.transcode.clone(),
        Arc::clone(&bus),
        Arc::clone(&store) as Arc<dyn MediaStore>,
        Arc::clone(&store) as Arc<dyn WorkflowStore>,
        Arc::clone(&store) as Arc<dyn TargetStore>,
        Arc::clone(&store) as Arc<dyn TranscodeStore>,
        runner,
        shutdown.child_token(),
    );

    info!("thea is running; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutdown requested, draining services");
    shutdown.cancel();
    ingest.stop().await;
    transcode.stop().await;
    info!("goodbye");
    Ok(())
}
