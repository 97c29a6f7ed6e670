use anyhow::{Context, Result};
use faceattend_core::{KvStore, LlmOracle, Roster};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod webcam;

use config::Config;
use dbus_interface::{AttendService, BUS_NAME, OBJECT_PATH};
use engine::{AttendanceEngine, EngineSettings};
use webcam::V4lOpener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faceattendd starting");

    let config = Config::load().context("loading configuration")?;
    if config.llm_api_key.is_none() {
        tracing::warn!("no API key configured; set FACEATTEND_API_KEY if the provider needs one");
    }

    let store = KvStore::open(&config.db_path)
        .with_context(|| format!("opening store {}", config.db_path.display()))?;
    let roster = Roster::load(store).context("loading roster")?;
    let oracle = LlmOracle::new(config.llm_settings()).context("building oracle client")?;
    tracing::info!(
        endpoint = %config.llm_base_url,
        model = %config.llm_model,
        "oracle configured"
    );

    let engine = AttendanceEngine::new(
        roster,
        Arc::new(oracle),
        Arc::new(V4lOpener {
            device: config.camera_device.clone(),
        }),
        EngineSettings {
            recognition_interval: config.recognition_interval(),
            warmup_frames: config.warmup_frames,
            capture_attempts: config.capture_attempts,
            jpeg_quality: config.jpeg_quality,
            dedup_scope: config.dedup_scope,
        },
    );

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendService::new(engine.clone()))?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(
        bus = BUS_NAME,
        path = OBJECT_PATH,
        device = %config.camera_device,
        "faceattendd ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("faceattendd shutting down");
    engine.shutdown().await;

    Ok(())
}
