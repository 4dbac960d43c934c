use crate::analysis::{GeminiProvider, SettingsProvider};
use crate::api::ApiServer;
use crate::config::{Config, FileSettings};
use crate::db::{RecordingRepository, SqliteStore};
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run_service() -> Result<()> {
    info!("Starting meetlens service");

    let config = Config::load()?;

    let store = SqliteStore::open_default()?;
    let interrupted = store
        .with_conn(|conn| RecordingRepository::fail_interrupted(conn))
        .await?;
    if interrupted > 0 {
        warn!(
            "Marked {} analysis job(s) interrupted by the last shutdown as failed",
            interrupted
        );
    }
    info!("Using database at {:?}", store.db_path());

    let settings = Arc::new(FileSettings);
    if let Err(e) = settings.settings() {
        warn!("{}; analysis requests will be rejected until a key is set", e);
    }

    let provider = Arc::new(GeminiProvider::new(config.provider.api_endpoint.clone()));
    info!(
        "Analyzing with {} via {}",
        config.provider.model,
        provider.base_url()
    );

    let api_server = ApiServer::new(&config, store, provider, settings);

    info!("meetlens is ready!");
    info!(
        "Try: curl -N -X POST http://127.0.0.1:{}/recordings/<id>/analyze",
        config.server.port
    );

    tokio::select! {
        result = api_server.start() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
