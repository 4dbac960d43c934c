//! REST API server for meetlens.
//!
//! Provides HTTP endpoints for:
//! - Service info and version
//! - Recording lookup
//! - Starting an analysis with live progress over server-sent events

pub mod error;
pub mod routes;
pub mod sse;

use crate::analysis::{ModelProvider, SettingsProvider};
use crate::config::Config;
use crate::db::SqliteStore;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::recordings::AnalysisState;

pub struct ApiServer {
    port: u16,
    state: AnalysisState,
}

impl ApiServer {
    pub fn new(
        config: &Config,
        store: SqliteStore,
        provider: Arc<dyn ModelProvider>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            port: config.server.port,
            state: AnalysisState {
                store,
                provider,
                settings,
                options: config.analysis.options(),
                stream_timeout: Duration::from_secs(config.server.job_timeout_seconds.max(1)),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(status))
            .route("/version", get(version))
            .merge(routes::recordings::router(self.state.clone()))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self) -> Result<()> {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /                        - Service info");
        info!("  GET  /version                 - Get version info");
        info!("  GET  /recordings              - List recordings");
        info!("  GET  /recordings/:id          - Get recording and analysis");
        info!("  POST /recordings/:id/analyze  - Analyze recording (SSE progress)");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "meetlens",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "meetlens"
    }))
}
