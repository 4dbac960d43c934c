//! Recording and analysis endpoints.
//!
//! - GET  /recordings              list recordings
//! - GET  /recordings/:id          recording with analysis status/result
//! - POST /recordings/:id/analyze  start an analysis, stream progress (SSE)

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::analysis::{
    AnalysisJob, AnalysisOptions, ModelProvider, Orchestrator, ProgressChannel, RecordingStore,
    SettingsProvider,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::sse::{progress_stream, sse_transport};
use crate::db::{RecordingRecord, RecordingRepository, SqliteStore};

/// Shared state for recording routes.
#[derive(Clone)]
pub struct AnalysisState {
    pub store: SqliteStore,
    pub provider: Arc<dyn ModelProvider>,
    pub settings: Arc<dyn SettingsProvider>,
    pub options: AnalysisOptions,
    /// Lifetime of a progress stream; the job outlives it if needed.
    pub stream_timeout: Duration,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    pub limit: Option<usize>,
}

pub fn router(state: AnalysisState) -> Router {
    Router::new()
        .route("/recordings", get(list_recordings))
        .route("/recordings/:id", get(get_recording))
        .route("/recordings/:id/analyze", post(analyze_recording))
        .with_state(state)
}

async fn list_recordings(
    State(state): State<AnalysisState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let limit = params.limit.unwrap_or(20);
    let recordings = state
        .store
        .with_conn(move |conn| RecordingRepository::list(conn, limit))
        .await?;

    let entries: Vec<Value> = recordings.iter().map(summary_json).collect();
    Ok(Json(json!({ "recordings": entries })))
}

async fn get_recording(
    State(state): State<AnalysisState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<RecordingRecord>> {
    let record = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Recording {} not found", id)))?;
    Ok(Json(record))
}

/// POST /recordings/:id/analyze
///
/// The job runs on its own task. Closing the stream does not cancel it; the
/// outcome is persisted either way and can be read from GET /recordings/:id.
async fn analyze_recording(
    State(state): State<AnalysisState>,
    Path(id): Path<i64>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let recording = state
        .store
        .load_recording(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Recording {} not found", id)))?;

    let settings = state
        .settings
        .settings()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if !state.store.claim(id).await? {
        return Err(ApiError::conflict(format!(
            "Recording {} is already being analysed",
            id
        )));
    }

    info!("Analysis of recording {} requested via API", id);

    let (transport, rx) = sse_transport();
    let channel = Arc::new(ProgressChannel::new(transport));
    let orchestrator = Orchestrator::with_options(
        state.provider.clone(),
        Arc::new(state.store.clone()),
        state.options.clone(),
    );
    let job = AnalysisJob {
        job_id: id,
        recording,
        settings,
    };

    tokio::spawn(async move {
        let outcome = orchestrator.run(job, channel).await;
        info!(
            "Analysis of recording {} finished with status {}",
            outcome.job_id,
            outcome.status.as_str()
        );
    });

    Ok(progress_stream(rx, state.stream_timeout))
}

fn summary_json(record: &RecordingRecord) -> Value {
    json!({
        "id": record.id,
        "title": record.title,
        "status": record.status,
        "summary": record.summary,
        "error": record.error,
        "images": record.image_paths.len(),
        "has_audio": record.audio_path.is_some(),
        "created_at": record.created_at,
        "completed_at": record.completed_at,
    })
}
