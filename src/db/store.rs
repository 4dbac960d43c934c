//! Async adapters from the analysis engine's store traits to SQLite.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::PathBuf;

use super::init::init_db_at;
use super::recordings::{RecordingRecord, RecordingRepository};
use crate::analysis::{AnalysisDocument, JobStatus, JobStore, RecordingStore, StoredRecording};

/// Opens a connection per operation on a blocking thread.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Store at the default database location.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::global::db_file()?))
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Run `f` against a fresh connection on the blocking pool.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = init_db_at(&db_path)?;
            f(&conn)
        })
        .await
        .context("Database task failed")?
    }

    pub async fn get(&self, id: i64) -> Result<Option<RecordingRecord>> {
        self.with_conn(move |conn| RecordingRepository::get(conn, id))
            .await
    }

    pub async fn claim(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| RecordingRepository::claim(conn, id))
            .await
    }
}

#[async_trait]
impl RecordingStore for SqliteStore {
    async fn load_recording(&self, job_id: i64) -> Result<Option<StoredRecording>> {
        Ok(self.get(job_id).await?.map(|record| record.to_stored()))
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn set_status(&self, job_id: i64, status: JobStatus, error: Option<&str>) -> Result<()> {
        let error = error.map(str::to_string);
        self.with_conn(move |conn| {
            RecordingRepository::update_status(conn, job_id, status, error.as_deref())
        })
        .await
    }

    async fn save_result(&self, job_id: i64, document: &AnalysisDocument) -> Result<()> {
        let document = document.clone();
        self.with_conn(move |conn| RecordingRepository::save_result(conn, job_id, &document))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewRecording;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("meetlens.db"));

        let id = store
            .with_conn(|conn| {
                RecordingRepository::insert(
                    conn,
                    &NewRecording {
                        context: Some("notes".to_string()),
                        ..Default::default()
                    },
                )
            })
            .await
            .unwrap();

        let stored = store.load_recording(id).await.unwrap().unwrap();
        assert_eq!(stored.context.as_deref(), Some("notes"));
        assert!(store.load_recording(id + 1).await.unwrap().is_none());

        store
            .set_status(id, JobStatus::Processing, None)
            .await
            .unwrap();
        store
            .save_result(
                id,
                &AnalysisDocument {
                    raw: "result".to_string(),
                    summary: "result".to_string(),
                    metadata: json!({}),
                },
            )
            .await
            .unwrap();
        store.set_status(id, JobStatus::Completed, None).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.job_status(), Some(JobStatus::Completed));
        assert_eq!(record.result.as_deref(), Some("result"));
    }

    #[tokio::test]
    async fn test_error_message_is_persisted() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("nested").join("meetlens.db"));
        let id = store
            .with_conn(|conn| RecordingRepository::insert(conn, &NewRecording::default()))
            .await
            .unwrap();

        store
            .set_status(id, JobStatus::Error, Some("quota used up"))
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, "error");
        assert_eq!(record.error.as_deref(), Some("quota used up"));
    }
}
