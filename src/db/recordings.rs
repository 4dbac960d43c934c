//! Recording record persistence.
//!
//! CRUD operations for the `recordings` table, raw SQL with rusqlite. The
//! analysis job of a recording shares its id and lives on the same row.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::PathBuf;

use crate::analysis::{AnalysisDocument, AudioTrack, JobStatus, StoredRecording};

/// Input for a new recording.
#[derive(Debug, Clone, Default)]
pub struct NewRecording {
    pub title: Option<String>,
    pub audio: Option<AudioTrack>,
    pub images: Vec<PathBuf>,
    pub context: Option<String>,
}

/// A recording row.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingRecord {
    pub id: i64,
    pub title: Option<String>,
    pub audio_path: Option<String>,
    pub audio_mime: Option<String>,
    pub image_paths: Vec<String>,
    #[serde(skip)]
    pub context_text: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub result: Option<String>,
    pub summary: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl RecordingRecord {
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// The recording as the analysis engine sees it.
    pub fn to_stored(&self) -> StoredRecording {
        let audio = match (&self.audio_path, &self.audio_mime) {
            (Some(path), Some(mime)) => Some(AudioTrack {
                path: PathBuf::from(path),
                mime_type: mime.clone(),
            }),
            _ => None,
        };

        StoredRecording {
            audio,
            images: self.image_paths.iter().map(PathBuf::from).collect(),
            context: self.context_text.clone(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let image_paths: String = row.get(4)?;
        let metadata: Option<String> = row.get(10)?;

        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            audio_path: row.get(2)?,
            audio_mime: row.get(3)?,
            image_paths: serde_json::from_str(&image_paths).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?,
            context_text: row.get(5)?,
            status: row.get(6)?,
            error: row.get(7)?,
            result: row.get(8)?,
            summary: row.get(9)?,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            started_at: row.get(11)?,
            completed_at: row.get(12)?,
            created_at: row.get(13)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, title, audio_path, audio_mime, image_paths, context_text, \
     status, error, result, summary, metadata, started_at, completed_at, created_at \
     FROM recordings";

/// Repository for recording records.
pub struct RecordingRepository;

impl RecordingRepository {
    /// Insert a new recording (status = pending). Returns the new id.
    pub fn insert(conn: &Connection, recording: &NewRecording) -> Result<i64> {
        let image_paths: Vec<String> = recording
            .images
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        conn.execute(
            "INSERT INTO recordings (title, audio_path, audio_mime, image_paths, context_text, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                recording.title,
                recording
                    .audio
                    .as_ref()
                    .map(|a| a.path.to_string_lossy().to_string()),
                recording.audio.as_ref().map(|a| a.mime_type.clone()),
                serde_json::to_string(&image_paths)?,
                recording.context,
                JobStatus::Pending.as_str(),
            ],
        )
        .context("Failed to insert recording")?;

        Ok(conn.last_insert_rowid())
    }

    /// Move the recording's job to `status`. `processing` clears any previous
    /// error and result; terminal states stamp `completed_at`.
    pub fn update_status(
        conn: &Connection,
        id: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let sql = match status {
            JobStatus::Processing => {
                "UPDATE recordings SET status = ?1, error = ?2, result = NULL, summary = NULL, \
                 metadata = NULL, started_at = CURRENT_TIMESTAMP, completed_at = NULL WHERE id = ?3"
            }
            JobStatus::Completed | JobStatus::Error => {
                "UPDATE recordings SET status = ?1, error = ?2, completed_at = CURRENT_TIMESTAMP \
                 WHERE id = ?3"
            }
            JobStatus::Pending => "UPDATE recordings SET status = ?1, error = ?2 WHERE id = ?3",
        };

        let updated = conn
            .execute(sql, params![status.as_str(), error, id])
            .context("Failed to update recording status")?;
        if updated == 0 {
            anyhow::bail!("Recording {} not found", id);
        }
        Ok(())
    }

    /// Atomically move a recording that is not already being analysed to
    /// `processing`. Returns false when a job is already running.
    pub fn claim(conn: &Connection, id: i64) -> Result<bool> {
        let updated = conn
            .execute(
                "UPDATE recordings SET status = ?1, error = NULL, started_at = CURRENT_TIMESTAMP, \
                 completed_at = NULL WHERE id = ?2 AND status != ?1",
                params![JobStatus::Processing.as_str(), id],
            )
            .context("Failed to claim recording")?;
        Ok(updated == 1)
    }

    /// Fail every job still marked `processing`. Used at startup, when no
    /// job can be running.
    pub fn fail_interrupted(conn: &Connection) -> Result<usize> {
        conn.execute(
            "UPDATE recordings SET status = ?1, error = ?2, completed_at = CURRENT_TIMESTAMP \
             WHERE status = ?3",
            params![
                JobStatus::Error.as_str(),
                "The analysis was interrupted by a shutdown. Start it again.",
                JobStatus::Processing.as_str()
            ],
        )
        .context("Failed to reset interrupted jobs")
    }

    /// Store the analysis document. Does not change the status.
    pub fn save_result(conn: &Connection, id: i64, document: &AnalysisDocument) -> Result<()> {
        let updated = conn
            .execute(
                "UPDATE recordings SET result = ?1, summary = ?2, metadata = ?3 WHERE id = ?4",
                params![
                    document.raw,
                    document.summary,
                    serde_json::to_string(&document.metadata)?,
                    id
                ],
            )
            .context("Failed to save analysis result")?;
        if updated == 0 {
            anyhow::bail!("Recording {} not found", id);
        }
        Ok(())
    }

    /// Get a recording by ID.
    pub fn get(conn: &Connection, id: i64) -> Result<Option<RecordingRecord>> {
        conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            RecordingRecord::from_row,
        )
        .optional()
        .context("Failed to query recording")
    }

    /// List recordings, newest first.
    pub fn list(conn: &Connection, limit: usize) -> Result<Vec<RecordingRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "{} ORDER BY created_at DESC, id DESC LIMIT ?1",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare recordings list query")?;

        let rows = stmt
            .query_map(params![limit as i64], RecordingRecord::from_row)
            .context("Failed to list recordings")?;

        let mut recordings = Vec::new();
        for row in rows {
            recordings.push(row?);
        }

        Ok(recordings)
    }
}
