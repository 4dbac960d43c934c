//! CLI handler for registering a recording.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analysis::AudioTrack;
use crate::cli::args::ImportCliArgs;
use crate::db::{NewRecording, RecordingRepository, SqliteStore};
use crate::media::{is_audio_or_video, is_image, mime_type_for_path, SUPPORTED_AUDIO};

/// Handle the import CLI command. Prints the new recording id.
pub async fn handle_import_command(args: ImportCliArgs) -> Result<()> {
    let recording = build_recording(args)?;
    if recording.audio.is_none() && recording.images.is_empty() && recording.context.is_none() {
        bail!("Nothing to import: pass --audio, --image, --images-dir or --context");
    }

    let images = recording.images.len();
    let store = SqliteStore::open_default()?;
    let id = store
        .with_conn(move |conn| RecordingRepository::insert(conn, &recording))
        .await?;

    info!("Imported recording {} with {} screenshots", id, images);
    println!("{}", id);
    Ok(())
}

fn build_recording(args: ImportCliArgs) -> Result<NewRecording> {
    let audio = match args.audio {
        Some(path) => Some(audio_track(&path)?),
        None => None,
    };

    let mut images = Vec::new();
    for path in args.images {
        validate_image(&path)?;
        images.push(absolute(&path)?);
    }
    if let Some(dir) = args.images_dir {
        images.extend(images_in_dir(&dir)?);
    }

    let context = match args.context {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read context file {}", path.display()))?,
        ),
        None => None,
    };

    Ok(NewRecording {
        title: args.title,
        audio,
        images,
        context,
    })
}

fn audio_track(path: &Path) -> Result<AudioTrack> {
    if !path.is_file() {
        bail!("File not found: {}", path.display());
    }
    if !is_audio_or_video(path) {
        bail!(
            "Unsupported audio format: {}\nSupported formats: {}",
            path.display(),
            SUPPORTED_AUDIO
        );
    }
    Ok(AudioTrack {
        path: absolute(path)?,
        mime_type: mime_type_for_path(path).to_string(),
    })
}

fn validate_image(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("File not found: {}", path.display());
    }
    if !is_image(path) {
        bail!("Not a supported image: {}", path.display());
    }
    Ok(())
}

/// Image files of `dir`, sorted by file name.
fn images_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read image directory {}", dir.display()))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            images.push(absolute(&path)?);
        }
    }
    images.sort();
    Ok(images)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("Failed to resolve {}", path.display()))
}
