//! File type helpers for imported recordings.

use std::path::Path;

pub const SUPPORTED_AUDIO: &str = "wav, mp3, m4a, aac, flac, ogg, opus, mp4, mkv, webm, avi, mov";

/// Mime type for a known audio/video/image extension (lowercase, no dot).
pub fn mime_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        "m4a" => Some("audio/mp4"),
        "aac" => Some("audio/aac"),
        "flac" => Some("audio/flac"),
        "ogg" => Some("audio/ogg"),
        "opus" => Some("audio/opus"),
        "mp4" => Some("video/mp4"),
        "mkv" => Some("video/x-matroska"),
        "webm" => Some("video/webm"),
        "avi" => Some("video/x-msvideo"),
        "mov" => Some("video/quicktime"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

pub fn mime_type_for_path(path: &Path) -> &'static str {
    mime_type_for_extension(&extension(path)).unwrap_or("application/octet-stream")
}

/// Whether the file can serve as the audio track of a recording.
pub fn is_audio_or_video(path: &Path) -> bool {
    mime_type_for_extension(&extension(path))
        .map(|m| m.starts_with("audio/") || m.starts_with("video/"))
        .unwrap_or(false)
}

pub fn is_image(path: &Path) -> bool {
    mime_type_for_extension(&extension(path))
        .map(|m| m.starts_with("image/"))
        .unwrap_or(false)
}
