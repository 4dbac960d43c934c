//! The stored analysis result.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::payload::AudioMode;

const SUMMARY_MAX_CHARS: usize = 500;

/// How a document was produced.
#[derive(Debug, Clone)]
pub struct RunDetails {
    pub model: String,
    pub provider: &'static str,
    pub strategy: &'static str,
    pub images_sent: usize,
    pub audio: AudioMode,
}

/// Model output plus what the rest of the app needs to list and render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDocument {
    /// Markdown text as returned by the model.
    pub raw: String,
    pub summary: String,
    pub metadata: serde_json::Value,
}

impl AnalysisDocument {
    pub fn from_raw(raw: String, details: &RunDetails) -> Self {
        let summary = summarize(&raw);
        let metadata = json!({
            "provider": details.provider,
            "model": details.model,
            "strategy": details.strategy,
            "images_sent": details.images_sent,
            "audio": details.audio.as_str(),
            "sections": headings(&raw),
            "characters": raw.chars().count(),
            "analyzed_at": Utc::now().to_rfc3339(),
        });

        Self {
            raw,
            summary,
            metadata,
        }
    }
}

/// First paragraph under a "Summary" heading, else the first prose
/// paragraph of the document.
fn summarize(raw: &str) -> String {
    let paragraphs = paragraphs(raw);

    let under_summary = paragraphs
        .iter()
        .position(|p| is_heading(p) && heading_text(p).eq_ignore_ascii_case("summary"))
        .and_then(|i| paragraphs[i + 1..].iter().find(|p| !is_heading(p)));

    let paragraph = under_summary
        .or_else(|| paragraphs.iter().find(|p| !is_heading(p)))
        .map(|p| p.as_str())
        .unwrap_or("");

    truncate_chars(paragraph, SUMMARY_MAX_CHARS)
}

/// Blank-line separated blocks; a heading line is always its own block.
fn paragraphs(raw: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in raw.lines().map(str::trim) {
        if line.is_empty() || is_heading(line) {
            if !current.is_empty() {
                blocks.push(current.join(" "));
                current.clear();
            }
            if !line.is_empty() {
                blocks.push(line.to_string());
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        blocks.push(current.join(" "));
    }
    blocks
}

fn headings(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| is_heading(l))
        .map(|l| heading_text(l).to_string())
        .collect()
}

fn is_heading(line: &str) -> bool {
    line.starts_with('#')
}

fn heading_text(line: &str) -> &str {
    line.trim_start_matches('#').trim()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
