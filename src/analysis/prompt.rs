//! Prompt text for the analysis request.
//!
//! The context text (transcript, speaker timeline, notes) is capped at
//! [`CONTEXT_CAP_BYTES`]. Oversized context is first trimmed structurally:
//! the timeline section keeps its first and last [`TIMELINE_KEEP`] entries
//! and the middle becomes a count marker. Only if that still does not fit
//! is the text cut at a byte limit.

pub const CONTEXT_CAP_BYTES: usize = 100 * 1024;
pub const TIMELINE_KEEP: usize = 100;
pub const TIMELINE_START: &str = "=== TIMELINE ===";
pub const TIMELINE_END: &str = "=== END TIMELINE ===";

const TRUNCATION_MARKER: &str = "\n[... context truncated ...]";

pub const SYSTEM_INSTRUCTIONS: &str = "You are analysing a recorded meeting. You receive the \
meeting audio (when available), screenshots captured during the meeting in chronological \
order, and supporting context such as a transcript or speaker timeline.

Write the analysis in Markdown with these sections:
## Summary
A short paragraph covering purpose and outcome of the meeting.
## Key Decisions
## Action Items
Each item with owner and due date when they are mentioned.
## Discussion Topics
## Notable Moments
Reference screenshots by their position in the sequence when they add information.
## Open Questions

Base every statement on the provided material. If the audio is missing or unclear, say so \
instead of guessing.";

/// What is attached next to the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attachments {
    pub audio: bool,
    pub images: usize,
}

/// Full prompt: instructions, capped context and an attachment note.
pub fn build_prompt(context: Option<&str>, attachments: Attachments) -> String {
    let mut prompt = String::from(SYSTEM_INSTRUCTIONS);

    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\n\n--- Meeting context ---\n");
        prompt.push_str(&cap_context(context, CONTEXT_CAP_BYTES));
    }

    prompt.push_str("\n\n--- Attachments ---\n");
    prompt.push_str(&attachment_note(attachments));
    prompt
}

pub fn attachment_note(attachments: Attachments) -> String {
    let audio = if attachments.audio {
        "The meeting audio is attached."
    } else {
        "No audio is attached; rely on the context text."
    };
    match attachments.images {
        0 => format!("{} No screenshots are attached.", audio),
        1 => format!("{} 1 screenshot is attached.", audio),
        n => format!("{} {} screenshots are attached in chronological order.", audio, n),
    }
}

/// Cap `text` at `cap` bytes, trimming the timeline before cutting.
pub fn cap_context(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }

    if let Some(trimmed) = trim_timeline(text, TIMELINE_KEEP) {
        if trimmed.len() <= cap {
            return trimmed;
        }
        return hard_truncate(&trimmed, cap);
    }

    hard_truncate(text, cap)
}

/// Keep the first and last `keep` timeline entries. `None` when there is no
/// timeline section or it is already short enough.
pub fn trim_timeline(text: &str, keep: usize) -> Option<String> {
    let start = text.find(TIMELINE_START)?;
    let body_start = start + TIMELINE_START.len();
    let body_end = text[body_start..]
        .find(TIMELINE_END)
        .map(|i| body_start + i)
        .unwrap_or(text.len());

    let entries: Vec<&str> = text[body_start..body_end]
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    if entries.len() <= keep * 2 {
        return None;
    }

    let omitted = entries.len() - keep * 2;
    let mut out = String::with_capacity(text.len() / 2);
    out.push_str(&text[..body_start]);
    out.push('\n');
    for entry in &entries[..keep] {
        out.push_str(entry);
        out.push('\n');
    }
    out.push_str(&format!("[... {} timeline entries omitted ...]\n", omitted));
    for entry in &entries[entries.len() - keep..] {
        out.push_str(entry);
        out.push('\n');
    }
    out.push_str(&text[body_end..]);
    Some(out)
}

fn hard_truncate(text: &str, cap: usize) -> String {
    let budget = cap.saturating_sub(TRUNCATION_MARKER.len());
    let mut end = budget.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_MARKER)
}
