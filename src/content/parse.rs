//! Turning raw model output into a [`BookAiSnapshot`].

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use super::model::{BookAiSnapshot, GenerationError};

/// The JSON shape the prompt asks for. Missing fields are tolerated.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Draft {
    #[serde(default)]
    summary: String,
    #[serde(default, alias = "reader_fit")]
    reader_fit: Option<String>,
    #[serde(default, alias = "key_themes", alias = "themes")]
    key_themes: Vec<String>,
}

/// Pull a JSON object out of model output that may be fenced or surrounded by prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Build a snapshot from raw output. Blank output is an error; output without a
/// usable JSON object becomes the summary verbatim.
pub fn parse_snapshot(
    raw: &str,
    book_id: &str,
    model: &str,
) -> Result<BookAiSnapshot, GenerationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(GenerationError::EmptyOutput);
    }

    let draft = match extract_json_object(text).map(serde_json::from_str::<Draft>) {
        Some(Ok(draft)) if !draft.summary.trim().is_empty() => draft,
        Some(Ok(_)) => {
            debug!(book_id = book_id, "Generated JSON had no summary, using raw text");
            Draft::default()
        }
        Some(Err(e)) => {
            warn!(book_id = book_id, error = %e, "Generated JSON did not parse, using raw text");
            Draft::default()
        }
        None => Draft::default(),
    };

    let summary = if draft.summary.trim().is_empty() {
        text.to_string()
    } else {
        draft.summary.trim().to_string()
    };

    Ok(BookAiSnapshot {
        book_id: book_id.to_string(),
        summary,
        reader_fit: draft
            .reader_fit
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        key_themes: draft
            .key_themes
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        model: model.to_string(),
        generated_at: Utc::now(),
    })
}
