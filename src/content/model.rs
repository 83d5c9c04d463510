//! Data types for AI-generated book content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::taxonomy::ErrorCode;

/// Descriptions shorter than this (after trimming) don't carry enough signal to generate from.
pub const MIN_DESCRIPTION_LENGTH: usize = 50;

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub isbn13: Option<String>,
    #[serde(default)]
    pub isbn10: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl Book {
    /// Trimmed description, empty when missing.
    pub fn description_text(&self) -> &str {
        self.description.as_deref().map(str::trim).unwrap_or_default()
    }

    /// Reject books whose description is too short to generate from.
    pub fn check_description(&self) -> Result<(), GenerationError> {
        let length = self.description_text().chars().count();
        if length < MIN_DESCRIPTION_LENGTH {
            return Err(GenerationError::DescriptionTooShort {
                length,
                minimum: MIN_DESCRIPTION_LENGTH,
            });
        }
        Ok(())
    }
}

/// The persisted result of one generation, delivered by `done` and served from cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAiSnapshot {
    pub book_id: String,
    pub summary: String,
    #[serde(default)]
    pub reader_fit: Option<String>,
    #[serde(default)]
    pub key_themes: Vec<String>,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

/// Input handed to a [`ContentGenerator`](super::ContentGenerator).
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub book: Book,
}

impl GenerationRequest {
    pub fn new(book: Book) -> Self {
        Self { book }
    }

    pub fn system_prompt(&self) -> &'static str {
        "You write short, spoiler-free reading guides for a book discovery app. \
         Respond with a single JSON object with the fields \"summary\" (2-3 sentences), \
         \"readerFit\" (one sentence on who will enjoy it) and \"keyThemes\" \
         (3-5 short phrases). Do not add any other text."
    }

    pub fn user_prompt(&self) -> String {
        let book = &self.book;
        let mut prompt = format!("Title: {}\n", book.title);
        if !book.authors.is_empty() {
            prompt.push_str(&format!("Authors: {}\n", book.authors.join(", ")));
        }
        if !book.categories.is_empty() {
            prompt.push_str(&format!("Categories: {}\n", book.categories.join(", ")));
        }
        prompt.push_str(&format!("Description: {}\n", book.description_text()));
        prompt
    }
}

/// Typed failures raised while generating or finalising content.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generator returned no content")]
    EmptyOutput,

    #[error("Description has {length} characters, at least {minimum} required")]
    DescriptionTooShort { length: usize, minimum: usize },

    #[error("Failed to serialise content for cache: {0}")]
    CacheSerialization(#[from] serde_json::Error),

    #[error("Generator {generator} failed: {reason}")]
    Upstream { generator: String, reason: String },
}

impl GenerationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EmptyOutput => ErrorCode::EmptyGeneration,
            Self::DescriptionTooShort { .. } => ErrorCode::DescriptionTooShort,
            Self::CacheSerialization(_) => ErrorCode::CacheSerializationFailed,
            Self::Upstream { .. } => ErrorCode::GenerationFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(description: Option<&str>) -> Book {
        Book {
            id: "b1".into(),
            title: "The Left Hand of Darkness".into(),
            authors: vec!["Ursula K. Le Guin".into()],
            isbn13: None,
            isbn10: None,
            slug: None,
            description: description.map(String::from),
            categories: vec!["Science Fiction".into()],
        }
    }

    #[test]
    fn short_or_missing_description_is_rejected() {
        let err = book(None).check_description().unwrap_err();
        assert!(matches!(err, GenerationError::DescriptionTooShort { length: 0, minimum: 50 }));

        let padded = format!("   {}   ", "x".repeat(49));
        assert!(book(Some(&padded)).check_description().is_err());

        let ok = "y".repeat(50);
        assert!(book(Some(&ok)).check_description().is_ok());
    }

    #[test]
    fn prompt_includes_book_metadata() {
        let request =
            GenerationRequest::new(book(Some("An envoy visits a planet of ambisexual people.")));
        let prompt = request.user_prompt();
        assert!(prompt.contains("Title: The Left Hand of Darkness"));
        assert!(prompt.contains("Authors: Ursula K. Le Guin"));
        assert!(prompt.contains("Categories: Science Fiction"));
    }

    #[test]
    fn snapshot_serialises_camel_case() {
        let snapshot = BookAiSnapshot {
            book_id: "b1".into(),
            summary: "s".into(),
            reader_fit: Some("fans of slow sci-fi".into()),
            key_themes: vec!["gender".into()],
            model: "preview".into(),
            generated_at: Utc::now(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["bookId"], "b1");
        assert_eq!(json["readerFit"], "fans of slow sci-fi");
        assert_eq!(json["keyThemes"][0], "gender");
        assert!(json.get("generatedAt").is_some());
    }

    #[test]
    fn error_codes() {
        assert_eq!(GenerationError::EmptyOutput.code(), ErrorCode::EmptyGeneration);
        let upstream = GenerationError::Upstream {
            generator: "preview".into(),
            reason: "503".into(),
        };
        assert_eq!(upstream.code(), ErrorCode::GenerationFailed);
    }
}
