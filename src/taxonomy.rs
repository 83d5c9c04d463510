//! Client-facing error taxonomy and the disclosure policy for failure messages.
//!
//! Every failure that leaves the service is normalised into an [`ErrorDescriptor`].
//! In production only the code's default message is sent; the underlying message is
//! always logged.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::content::GenerationError;
use crate::queue::TaskError;

/// Stable wire codes for AI content failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    IdentifierRequired,
    BookNotFound,
    ServiceUnavailable,
    QueueBusy,
    StreamTimeout,
    EmptyGeneration,
    CacheSerializationFailed,
    DescriptionTooShort,
    GenerationFailed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 9] = [
        Self::IdentifierRequired,
        Self::BookNotFound,
        Self::ServiceUnavailable,
        Self::QueueBusy,
        Self::StreamTimeout,
        Self::EmptyGeneration,
        Self::CacheSerializationFailed,
        Self::DescriptionTooShort,
        Self::GenerationFailed,
    ];

    /// Wire token, e.g. `QUEUE_BUSY`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentifierRequired => "IDENTIFIER_REQUIRED",
            Self::BookNotFound => "BOOK_NOT_FOUND",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::QueueBusy => "QUEUE_BUSY",
            Self::StreamTimeout => "STREAM_TIMEOUT",
            Self::EmptyGeneration => "EMPTY_GENERATION",
            Self::CacheSerializationFailed => "CACHE_SERIALIZATION_FAILED",
            Self::DescriptionTooShort => "DESCRIPTION_TOO_SHORT",
            Self::GenerationFailed => "GENERATION_FAILED",
        }
    }

    /// Whether the client may reasonably retry the same request.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueBusy
                | Self::StreamTimeout
                | Self::EmptyGeneration
                | Self::CacheSerializationFailed
                | Self::GenerationFailed
        )
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            Self::IdentifierRequired => "A book identifier is required.",
            Self::BookNotFound => "We couldn't find that book.",
            Self::ServiceUnavailable => "AI content is not available right now.",
            Self::QueueBusy => "The AI queue is busy. Please try again in a moment.",
            Self::StreamTimeout => "AI generation took too long. Please try again.",
            Self::EmptyGeneration => "The AI returned an empty response. Please try again.",
            Self::CacheSerializationFailed => {
                "The AI response could not be saved. Please try again."
            }
            Self::DescriptionTooShort => {
                "This book doesn't have enough description for AI content yet."
            }
            Self::GenerationFailed => "AI generation failed. Please try again.",
        }
    }

    /// Descriptor carrying the default message.
    pub fn descriptor(self) -> ErrorDescriptor {
        ErrorDescriptor {
            code: self,
            message: self.default_message().to_string(),
            retryable: self.retryable(),
        }
    }

    /// Map an internal failure to a code. Anything unrecognised is `GENERATION_FAILED`.
    pub fn classify(err: &anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<GenerationError>() {
            return e.code();
        }
        if let Some(e) = err.downcast_ref::<TaskError>() {
            return Self::for_task_error(e);
        }
        Self::GenerationFailed
    }

    pub fn for_task_error(err: &TaskError) -> Self {
        match err {
            TaskError::Failed(inner) => Self::classify(inner),
            TaskError::Shutdown => Self::ServiceUnavailable,
            TaskError::Cancelled | TaskError::Panicked(_) => Self::GenerationFailed,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

/// Deployment mode controlling how much failure detail reaches clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentMode {
    Production,
    Development,
}

impl EnvironmentMode {
    /// `"production"` (case-insensitive, trimmed), unset or blank → `Production`;
    /// any other value → `Development`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Production,
            Some(value) if value.eq_ignore_ascii_case("production") => Self::Production,
            Some(_) => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl Default for EnvironmentMode {
    fn default() -> Self {
        Self::Production
    }
}

/// Builds client-safe descriptors, logging the real cause every time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorDisclosure {
    mode: EnvironmentMode,
}

impl ErrorDisclosure {
    pub fn new(mode: EnvironmentMode) -> Self {
        Self { mode }
    }

    /// Descriptor for `code` whose underlying cause is `detail`.
    pub fn describe(&self, code: ErrorCode, detail: &str) -> ErrorDescriptor {
        if code.retryable() {
            error!(code = %code, detail = detail, "AI content request failed");
        } else {
            warn!(code = %code, detail = detail, "AI content request rejected");
        }

        let detail = detail.trim();
        let message = if self.mode.is_production() || detail.is_empty() {
            code.default_message().to_string()
        } else {
            detail.to_string()
        };

        ErrorDescriptor {
            code,
            message,
            retryable: code.retryable(),
        }
    }

    /// Classify `err` and describe it.
    pub fn describe_error(&self, err: &anyhow::Error) -> ErrorDescriptor {
        self.describe(ErrorCode::classify(err), &format!("{err:#}"))
    }

    pub fn describe_task_error(&self, err: &TaskError) -> ErrorDescriptor {
        self.describe(ErrorCode::for_task_error(err), &err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_match_codes() {
        let retryable: Vec<_> = ErrorCode::ALL
            .iter()
            .filter(|c| c.retryable())
            .map(|c| c.as_str())
            .collect();
        assert_eq!(retryable, vec![
            "QUEUE_BUSY",
            "STREAM_TIMEOUT",
            "EMPTY_GENERATION",
            "CACHE_SERIALIZATION_FAILED",
            "GENERATION_FAILED",
        ]);
    }

    #[test]
    fn wire_token_matches_serde() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, code.as_str());
        }
    }

    #[test]
    fn environment_mode_parsing() {
        assert_eq!(EnvironmentMode::parse(None), EnvironmentMode::Production);
        assert_eq!(EnvironmentMode::parse(Some("")), EnvironmentMode::Production);
        assert_eq!(EnvironmentMode::parse(Some("   ")), EnvironmentMode::Production);
        assert_eq!(EnvironmentMode::parse(Some(" Production ")), EnvironmentMode::Production);
        assert_eq!(EnvironmentMode::parse(Some("PRODUCTION")), EnvironmentMode::Production);
        assert_eq!(EnvironmentMode::parse(Some("dev")), EnvironmentMode::Development);
        assert_eq!(EnvironmentMode::parse(Some("staging")), EnvironmentMode::Development);
    }

    #[test]
    fn production_hides_underlying_message() {
        let disclosure = ErrorDisclosure::new(EnvironmentMode::Production);
        let err = anyhow::anyhow!("npe at line 42");

        let descriptor = disclosure.describe_error(&err);
        assert_eq!(descriptor.code, ErrorCode::GenerationFailed);
        assert_eq!(descriptor.message, ErrorCode::GenerationFailed.default_message());
        assert!(!descriptor.message.contains("npe at line 42"));
        assert!(descriptor.retryable);
    }

    #[test]
    fn development_forwards_underlying_message() {
        let disclosure = ErrorDisclosure::new(EnvironmentMode::Development);
        let err = anyhow::anyhow!("npe at line 42");

        let descriptor = disclosure.describe_error(&err);
        assert_eq!(descriptor.code, ErrorCode::GenerationFailed);
        assert_eq!(descriptor.message, "npe at line 42");
    }

    #[test]
    fn development_falls_back_to_default_for_blank_detail() {
        let disclosure = ErrorDisclosure::new(EnvironmentMode::Development);
        let descriptor = disclosure.describe(ErrorCode::QueueBusy, "  ");
        assert_eq!(descriptor.message, ErrorCode::QueueBusy.default_message());
    }

    #[test]
    fn typed_generation_errors_keep_their_code() {
        let err = anyhow::Error::new(GenerationError::EmptyOutput);
        assert_eq!(ErrorCode::classify(&err), ErrorCode::EmptyGeneration);

        let wrapped = anyhow::Error::new(GenerationError::EmptyOutput).context("finalising");
        assert_eq!(ErrorCode::classify(&wrapped), ErrorCode::EmptyGeneration);

        let task_err = TaskError::Failed(anyhow::Error::new(GenerationError::DescriptionTooShort {
            length: 3,
            minimum: 50,
        }));
        assert_eq!(ErrorCode::for_task_error(&task_err), ErrorCode::DescriptionTooShort);
        assert!(!ErrorCode::for_task_error(&task_err).retryable());
    }

    #[test]
    fn task_errors_fall_back_to_generation_failed() {
        assert_eq!(
            ErrorCode::for_task_error(&TaskError::Panicked("boom".into())),
            ErrorCode::GenerationFailed
        );
        assert_eq!(
            ErrorCode::for_task_error(&TaskError::Shutdown),
            ErrorCode::ServiceUnavailable
        );
    }
}
