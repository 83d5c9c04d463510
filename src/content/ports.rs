//! Collaborators the content service depends on.

use async_trait::async_trait;

use super::model::{Book, GenerationRequest};
use crate::error::{CacheError, CatalogError};
use crate::stream::DeltaSink;

/// Read-only book lookup.
#[async_trait]
pub trait BookCatalog: Send + Sync {
    /// Resolve a trimmed, non-blank identifier (id, ISBN or slug) to a book.
    async fn resolve(&self, identifier: &str) -> Result<Option<Book>, CatalogError>;
}

/// Stores finished content as serialised JSON, keyed by book id.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn get(&self, book_id: &str) -> Result<Option<String>, CacheError>;

    async fn put(&self, book_id: &str, json: String) -> Result<(), CacheError>;
}

/// The external model that writes content.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Name recorded in generated snapshots.
    fn model_name(&self) -> &str;

    /// Generate raw output for `request`, pushing partial text into `sink` as it arrives.
    async fn generate(&self, request: GenerationRequest, sink: DeltaSink) -> anyhow::Result<String>;
}
