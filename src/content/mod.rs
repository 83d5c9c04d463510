//! AI-generated book content: data model, collaborators, and the HTTP surface.

pub mod memory;
pub mod model;
pub mod parse;
pub mod ports;
pub mod preview;
pub mod routes;
pub mod service;

pub use memory::{InMemoryCache, InMemoryCatalog};
pub use model::{Book, BookAiSnapshot, GenerationError, GenerationRequest, MIN_DESCRIPTION_LENGTH};
pub use ports::{BookCatalog, ContentCache, ContentGenerator};
pub use preview::PreviewGenerator;
pub use routes::ai_content_routes;
pub use service::{AiContentService, CachedContent, QueueStatus};
