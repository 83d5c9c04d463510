//! AI content service: validates a request, resolves the book, serves cached
//! content, and otherwise hands generation to the stream orchestrator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::model::{Book, BookAiSnapshot, GenerationError, GenerationRequest};
use super::parse::parse_snapshot;
use super::ports::{BookCatalog, ContentCache, ContentGenerator};
use crate::error::CacheError;
use crate::queue::{QueueSnapshot, clamp_priority};
use crate::stream::{SseFrame, StreamOrchestrator};
use crate::taxonomy::{ErrorCode, ErrorDescriptor};

/// Body of the queue status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub running: usize,
    pub pending: usize,
    pub max_parallel: usize,
    /// Whether a generator is configured at all.
    pub available: bool,
}

impl QueueStatus {
    fn new(snapshot: QueueSnapshot, available: bool) -> Self {
        Self {
            running: snapshot.running,
            pending: snapshot.pending,
            max_parallel: snapshot.max_parallel,
            available,
        }
    }
}

/// Result of a cached-content read for a known book.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedContent {
    Found(BookAiSnapshot),
    NotGenerated { book_id: String },
}

pub struct AiContentService {
    catalog: Arc<dyn BookCatalog>,
    cache: Arc<dyn ContentCache>,
    generator: Option<Arc<dyn ContentGenerator>>,
    orchestrator: StreamOrchestrator,
    priority: i32,
}

impl AiContentService {
    pub fn new(
        catalog: Arc<dyn BookCatalog>,
        cache: Arc<dyn ContentCache>,
        generator: Option<Arc<dyn ContentGenerator>>,
        orchestrator: StreamOrchestrator,
    ) -> Self {
        Self {
            catalog,
            cache,
            generator,
            orchestrator,
            priority: 5,
        }
    }

    /// Priority used for stream requests, clamped to the accepted range.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    pub fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    pub fn orchestrator(&self) -> &StreamOrchestrator {
        &self.orchestrator
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus::new(self.orchestrator.queue().snapshot(), self.is_available())
    }

    fn describe(&self, code: ErrorCode, detail: &str) -> ErrorDescriptor {
        self.orchestrator.disclosure().describe(code, detail)
    }

    /// Trim and resolve `identifier`, mapping every failure to a descriptor.
    async fn lookup(&self, identifier: &str) -> Result<Book, ErrorDescriptor> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(self.describe(ErrorCode::IdentifierRequired, "blank book identifier"));
        }

        match self.catalog.resolve(identifier).await {
            Ok(Some(book)) => Ok(book),
            Ok(None) => Err(self.describe(
                ErrorCode::BookNotFound,
                &format!("no book matches identifier {identifier:?}"),
            )),
            Err(e) => Err(self.describe(ErrorCode::GenerationFailed, &e.to_string())),
        }
    }

    /// Cached snapshot for `book_id`. Unreadable entries count as missing.
    async fn cached_snapshot(&self, book_id: &str) -> Option<BookAiSnapshot> {
        let json = match self.cache.get(book_id).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                warn!(book_id = book_id, error = %e, "Content cache read failed");
                return None;
            }
        };
        match decode_snapshot(book_id, &json) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(book_id = book_id, error = %e, "Discarding unreadable cached content");
                None
            }
        }
    }

    /// Open an AI content stream for `identifier`.
    pub async fn stream(&self, identifier: &str, refresh: bool) -> mpsc::Receiver<SseFrame> {
        let book = match self.lookup(identifier).await {
            Ok(book) => book,
            Err(descriptor) => return self.orchestrator.reject_with(descriptor),
        };

        if !refresh {
            if let Some(snapshot) = self.cached_snapshot(&book.id).await {
                return self.orchestrator.deliver_cached(&book.id, snapshot);
            }
        } else {
            debug!(book_id = %book.id, "Cache bypassed by refresh");
        }

        let Some(generator) = self.generator.clone() else {
            return self
                .orchestrator
                .reject(ErrorCode::ServiceUnavailable, "no content generator configured");
        };

        if let Err(e) = book.check_description() {
            return self.orchestrator.reject(e.code(), &e.to_string());
        }

        let book_id = book.id.clone();
        let model = generator.model_name().to_string();
        let cache = Arc::clone(&self.cache);
        let finalize_id = book_id.clone();

        self.orchestrator.open(
            &book_id,
            self.priority,
            move |sink| async move { generator.generate(GenerationRequest::new(book), sink).await },
            move |raw| async move {
                let snapshot = parse_snapshot(&raw, &finalize_id, &model)?;
                let json = serde_json::to_string(&snapshot).map_err(GenerationError::from)?;
                if let Err(e) = cache.put(&finalize_id, json).await {
                    warn!(book_id = %finalize_id, error = %e, "Failed to store generated content");
                } else {
                    info!(book_id = %finalize_id, "Generated content cached");
                }
                Ok::<_, anyhow::Error>(snapshot)
            },
        )
    }

    /// Read cached content without generating.
    pub async fn cached(&self, identifier: &str) -> Result<CachedContent, ErrorDescriptor> {
        let book = self.lookup(identifier).await?;
        Ok(match self.cached_snapshot(&book.id).await {
            Some(snapshot) => CachedContent::Found(snapshot),
            None => CachedContent::NotGenerated { book_id: book.id },
        })
    }
}

fn decode_snapshot(book_id: &str, json: &str) -> Result<BookAiSnapshot, CacheError> {
    serde_json::from_str(json).map_err(|source| CacheError::Corrupt {
        book_id: book_id.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::content::memory::{InMemoryCache, InMemoryCatalog};
    use crate::queue::RequestQueue;
    use crate::stream::{DeltaSink, StreamEvent, StreamSettings};
    use crate::taxonomy::{EnvironmentMode, ErrorDisclosure};

    struct Scripted(&'static str);

    #[async_trait]
    impl ContentGenerator for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: GenerationRequest,
            sink: DeltaSink,
        ) -> anyhow::Result<String> {
            sink.push(self.0).await;
            Ok(self.0.to_string())
        }
    }

    fn book(id: &str, description: &str) -> Book {
        Book {
            id: id.into(),
            title: format!("Title of {id}"),
            authors: vec![],
            isbn13: None,
            isbn10: None,
            slug: Some(format!("slug-{id}")),
            description: Some(description.into()),
            categories: vec![],
        }
    }

    fn long_description() -> String {
        "A sweeping story about memory, loss and the houses we build to keep them.".into()
    }

    fn service(
        generator: Option<Arc<dyn ContentGenerator>>,
    ) -> (AiContentService, Arc<InMemoryCache>) {
        let catalog = InMemoryCatalog::new(vec![
            book("long", &long_description()),
            book("short", "Too short."),
        ]);
        let cache = Arc::new(InMemoryCache::new());
        let orchestrator = StreamOrchestrator::new(
            RequestQueue::new(1),
            StreamSettings::default(),
            ErrorDisclosure::new(EnvironmentMode::Production),
        );
        let service =
            AiContentService::new(Arc::new(catalog), cache.clone(), generator, orchestrator);
        (service, cache)
    }

    async fn events(mut rx: mpsc::Receiver<SseFrame>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(frame) = rx.recv().await {
            out.extend(frame.into_event());
        }
        out
    }

    fn error_code(events: &[StreamEvent]) -> ErrorCode {
        match events.last() {
            Some(StreamEvent::Error(descriptor)) => descriptor.code,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_blank_and_unknown_identifiers() {
        let (service, _) = service(Some(Arc::new(Scripted("{}"))));

        let blank = events(service.stream("   ", false).await).await;
        assert_eq!(blank.len(), 1);
        assert_eq!(error_code(&blank), ErrorCode::IdentifierRequired);

        let unknown = events(service.stream("nope", false).await).await;
        assert_eq!(error_code(&unknown), ErrorCode::BookNotFound);
    }

    #[tokio::test]
    async fn short_description_never_reaches_queue() {
        let (service, _) = service(Some(Arc::new(Scripted("{}"))));
        let evs = events(service.stream("short", false).await).await;
        assert_eq!(error_code(&evs), ErrorCode::DescriptionTooShort);
        assert_eq!(service.status().pending, 0);
        assert_eq!(service.status().running, 0);
    }

    #[tokio::test]
    async fn unavailable_without_generator() {
        let (service, _) = service(None);
        assert!(!service.status().available);
        let evs = events(service.stream("long", false).await).await;
        assert_eq!(error_code(&evs), ErrorCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn generates_caches_then_serves_from_cache() {
        let raw = r#"{"summary": "Memory and loss.", "keyThemes": ["memory"]}"#;
        let (service, cache) = service(Some(Arc::new(Scripted(raw))));

        let first = events(service.stream(" slug-LONG ", false).await).await;
        match first.last() {
            Some(StreamEvent::Done(done)) => {
                assert!(!done.cached);
                assert_eq!(done.book_id, "long");
                assert_eq!(done.content.summary, "Memory and loss.");
                assert_eq!(done.content.model, "scripted");
            }
            other => panic!("expected done, got {other:?}"),
        }
        assert_eq!(cache.len(), 1);

        let second = events(service.stream("long", false).await).await;
        assert_eq!(second.len(), 1);
        match &second[0] {
            StreamEvent::Done(done) => {
                assert!(done.cached);
                assert_eq!(done.content.key_themes, vec!["memory"]);
            }
            other => panic!("expected done, got {other:?}"),
        }

        let refreshed = events(service.stream("long", true).await).await;
        assert_eq!(refreshed.first().map(StreamEvent::name), Some("queued"));

        match service.cached("long").await.unwrap() {
            CachedContent::Found(snapshot) => assert_eq!(snapshot.summary, "Memory and loss."),
            other => panic!("expected cached content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_generation_is_not_cached() {
        let (service, cache) = service(Some(Arc::new(Scripted("  "))));
        let evs = events(service.stream("long", false).await).await;
        assert_eq!(error_code(&evs), ErrorCode::EmptyGeneration);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_regenerated() {
        let (service, cache) = service(Some(Arc::new(Scripted("Plain text summary."))));
        cache.put("long", "{broken".into()).await.unwrap();

        let evs = events(service.stream("long", false).await).await;
        match evs.last() {
            Some(StreamEvent::Done(done)) => {
                assert!(!done.cached);
                assert_eq!(done.content.summary, "Plain text summary.");
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn corrupt_cache_entry_reads_as_not_generated() {
        let (service, cache) = service(None);
        cache.put("long", "{broken".into()).await.unwrap();

        let err = decode_snapshot("long", "{broken").unwrap_err();
        assert!(matches!(&err, CacheError::Corrupt { book_id, .. } if book_id == "long"));
        assert!(err.to_string().starts_with("Cached entry for long is corrupt"));

        assert_eq!(
            service.cached("long").await.unwrap(),
            CachedContent::NotGenerated {
                book_id: "long".into()
            }
        );
    }

    #[tokio::test]
    async fn cached_read_reports_missing_content() {
        let (service, _) = service(None);
        assert_eq!(
            service.cached("long").await.unwrap(),
            CachedContent::NotGenerated {
                book_id: "long".into()
            }
        );
        assert_eq!(
            service.cached("").await.unwrap_err().code,
            ErrorCode::IdentifierRequired
        );
    }
}
