//! HTTP endpoints for AI book content.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::get,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::debug;

use super::service::{AiContentService, CachedContent};
use crate::taxonomy::{ErrorCode, ErrorDescriptor};

/// Build the router for the AI content endpoints and health check.
pub fn ai_content_routes(service: Arc<AiContentService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/ai/content/queue", get(queue_status))
        .route("/api/books/{identifier}/ai/content", get(cached_content))
        .route("/api/books/{identifier}/ai/content/stream", get(stream_content))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// HTTP status for a descriptor returned outside a stream.
fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::IdentifierRequired | ErrorCode::DescriptionTooShort => StatusCode::BAD_REQUEST,
        ErrorCode::BookNotFound => StatusCode::NOT_FOUND,
        ErrorCode::ServiceUnavailable | ErrorCode::QueueBusy => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::StreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::EmptyGeneration
        | ErrorCode::CacheSerializationFailed
        | ErrorCode::GenerationFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(descriptor: ErrorDescriptor) -> Response {
    (status_for(descriptor.code), Json(descriptor)).into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "bookfinder-ai"
    }))
}

// ── Queue ───────────────────────────────────────────────────────────────

async fn queue_status(State(service): State<Arc<AiContentService>>) -> impl IntoResponse {
    Json(service.status())
}

// ── Content ─────────────────────────────────────────────────────────────

async fn cached_content(
    State(service): State<Arc<AiContentService>>,
    Path(identifier): Path<String>,
) -> Response {
    match service.cached(&identifier).await {
        Ok(CachedContent::Found(snapshot)) => Json(snapshot).into_response(),
        Ok(CachedContent::NotGenerated { book_id }) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "bookId": book_id, "content": null })),
        )
            .into_response(),
        Err(descriptor) => error_response(descriptor),
    }
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    refresh: bool,
}

async fn stream_content(
    State(service): State<Arc<AiContentService>>,
    Path(identifier): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(identifier = %identifier, refresh = query.refresh, "AI content stream requested");
    let rx = service.stream(&identifier, query.refresh).await;
    Sse::new(ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.into_sse())))
}
