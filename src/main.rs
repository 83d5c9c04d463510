use std::sync::Arc;

use bookfinder_ai::config::AppConfig;
use bookfinder_ai::content::{
    AiContentService, BookCatalog, ContentGenerator, InMemoryCache, InMemoryCatalog,
    PreviewGenerator, ai_content_routes,
};
use bookfinder_ai::error::Result;
use bookfinder_ai::queue::RequestQueue;
use bookfinder_ai::stream::{StreamOrchestrator, StreamSettings};
use bookfinder_ai::taxonomy::ErrorDisclosure;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("📚 BookFinder AI v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {:?}", config.environment);
    eprintln!(
        "   Queue: max {} parallel, busy at {} pending, priority {}",
        config.max_parallel, config.queue_threshold, config.priority
    );

    // ── Catalog ─────────────────────────────────────────────────────────
    let catalog = match &config.catalog_path {
        Some(path) => InMemoryCatalog::load(path)?,
        None => InMemoryCatalog::default(),
    };
    eprintln!("   Catalog: {} books", catalog.len());
    let catalog: Arc<dyn BookCatalog> = Arc::new(catalog);

    // ── Generator ───────────────────────────────────────────────────────
    let generator: Option<Arc<dyn ContentGenerator>> = if config.preview_generator {
        eprintln!("   Generator: local preview");
        Some(Arc::new(PreviewGenerator::default()))
    } else {
        eprintln!("   Generator: none (AI content unavailable)");
        None
    };

    // ── Queue + streams ─────────────────────────────────────────────────
    let queue = RequestQueue::new(config.max_parallel);
    let settings = StreamSettings {
        admission_threshold: config.queue_threshold,
        ..StreamSettings::default()
    };
    let orchestrator =
        StreamOrchestrator::new(queue.clone(), settings, ErrorDisclosure::new(config.environment));

    let cache = Arc::new(InMemoryCache::new());
    let service = AiContentService::new(catalog, cache, generator, orchestrator)
        .with_priority(config.priority as i64);
    let app = ai_content_routes(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    eprintln!("   HTTP: http://0.0.0.0:{}/health\n", config.port);
    tracing::info!(port = config.port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(queue))
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Resolves on Ctrl-C after withdrawing all pending generation work.
async fn shutdown_signal(queue: RequestQueue) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    let dropped = queue.shutdown();
    tracing::info!(dropped, "Shutting down, pending AI tasks dropped");
}
