//! Local preview generator. Builds content from catalog metadata and streams it in
//! chunks, so the full pipeline can run without an external model.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::model::GenerationRequest;
use super::ports::ContentGenerator;
use crate::stream::DeltaSink;

pub const PREVIEW_MODEL: &str = "bookfinder-preview";

pub struct PreviewGenerator {
    chunk_chars: usize,
    chunk_delay: Duration,
}

impl Default for PreviewGenerator {
    fn default() -> Self {
        Self {
            chunk_chars: 24,
            chunk_delay: Duration::from_millis(40),
        }
    }
}

impl PreviewGenerator {
    pub fn new(chunk_chars: usize, chunk_delay: Duration) -> Self {
        Self {
            chunk_chars: chunk_chars.max(1),
            chunk_delay,
        }
    }

    fn render(request: &GenerationRequest) -> String {
        let book = &request.book;
        let description = book.description_text();
        let summary = first_sentences(description, 2);

        let reader_fit = match book.categories.first() {
            Some(category) => format!("Readers who enjoy {}.", category.to_lowercase()),
            None => format!("Anyone curious about {}.", book.title),
        };

        serde_json::json!({
            "summary": summary,
            "readerFit": reader_fit,
            "keyThemes": book.categories.iter().take(5).collect::<Vec<_>>(),
        })
        .to_string()
    }
}

/// Up to `count` sentences from the start of `text`.
fn first_sentences(text: &str, count: usize) -> String {
    let mut end = text.len();
    let mut seen = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            seen += 1;
            if seen == count {
                end = i + c.len_utf8();
                break;
            }
        }
    }
    text[..end].trim().to_string()
}

#[async_trait]
impl ContentGenerator for PreviewGenerator {
    fn model_name(&self) -> &str {
        PREVIEW_MODEL
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        sink: DeltaSink,
    ) -> anyhow::Result<String> {
        let output = Self::render(&request);
        debug!(book_id = %request.book.id, chars = output.len(), "Streaming preview content");

        let chars: Vec<char> = output.chars().collect();
        for chunk in chars.chunks(self.chunk_chars) {
            sink.push(chunk.iter().collect::<String>()).await;
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }
        Ok(output)
    }
}
