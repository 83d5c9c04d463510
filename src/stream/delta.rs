//! Callback handed to generation work for pushing incremental output.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// Receives chunks of output as the generator produces them.
#[async_trait]
pub trait DeltaListener: Send + Sync {
    async fn on_delta(&self, chunk: String);
}

/// Cloneable handle to a [`DeltaListener`]. Empty chunks are dropped.
#[derive(Clone)]
pub struct DeltaSink {
    listener: Option<Arc<dyn DeltaListener>>,
}

impl DeltaSink {
    pub fn new(listener: Arc<dyn DeltaListener>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    /// A sink that ignores everything.
    pub fn discard() -> Self {
        Self { listener: None }
    }

    pub async fn push(&self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        if let Some(listener) = &self.listener {
            listener.on_delta(chunk).await;
        }
    }
}

impl fmt::Debug for DeltaSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaSink")
            .field("attached", &self.listener.is_some())
            .finish()
    }
}
