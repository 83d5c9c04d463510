//! Named SSE events for an AI content stream.

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::content::BookAiSnapshot;
use crate::queue::{QueuePosition, TaskId};
use crate::taxonomy::ErrorDescriptor;

/// Payload of the `started` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedPayload {
    pub task_id: TaskId,
    pub queue_wait_ms: u64,
    pub running: usize,
    pub pending: usize,
    pub max_parallel: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStartPayload {
    pub book_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeltaPayload {
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDonePayload {
    pub message: String,
}

/// Payload of the terminal `done` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePayload {
    pub book_id: String,
    pub content: BookAiSnapshot,
    /// True when served from the cache without touching the queue.
    pub cached: bool,
}

/// One named event; the variant is the SSE event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Queued(QueuePosition),
    Queue(QueuePosition),
    Started(StartedPayload),
    MessageStart(MessageStartPayload),
    MessageDelta(MessageDeltaPayload),
    MessageDone(MessageDonePayload),
    Done(DonePayload),
    Error(ErrorDescriptor),
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued(_) => "queued",
            Self::Queue(_) => "queue",
            Self::Started(_) => "started",
            Self::MessageStart(_) => "message_start",
            Self::MessageDelta(_) => "message_delta",
            Self::MessageDone(_) => "message_done",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }

    /// `done` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }

    /// JSON body of the event, without the name.
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Queued(p) | Self::Queue(p) => serde_json::to_string(p),
            Self::Started(p) => serde_json::to_string(p),
            Self::MessageStart(p) => serde_json::to_string(p),
            Self::MessageDelta(p) => serde_json::to_string(p),
            Self::MessageDone(p) => serde_json::to_string(p),
            Self::Done(p) => serde_json::to_string(p),
            Self::Error(p) => serde_json::to_string(p),
        }
    }
}

/// A unit written to the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Event(StreamEvent),
    /// Comment frame that only keeps idle proxies from dropping the connection.
    Keepalive,
}

impl SseFrame {
    pub fn event(&self) -> Option<&StreamEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Keepalive => None,
        }
    }

    pub fn into_event(self) -> Option<StreamEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Keepalive => None,
        }
    }

    pub fn into_sse(self) -> Event {
        match self {
            Self::Keepalive => Event::default().comment("keepalive"),
            Self::Event(event) => {
                let data = event.data_json().unwrap_or_else(|e| {
                    error!(event = event.name(), error = %e, "Failed to serialise stream event");
                    "{}".to_string()
                });
                Event::default().event(event.name()).data(data)
            }
        }
    }
}

impl From<StreamEvent> for SseFrame {
    fn from(event: StreamEvent) -> Self {
        Self::Event(event)
    }
}
