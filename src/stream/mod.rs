//! Server-sent event streams that follow a queued generation task.

pub mod delta;
pub mod emitter;
pub mod event;
pub mod orchestrator;

pub use delta::{DeltaListener, DeltaSink};
pub use emitter::{EmitError, Emitter};
pub use event::{
    DonePayload, MessageDeltaPayload, MessageDonePayload, MessageStartPayload, SseFrame,
    StartedPayload, StreamEvent,
};
pub use orchestrator::{CloseReason, ErrorOrDone, StreamOrchestrator, StreamSession, StreamSettings};
