//! Priority queue with bounded parallelism for AI generation work.

pub mod request_queue;
pub mod task;

pub use request_queue::{
    MAX_PRIORITY, MIN_PRIORITY, QueuePosition, QueueSnapshot, RequestQueue, clamp_priority,
};
pub use task::{TaskError, TaskHandle, TaskId, TaskState};
