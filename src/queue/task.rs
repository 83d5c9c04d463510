//! Task handle: identity plus the `started` / `result` signals for one unit of queued work.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Opaque identifier of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the pending list.
    Pending,
    /// Handed to a worker slot.
    Running,
    /// Work returned (successfully or not).
    Completed,
    /// Removed from the pending list before it started.
    Cancelled,
}

impl TaskState {
    /// Transitions are monotonic: `Pending → Running → Completed` or `Pending → Cancelled`.
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Cancelled) | (Running, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Failure delivered through [`TaskHandle::started`] or [`TaskHandle::result`].
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task was cancelled before it started")]
    Cancelled,

    #[error("Queue shut down before the task started")]
    Shutdown,

    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Why a pending task left the queue without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortReason {
    Cancelled,
    Shutdown,
}

impl AbortReason {
    fn into_error(self) -> TaskError {
        match self {
            Self::Cancelled => TaskError::Cancelled,
            Self::Shutdown => TaskError::Shutdown,
        }
    }
}

/// Shared view of a task's state. Only legal transitions are applied.
#[derive(Debug, Clone)]
struct StateCell(Arc<Mutex<TaskState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(TaskState::Pending)))
    }

    fn get(&self) -> TaskState {
        *self.0.lock()
    }

    fn advance(&self, target: TaskState) -> bool {
        let mut state = self.0.lock();
        if state.can_transition_to(target) {
            *state = target;
            true
        } else {
            false
        }
    }
}

enum StartSignal {
    Waiting(oneshot::Receiver<Result<(), TaskError>>),
    Started,
    Aborted(AbortReason),
}

/// Caller-side half of a queued task.
///
/// `started()` resolves when the task is handed to a worker slot; `result()` resolves
/// exactly once with the work's value or its failure.
pub struct TaskHandle<T> {
    id: TaskId,
    priority: i32,
    enqueued_at: Instant,
    state: StateCell,
    started: StartSignal,
    result_rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Time elapsed since the task was enqueued.
    pub fn queue_wait(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Wait until the task transitions `Pending → Running`.
    ///
    /// Cancel-safe: dropping the returned future leaves the signal intact. Calling it
    /// again after it resolved returns the same outcome immediately.
    pub async fn started(&mut self) -> Result<(), TaskError> {
        let outcome = match &mut self.started {
            StartSignal::Started => return Ok(()),
            StartSignal::Aborted(reason) => return Err(reason.into_error()),
            StartSignal::Waiting(rx) => rx.await.unwrap_or(Err(TaskError::Shutdown)),
        };

        self.started = match &outcome {
            Ok(()) => StartSignal::Started,
            Err(TaskError::Shutdown) => StartSignal::Aborted(AbortReason::Shutdown),
            Err(_) => StartSignal::Aborted(AbortReason::Cancelled),
        };
        outcome
    }

    /// Wait for the work's outcome.
    pub async fn result(self) -> Result<T, TaskError> {
        self.result_rx.await.unwrap_or(Err(TaskError::Shutdown))
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Token held for as long as a task occupies a worker slot; dropping it frees the slot.
pub(crate) type WorkerSlot = Box<dyn Send>;

/// Queue-side half of a task, type-erased so the pending list can hold mixed outputs.
pub(crate) trait QueuedJob: Send {
    fn id(&self) -> TaskId;

    /// Move the task to `Running`, resolve `started`, and return the future that runs the work.
    /// `slot` is dropped once the work has finished, before `result` resolves.
    fn start(self: Box<Self>, slot: WorkerSlot) -> BoxFuture<'static, ()>;

    /// Resolve both signals with a failure without running the work.
    fn abort(self: Box<Self>, reason: AbortReason);
}

struct Job<T, F> {
    id: TaskId,
    state: StateCell,
    started_tx: oneshot::Sender<Result<(), TaskError>>,
    result_tx: oneshot::Sender<Result<T, TaskError>>,
    work: F,
}

impl<T, F, Fut> QueuedJob for Job<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    fn id(&self) -> TaskId {
        self.id
    }

    fn start(self: Box<Self>, slot: WorkerSlot) -> BoxFuture<'static, ()> {
        let Job {
            id,
            state,
            started_tx,
            result_tx,
            work,
        } = *self;

        state.advance(TaskState::Running);
        let _ = started_tx.send(Ok(()));

        async move {
            // Spawned separately so a panicking work body surfaces as a JoinError.
            let outcome = match tokio::spawn(async move { work().await }).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(e) => {
                    tracing::error!(task_id = %id, error = %e, "Task body panicked");
                    Err(TaskError::Panicked(e.to_string()))
                }
            };
            state.advance(TaskState::Completed);
            drop(slot);
            let _ = result_tx.send(outcome);
        }
        .boxed()
    }

    fn abort(self: Box<Self>, reason: AbortReason) {
        self.state.advance(TaskState::Cancelled);
        let _ = self.started_tx.send(Err(reason.into_error()));
        let _ = self.result_tx.send(Err(reason.into_error()));
    }
}

/// Create both halves of a new pending task.
pub(crate) fn new_task<T, F, Fut>(priority: i32, work: F) -> (TaskHandle<T>, Box<dyn QueuedJob>)
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let id = TaskId::new();
    let state = StateCell::new();
    let (started_tx, started_rx) = oneshot::channel();
    let (result_tx, result_rx) = oneshot::channel();

    let handle = TaskHandle {
        id,
        priority,
        enqueued_at: Instant::now(),
        state: state.clone(),
        started: StartSignal::Waiting(started_rx),
        result_rx,
    };
    let job = Job {
        id,
        state,
        started_tx,
        result_tx,
        work,
    };

    (handle, Box::new(job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_are_monotonic() {
        use TaskState::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));

        assert!(!Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[tokio::test]
    async fn abort_resolves_both_signals() {
        let (mut handle, job) = new_task(3, || async { Ok(1u32) });
        assert_eq!(handle.state(), TaskState::Pending);

        job.abort(AbortReason::Cancelled);

        assert!(matches!(handle.started().await, Err(TaskError::Cancelled)));
        // A second call reports the same outcome.
        assert!(matches!(handle.started().await, Err(TaskError::Cancelled)));
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert!(matches!(handle.result().await, Err(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn start_runs_work_and_completes() {
        let (mut handle, job) = new_task(3, || async { Ok("done".to_string()) });

        job.start(Box::new(())).await;

        assert!(handle.started().await.is_ok());
        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(handle.result().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn cancel_after_start_does_not_move_state_backward() {
        let state = StateCell::new();
        assert!(state.advance(TaskState::Running));
        assert!(!state.advance(TaskState::Cancelled));
        assert_eq!(state.get(), TaskState::Running);
    }
}
