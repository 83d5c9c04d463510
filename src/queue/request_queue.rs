//! Request queue: priority-ordered, bounded-parallelism scheduler for generation work.
//!
//! Pending tasks are ordered by `(priority, arrival)`: a lower priority number is served
//! first and ties go in arrival order. Ordering is strict, so sustained high-priority
//! load starves lower bands; there is no aging.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::task::{AbortReason, QueuedJob, TaskHandle, TaskId, TaskState, new_task};

/// Lowest priority number accepted at the HTTP boundary (served first).
pub const MIN_PRIORITY: i32 = 1;
/// Highest priority number accepted at the HTTP boundary (served last).
pub const MAX_PRIORITY: i32 = 10;

/// Clamp a caller-supplied priority into `MIN_PRIORITY..=MAX_PRIORITY`.
pub fn clamp_priority(priority: i64) -> i32 {
    priority.clamp(MIN_PRIORITY as i64, MAX_PRIORITY as i64) as i32
}

/// Point-in-time occupancy of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub running: usize,
    pub pending: usize,
    pub max_parallel: usize,
}

/// Where a task stands in the pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePosition {
    /// 1-based place in line; `None` once the task has left the pending list.
    pub position: Option<usize>,
    /// Number of pending tasks strictly ahead under `(priority, arrival)` ordering.
    pub ahead: Option<usize>,
    pub running: usize,
    pub pending: usize,
    pub max_parallel: usize,
    pub in_queue: bool,
}

/// `(priority, arrival sequence)` is the pending-list sort key.
type SlotKey = (i32, u64);

#[derive(Default)]
struct QueueState {
    pending: BTreeMap<SlotKey, Box<dyn QueuedJob>>,
    index: HashMap<TaskId, SlotKey>,
    running: HashSet<TaskId>,
    next_seq: u64,
    shut_down: bool,
}

impl QueueState {
    fn snapshot(&self, max_parallel: usize) -> QueueSnapshot {
        QueueSnapshot {
            running: self.running.len(),
            pending: self.pending.len(),
            max_parallel,
        }
    }
}

struct Inner {
    max_parallel: usize,
    state: Mutex<QueueState>,
}

impl Inner {
    /// Hand pending tasks to free worker slots until either runs out.
    fn admit(self: &Arc<Self>) {
        loop {
            let run = {
                let mut state = self.state.lock();
                if state.shut_down || state.running.len() >= self.max_parallel {
                    return;
                }
                let Some((key, job)) = state.pending.pop_first() else {
                    return;
                };
                let id = job.id();
                state.index.remove(&id);
                state.running.insert(id);
                debug!(
                    task_id = %id,
                    priority = key.0,
                    running = state.running.len(),
                    pending = state.pending.len(),
                    "Task admitted"
                );
                let slot = SlotGuard {
                    inner: Arc::clone(self),
                    id,
                };
                job.start(Box::new(slot))
            };
            tokio::spawn(run);
        }
    }

    fn release(self: &Arc<Self>, id: TaskId) {
        {
            let mut state = self.state.lock();
            state.running.remove(&id);
            debug!(
                task_id = %id,
                running = state.running.len(),
                pending = state.pending.len(),
                "Worker slot released"
            );
        }
        self.admit();
    }
}

/// Frees a worker slot when dropped, including when the runner future is dropped.
struct SlotGuard {
    inner: Arc<Inner>,
    id: TaskId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.release(self.id);
    }
}

/// In-memory priority queue with at most `max_parallel` tasks running at once.
///
/// Cloning is cheap; all clones share the same pending list and counters.
/// Enqueueing spawns onto the current Tokio runtime.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    /// Create a queue. A `max_parallel` of zero is treated as one.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_parallel: max_parallel.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Admit a new pending task. Never blocks; the work runs once a slot is free.
    pub fn enqueue<T, F, Fut>(&self, priority: i32, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (handle, job) = new_task(priority, work);
        let id = handle.id();

        {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                drop(state);
                debug!(task_id = %id, "Queue shut down, rejecting task");
                job.abort(AbortReason::Shutdown);
                return handle;
            }

            let key = (priority, state.next_seq);
            state.next_seq += 1;
            state.index.insert(id, key);
            state.pending.insert(key, job);

            info!(
                task_id = %id,
                priority,
                running = state.running.len(),
                pending = state.pending.len(),
                "Task enqueued"
            );
        }

        self.inner.admit();
        handle
    }

    /// Position of `id` in the pending list. Tasks that started, finished, were
    /// cancelled or never existed report `in_queue = false`.
    pub fn position(&self, id: TaskId) -> QueuePosition {
        let state = self.inner.state.lock();
        let snapshot = state.snapshot(self.inner.max_parallel);
        let ahead = state
            .index
            .get(&id)
            .map(|key| state.pending.range(..*key).count());

        QueuePosition {
            position: ahead.map(|n| n + 1),
            ahead,
            running: snapshot.running,
            pending: snapshot.pending,
            max_parallel: snapshot.max_parallel,
            in_queue: ahead.is_some(),
        }
    }

    /// Remove a task that has not started yet. Returns whether anything was removed;
    /// running or finished tasks are left alone.
    pub fn cancel_pending(&self, id: TaskId) -> bool {
        let job = {
            let mut state = self.inner.state.lock();
            let Some(key) = state.index.remove(&id) else {
                return false;
            };
            state.pending.remove(&key)
        };

        match job {
            Some(job) => {
                job.abort(AbortReason::Cancelled);
                info!(task_id = %id, "Pending task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.state.lock().snapshot(self.inner.max_parallel)
    }

    /// `Pending` or `Running` while the queue tracks the task, otherwise `None`.
    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        let state = self.inner.state.lock();
        if state.index.contains_key(&id) {
            Some(TaskState::Pending)
        } else if state.running.contains(&id) {
            Some(TaskState::Running)
        } else {
            None
        }
    }

    /// Stop admitting work and fail every pending task with `Shutdown`.
    /// Running tasks finish normally. Returns the number of tasks dropped.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Box<dyn QueuedJob>> = {
            let mut state = self.inner.state.lock();
            state.shut_down = true;
            state.index.clear();
            std::mem::take(&mut state.pending).into_values().collect()
        };

        let count = drained.len();
        for job in drained {
            job.abort(AbortReason::Shutdown);
        }
        info!(dropped = count, "Request queue shut down");
        count
    }
}
