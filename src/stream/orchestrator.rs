//! Stream orchestrator: drives one push channel through the life of one queued task.
//!
//! Event order per stream: `queued`, zero or more `queue` updates while pending,
//! `started`, then `message_start` / `message_delta` as the work streams output,
//! `message_done` when it returns, and finally exactly one of `done` or `error`.
//! A keepalive comment frame is written every keepalive interval for the whole
//! life of the stream.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use super::delta::{DeltaListener, DeltaSink};
use super::emitter::{EmitError, Emitter};
use super::event::{
    DonePayload, MessageDeltaPayload, MessageDonePayload, MessageStartPayload, SseFrame,
    StartedPayload, StreamEvent,
};
use crate::content::BookAiSnapshot;
use crate::queue::{RequestQueue, TaskHandle, TaskId};
use crate::taxonomy::{ErrorCode, ErrorDescriptor, ErrorDisclosure};

/// Timing and admission knobs for AI content streams.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// How often `queue` position updates are written while pending.
    pub position_interval: Duration,
    /// How often a keepalive comment is written.
    pub keepalive_interval: Duration,
    /// Absolute ceiling from stream start to terminal event.
    pub timeout: Duration,
    /// New streams are rejected with `QUEUE_BUSY` once this many tasks are pending.
    pub admission_threshold: usize,
    /// Frames buffered between the emitter and the transport.
    pub channel_capacity: usize,
    /// A client that accepts no frame for this long is treated as gone.
    pub stall_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            position_interval: Duration::from_millis(350),
            keepalive_interval: Duration::from_secs(15),
            timeout: Duration::from_secs(240),
            admission_threshold: 5,
            channel_capacity: 64,
            stall_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Completed,
    Failed,
    Timeout,
    TransportFailed,
    ClientDisconnected,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::TransportFailed => "transport_failed",
            Self::ClientDisconnected => "client_disconnected",
        };
        write!(f, "{s}")
    }
}

/// What interrupted a wait in the driver.
enum Interrupt {
    Timeout,
    Disconnected,
    Closed,
}

/// Per-connection state. `closed` decides which close path wins; the winner alone
/// stops the tickers, cancels the pending task and closes the channel.
pub struct StreamSession {
    book_id: String,
    task_id: OnceLock<TaskId>,
    closed: AtomicBool,
    message_started: AtomicBool,
    emitter: Emitter,
    tickers: Mutex<Vec<JoinHandle<()>>>,
    queue: RequestQueue,
    disclosure: ErrorDisclosure,
    close_tx: watch::Sender<bool>,
    stall_timeout: Duration,
    opened_at: Instant,
}

impl StreamSession {
    fn new(
        book_id: String,
        queue: RequestQueue,
        disclosure: ErrorDisclosure,
        settings: &StreamSettings,
    ) -> (Arc<Self>, mpsc::Receiver<SseFrame>) {
        let (emitter, rx) = Emitter::channel(settings.channel_capacity);
        let (close_tx, _) = watch::channel(false);
        let session = Arc::new(Self {
            book_id,
            task_id: OnceLock::new(),
            closed: AtomicBool::new(false),
            message_started: AtomicBool::new(false),
            emitter,
            tickers: Mutex::new(Vec::new()),
            queue,
            disclosure,
            close_tx,
            stall_timeout: settings.stall_timeout,
            opened_at: Instant::now(),
        });
        (session, rx)
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write a non-terminal frame. A failed or stalled write closes the stream.
    async fn send(&self, frame: SseFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        match tokio::time::timeout(self.stall_timeout, self.emitter.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(EmitError::Closed)) => false,
            Ok(Err(EmitError::Disconnected)) => {
                self.close(CloseReason::TransportFailed, None).await;
                false
            }
            Err(_) => {
                warn!(
                    book_id = %self.book_id,
                    stall_ms = self.stall_timeout.as_millis() as u64,
                    "Client stopped reading AI content stream"
                );
                self.close(CloseReason::TransportFailed, None).await;
                false
            }
        }
    }

    async fn emit(&self, event: StreamEvent) -> bool {
        debug_assert!(!event.is_terminal(), "terminal events go through close()");
        self.send(SseFrame::Event(event)).await
    }

    /// Close the stream once. Returns false if another path already closed it.
    pub async fn close(&self, reason: CloseReason, terminal: Option<ErrorOrDone>) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if let Some(task_id) = self.task_id() {
            self.queue.cancel_pending(task_id);
        }

        let last = terminal.map(|t| SseFrame::Event(t.into_event()));
        if let Err(e) = self.emitter.finish(last).await {
            debug!(book_id = %self.book_id, error = %e, "Terminal frame not delivered");
        }

        // Aborted last: the closer may itself be one of the tickers.
        for ticker in self.tickers.lock().drain(..) {
            ticker.abort();
        }
        self.close_tx.send_replace(true);

        info!(
            book_id = %self.book_id,
            task_id = ?self.task_id(),
            reason = %reason,
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            "AI content stream closed"
        );
        true
    }

    async fn fail(&self, descriptor: ErrorDescriptor) -> bool {
        self.close(CloseReason::Failed, Some(ErrorOrDone::Error(descriptor)))
            .await
    }

    fn spawn_tickers(self: &Arc<Self>, settings: &StreamSettings) {
        let Some(task_id) = self.task_id() else {
            return;
        };

        let session = Arc::clone(self);
        let period = settings.position_interval;
        let position = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if session.is_closed() {
                    break;
                }
                match session
                    .emitter
                    .send_position(|| session.queue.position(task_id))
                    .await
                {
                    Ok(true) => {}
                    Ok(false) | Err(EmitError::Closed) => break,
                    Err(EmitError::Disconnected) => {
                        session.close(CloseReason::TransportFailed, None).await;
                        break;
                    }
                }
            }
        });

        let session = Arc::clone(self);
        let period = settings.keepalive_interval;
        let keepalive = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !session.send(SseFrame::Keepalive).await {
                    break;
                }
            }
        });

        let mut tickers = self.tickers.lock();
        tickers.push(position);
        tickers.push(keepalive);
        if self.is_closed() {
            for ticker in tickers.drain(..) {
                ticker.abort();
            }
        }
    }

    /// Wait for `fut` unless the deadline passes, the client leaves, or another path closes
    /// the stream. Interruptions close the stream as appropriate and yield `None`.
    async fn guard<F: Future>(
        &self,
        fut: F,
        deadline: Pin<&mut Sleep>,
        timeout: Duration,
    ) -> Option<F::Output> {
        let interrupt = tokio::select! {
            out = fut => return Some(out),
            _ = deadline => Interrupt::Timeout,
            _ = self.emitter.disconnected() => Interrupt::Disconnected,
            _ = wait_closed(self.close_tx.subscribe()) => Interrupt::Closed,
        };

        match interrupt {
            Interrupt::Timeout => {
                let detail = format!("No terminal event within {}s", timeout.as_secs());
                let descriptor = self.disclosure.describe(ErrorCode::StreamTimeout, &detail);
                self.close(CloseReason::Timeout, Some(ErrorOrDone::Error(descriptor)))
                    .await;
            }
            Interrupt::Disconnected => {
                self.close(CloseReason::ClientDisconnected, None).await;
            }
            Interrupt::Closed => {}
        }
        None
    }

    async fn drive<Fin, FinFut>(
        self: Arc<Self>,
        mut handle: TaskHandle<String>,
        start_gate: oneshot::Sender<()>,
        finalize: Fin,
        settings: StreamSettings,
    ) where
        Fin: FnOnce(String) -> FinFut + Send + 'static,
        FinFut: Future<Output = anyhow::Result<BookAiSnapshot>> + Send + 'static,
    {
        let task_id = handle.id();
        let deadline = tokio::time::sleep(settings.timeout);
        tokio::pin!(deadline);

        if !self.emit(StreamEvent::Queued(self.queue.position(task_id))).await {
            return;
        }
        self.spawn_tickers(&settings);

        let started = match self
            .guard(handle.started(), deadline.as_mut(), settings.timeout)
            .await
        {
            Some(started) => started,
            None => return,
        };
        if let Err(e) = started {
            self.fail(self.disclosure.describe_task_error(&e)).await;
            return;
        }

        let snapshot = self.queue.snapshot();
        let started = StartedPayload {
            task_id,
            queue_wait_ms: handle.queue_wait().as_millis() as u64,
            running: snapshot.running,
            pending: snapshot.pending,
            max_parallel: snapshot.max_parallel,
        };
        info!(
            book_id = %self.book_id,
            task_id = %task_id,
            priority = handle.priority(),
            queue_wait_ms = started.queue_wait_ms,
            "AI generation started"
        );
        if !self.emit(StreamEvent::Started(started)).await {
            return;
        }
        let _ = start_gate.send(());

        let outcome = match self
            .guard(handle.result(), deadline.as_mut(), settings.timeout)
            .await
        {
            Some(outcome) => outcome,
            None => return,
        };
        let raw = match outcome {
            Ok(raw) => raw,
            Err(e) => {
                self.fail(self.disclosure.describe_task_error(&e)).await;
                return;
            }
        };

        if !self
            .emit(StreamEvent::MessageDone(MessageDonePayload {
                message: raw.clone(),
            }))
            .await
        {
            return;
        }

        match self
            .guard(finalize(raw), deadline.as_mut(), settings.timeout)
            .await
        {
            Some(Ok(content)) => {
                let done = DonePayload {
                    book_id: self.book_id.clone(),
                    content,
                    cached: false,
                };
                self.close(CloseReason::Completed, Some(ErrorOrDone::Done(done)))
                    .await;
            }
            Some(Err(e)) => {
                self.fail(self.disclosure.describe_error(&e)).await;
            }
            None => {}
        }
    }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed || rx.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl DeltaListener for StreamSession {
    async fn on_delta(&self, chunk: String) {
        if !self.message_started.swap(true, Ordering::AcqRel) {
            let start = MessageStartPayload {
                book_id: self.book_id.clone(),
            };
            if !self.emit(StreamEvent::MessageStart(start)).await {
                return;
            }
        }
        self.emit(StreamEvent::MessageDelta(MessageDeltaPayload { delta: chunk }))
            .await;
    }
}

/// A terminal outcome.
#[derive(Debug, Clone)]
pub enum ErrorOrDone {
    Error(ErrorDescriptor),
    Done(DonePayload),
}

impl ErrorOrDone {
    fn into_event(self) -> StreamEvent {
        match self {
            Self::Error(descriptor) => StreamEvent::Error(descriptor),
            Self::Done(done) => StreamEvent::Done(done),
        }
    }
}

/// Binds queued generation work to SSE push channels.
#[derive(Clone)]
pub struct StreamOrchestrator {
    queue: RequestQueue,
    settings: StreamSettings,
    disclosure: ErrorDisclosure,
}

impl StreamOrchestrator {
    pub fn new(queue: RequestQueue, settings: StreamSettings, disclosure: ErrorDisclosure) -> Self {
        Self {
            queue,
            settings,
            disclosure,
        }
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn disclosure(&self) -> &ErrorDisclosure {
        &self.disclosure
    }

    /// A stream carrying a single terminal frame.
    fn single(frame: SseFrame) -> mpsc::Receiver<SseFrame> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(frame);
        rx
    }

    /// A stream that immediately ends with `error`.
    pub fn reject(&self, code: ErrorCode, detail: &str) -> mpsc::Receiver<SseFrame> {
        self.reject_with(self.disclosure.describe(code, detail))
    }

    /// Like [`reject`](Self::reject) for an already-built descriptor.
    pub fn reject_with(&self, descriptor: ErrorDescriptor) -> mpsc::Receiver<SseFrame> {
        Self::single(StreamEvent::Error(descriptor).into())
    }

    /// A stream that immediately ends with `done` from cached content.
    pub fn deliver_cached(
        &self,
        book_id: &str,
        content: BookAiSnapshot,
    ) -> mpsc::Receiver<SseFrame> {
        debug!(book_id = book_id, "Serving AI content from cache");
        Self::single(
            StreamEvent::Done(DonePayload {
                book_id: book_id.to_string(),
                content,
                cached: true,
            })
            .into(),
        )
    }

    /// Enqueue `work` and stream its lifecycle.
    ///
    /// `work` receives a [`DeltaSink`] for incremental output and returns the raw
    /// output; `finalize` turns that into the persisted snapshot carried by `done`.
    /// Rejected with `QUEUE_BUSY` without enqueueing when the pending list is at the
    /// admission threshold.
    pub fn open<W, WorkFut, Fin, FinFut>(
        &self,
        book_id: &str,
        priority: i32,
        work: W,
        finalize: Fin,
    ) -> mpsc::Receiver<SseFrame>
    where
        W: FnOnce(DeltaSink) -> WorkFut + Send + 'static,
        WorkFut: Future<Output = anyhow::Result<String>> + Send + 'static,
        Fin: FnOnce(String) -> FinFut + Send + 'static,
        FinFut: Future<Output = anyhow::Result<BookAiSnapshot>> + Send + 'static,
    {
        let snapshot = self.queue.snapshot();
        if snapshot.pending >= self.settings.admission_threshold {
            warn!(
                book_id = book_id,
                pending = snapshot.pending,
                threshold = self.settings.admission_threshold,
                "AI queue busy, rejecting stream"
            );
            return self.reject(
                ErrorCode::QueueBusy,
                &format!(
                    "{} tasks pending (threshold {})",
                    snapshot.pending, self.settings.admission_threshold
                ),
            );
        }

        let (session, rx) = StreamSession::new(
            book_id.to_string(),
            self.queue.clone(),
            self.disclosure,
            &self.settings,
        );

        // Work waits until `started` is on the wire so deltas can't overtake it.
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let sink = DeltaSink::new(session.clone());
        let handle = self.queue.enqueue(priority, move || async move {
            let _ = gate_rx.await;
            work(sink).await
        });
        let _ = session.task_id.set(handle.id());

        info!(
            book_id = book_id,
            task_id = %handle.id(),
            priority,
            "AI content stream opened"
        );

        tokio::spawn(session.drive(handle, gate_tx, finalize, self.settings.clone()));
        rx
    }
}
