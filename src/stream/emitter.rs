//! Single-writer emitter for one push channel.
//!
//! Tickers, the worker's delta callback and the stream driver all write through the
//! same mutex, so frames never interleave and nothing follows the final frame.
//! One channel slot is reserved up front for the final frame, and `finish` wakes any
//! writer parked on a full channel, so closing never waits on a client that stopped
//! reading.

use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc::OwnedPermit;
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};

use super::event::{SseFrame, StreamEvent};
use crate::queue::QueuePosition;

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("Stream already closed")]
    Closed,

    #[error("Client disconnected")]
    Disconnected,
}

struct Writer {
    tx: Option<mpsc::Sender<SseFrame>>,
    /// Set once `started` has been written; position updates stop after it.
    started: bool,
}

pub struct Emitter {
    writer: Mutex<Writer>,
    /// Slot held back for the terminal frame.
    terminal: SyncMutex<Option<OwnedPermit<SseFrame>>>,
    closing: watch::Sender<bool>,
}

impl Emitter {
    /// Create an emitter and the receiving end handed to the transport.
    ///
    /// `capacity` frames can be buffered ahead of the terminal frame.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SseFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1) + 1);
        // A fresh channel always has room, so the reservation cannot fail.
        let terminal = tx.clone().try_reserve_owned().ok();
        let (closing, _) = watch::channel(false);
        let emitter = Self {
            writer: Mutex::new(Writer {
                tx: Some(tx),
                started: false,
            }),
            terminal: SyncMutex::new(terminal),
            closing,
        };
        (emitter, rx)
    }

    /// Resolves once `finish` has begun.
    async fn closing(&self) {
        let mut rx = self.closing.subscribe();
        loop {
            let closing = *rx.borrow_and_update();
            if closing || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Take the writer lock unless the emitter is closing.
    async fn lock(&self) -> Result<MutexGuard<'_, Writer>, EmitError> {
        tokio::select! {
            biased;
            _ = self.closing() => Err(EmitError::Closed),
            writer = self.writer.lock() => Ok(writer),
        }
    }

    /// Send on `tx`, giving up with `Closed` as soon as `finish` begins.
    async fn write(&self, tx: &mpsc::Sender<SseFrame>, frame: SseFrame) -> Result<(), EmitError> {
        tokio::select! {
            biased;
            _ = self.closing() => Err(EmitError::Closed),
            sent = tx.send(frame) => sent.map_err(|_| EmitError::Disconnected),
        }
    }

    pub async fn send(&self, frame: SseFrame) -> Result<(), EmitError> {
        let mut writer = self.lock().await?;
        let tx = writer.tx.clone().ok_or(EmitError::Closed)?;
        let is_started = matches!(frame, SseFrame::Event(StreamEvent::Started(_)));
        self.write(&tx, frame).await?;
        if is_started {
            writer.started = true;
        }
        Ok(())
    }

    /// Write a `queue` event if the task has not started yet and `position` still
    /// reports it as pending. Returns whether an event was written.
    pub async fn send_position(
        &self,
        position: impl FnOnce() -> QueuePosition,
    ) -> Result<bool, EmitError> {
        let writer = self.lock().await?;
        let tx = writer.tx.clone().ok_or(EmitError::Closed)?;
        if writer.started {
            return Ok(false);
        }
        let position = position();
        if !position.in_queue {
            return Ok(false);
        }
        self.write(&tx, SseFrame::Event(StreamEvent::Queue(position)))
            .await?;
        Ok(true)
    }

    /// Write `last` (if any) into the reserved slot and close the channel.
    /// Later sends fail with `Closed`; parked sends are abandoned.
    pub async fn finish(&self, last: Option<SseFrame>) -> Result<(), EmitError> {
        if self.closing.send_replace(true) {
            return Err(EmitError::Closed);
        }

        // Parked writers observe `closing` and release the lock.
        let mut writer = self.writer.lock().await;
        writer.tx = None;
        let permit = self.terminal.lock().take();
        drop(writer);

        match (last, permit) {
            (Some(frame), Some(permit)) => {
                permit.send(frame);
                Ok(())
            }
            (Some(_), None) => Err(EmitError::Disconnected),
            (None, _) => Ok(()),
        }
    }

    /// Resolves when the receiving side has gone away (or the emitter is finished).
    pub async fn disconnected(&self) {
        let tx = match self.lock().await {
            Ok(writer) => writer.tx.clone(),
            Err(_) => None,
        };
        if let Some(tx) = tx {
            tx.closed().await;
        }
    }
}
