//! Wait Queue
//!
//! Strict FIFO queue of admission tickets. Entries are only ever appended at
//! the tail and removed from the head; nothing is reordered or skipped over.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::AdmissionError;

/// Cooperative cancellation signal for a queued ticket
///
/// Cancellation is only observed when the ticket reaches the head of the
/// queue. Cancelling after admission has no effect.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon the ticket
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Sending half of a ticket's completion
pub(crate) type Completion = oneshot::Sender<Result<(), AdmissionError>>;

/// A pending admission ticket
#[derive(Debug)]
pub struct WaitQueueEntry {
    /// Ticket identifier, increasing in enqueue order
    id: u64,

    /// Caller's cancellation signal
    cancel: CancelToken,

    /// Completion handle the waiter listens on
    completion: Completion,

    /// When the ticket was queued
    enqueued_at: Instant,
}

impl WaitQueueEntry {
    pub(crate) fn new(id: u64, cancel: CancelToken, completion: Completion) -> Self {
        Self {
            id,
            cancel,
            completion,
            enqueued_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancelled explicitly, or nobody is waiting for the answer any more
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.completion.is_closed()
    }

    /// Time spent in the queue so far
    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    /// Let the waiter proceed
    ///
    /// Returns false if the waiter went away after the cancellation check;
    /// the slot stays charged in that case.
    pub(crate) fn admit(self) -> bool {
        self.completion.send(Ok(())).is_ok()
    }

    /// Tell the waiter its ticket was abandoned
    pub(crate) fn reject(self) {
        let _ = self.completion.send(Err(AdmissionError::Cancelled));
    }
}

/// FIFO queue of pending tickets
#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: VecDeque<WaitQueueEntry>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail
    pub fn push(&mut self, entry: WaitQueueEntry) {
        self.entries.push_back(entry);
    }

    pub fn peek_head(&self) -> Option<&WaitQueueEntry> {
        self.entries.front()
    }

    pub fn pop_head(&mut self) -> Option<WaitQueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
