//! Bounded FIFO between the intake boundary and the consumer.
//!
//! Admission is two-step: reserve a slot, then [`IntakePermit::push`] the
//! event. The boundary counts an event as received only once it holds a
//! permit, so rejected events never inflate the stats.
//!
//! Completion tracking mirrors a join-able work queue: every pushed item bumps
//! `pending`, the consumer calls [`IntakeQueue::task_done`] once per item
//! regardless of outcome, and [`IntakeQueue::join`] resolves when `pending`
//! reaches zero.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::warn;

use crate::error::{IngestError, IngestResult};
use crate::event::Event;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

pub struct IntakeQueue {
    sender: mpsc::Sender<Event>,
    receiver: Mutex<mpsc::Receiver<Event>>,
    pending: watch::Sender<usize>,
    capacity: usize,
}

/// A reserved slot in the queue. Pushing through it cannot fail.
#[derive(Debug)]
pub struct IntakePermit<'a> {
    permit: mpsc::Permit<'a, Event>,
    pending: &'a watch::Sender<usize>,
}

impl IntakePermit<'_> {
    pub fn push(self, event: Event) {
        // Count before sending so the consumer can never complete an item
        // that is not yet accounted for.
        self.pending.send_modify(|n| *n += 1);
        self.permit.send(event);
    }
}

impl IntakeQueue {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let (pending, _) = watch::channel(0);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            pending,
            capacity,
        }
    }

    /// Reserve a slot without waiting; `QueueFull` when none is free.
    pub fn try_reserve(&self) -> IngestResult<IntakePermit<'_>> {
        match self.sender.try_reserve() {
            Ok(permit) => Ok(IntakePermit {
                permit,
                pending: &self.pending,
            }),
            Err(TrySendError::Full(())) => Err(IngestError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(())) => Err(IngestError::QueueClosed),
        }
    }

    /// Reserve a slot, waiting for the consumer to free one if needed.
    pub async fn reserve(&self) -> IngestResult<IntakePermit<'_>> {
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|_| IngestError::QueueClosed)?;
        Ok(IntakePermit {
            permit,
            pending: &self.pending,
        })
    }

    pub fn try_enqueue(&self, event: Event) -> IngestResult<()> {
        self.try_reserve()?.push(event);
        Ok(())
    }

    pub async fn enqueue(&self, event: Event) -> IngestResult<()> {
        self.reserve().await?.push(event);
        Ok(())
    }

    /// Wait for the next item. Cancel-safe: dropping the future loses nothing.
    pub async fn dequeue(&self) -> Option<Event> {
        self.receiver.lock().await.recv().await
    }

    /// Mark one dequeued item as finished.
    pub fn task_done(&self) {
        self.pending.send_modify(|n| {
            if *n == 0 {
                warn!("task_done called more times than items were queued");
            } else {
                *n -= 1;
            }
        });
    }

    /// Resolve once every pushed item has been marked done.
    pub async fn join(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Items pushed but not yet marked done (buffered plus in flight).
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Slots currently taken, including reserved-but-unpushed ones.
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for IntakeQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
