//! Single sequential consumer draining the intake queue into the store.
//!
//! Dedup decisions are serialized by construction: one task dequeues, calls
//! [`DedupStore::insert_if_absent`] and records the outcome. Store errors are
//! logged and the event is dropped without retry; the loop keeps going.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event::Event;
use crate::metrics::IngestMetrics;
use crate::queue::IntakeQueue;
use crate::stats::IngestStats;
use crate::store::DedupStore;

/// Outcome of one dedup attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Key was absent; dedup and event records were committed
    Inserted,

    /// Key already stored; nothing written
    Duplicate,

    /// Store errored; event dropped with this reason
    Failed(String),
}

impl ProcessingOutcome {
    /// Check if the event reached a durable decision (inserted or duplicate)
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ProcessingOutcome::Inserted | ProcessingOutcome::Duplicate
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessingOutcome::Failed(_))
    }
}

/// Result of a bounded wait for the queue to drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    /// The bound elapsed with `pending` items still unfinished
    TimedOut { pending: usize },
}

/// Result of a bounded wait for the consumer loop to exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    /// The loop is still finishing its current event; it exits afterwards
    TimedOut,
}

struct ConsumerInner {
    queue: Arc<IntakeQueue>,
    store: Arc<dyn DedupStore>,
    stats: Arc<IngestStats>,
    metrics: Option<IngestMetrics>,
}

impl ConsumerInner {
    async fn process_event(&self, event: &Event) -> ProcessingOutcome {
        match self.store.insert_if_absent(event).await {
            Ok(true) => {
                self.stats.record_unique();
                if let Some(metrics) = &self.metrics {
                    metrics.unique.inc();
                }
                info!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "Event processed"
                );
                ProcessingOutcome::Inserted
            }
            Ok(false) => {
                self.stats.record_duplicate();
                if let Some(metrics) = &self.metrics {
                    metrics.duplicate.inc();
                }
                info!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "Duplicate dropped"
                );
                ProcessingOutcome::Duplicate
            }
            Err(e) => {
                self.stats.record_store_failure();
                if let Some(metrics) = &self.metrics {
                    metrics.store_failures.inc();
                }
                error!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    transient = e.is_transient(),
                    error = %e,
                    "Store write failed, dropping event"
                );
                ProcessingOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run(self: Arc<Self>, running: Arc<AtomicBool>, mut shutdown: watch::Receiver<bool>) {
        info!("Consumer run loop started");

        while running.load(Ordering::Acquire) {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = self.queue.dequeue() => event,
            };

            let Some(event) = next else {
                warn!("Intake queue closed, consumer exiting");
                break;
            };

            let key = event.key();
            let outcome = self.process_event(&event).await;
            self.queue.task_done();

            if let Some(metrics) = &self.metrics {
                metrics.queue_depth.set(self.queue.pending() as i64);
            }
            debug!(
                key = %key,
                outcome = ?outcome,
                pending = self.queue.pending(),
                "Event finished"
            );

            tokio::task::yield_now().await;
        }

        running.store(false, Ordering::Release);
        info!("Consumer run loop stopped");
    }
}

/// The one long-lived worker of the pipeline.
///
/// `start` is idempotent. `stop` is cooperative: it never interrupts an
/// in-flight store write, and a timeout leaves the loop to finish on its own.
pub struct DedupConsumer {
    inner: Arc<ConsumerInner>,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DedupConsumer {
    pub fn new(
        queue: Arc<IntakeQueue>,
        store: Arc<dyn DedupStore>,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self::build(queue, store, stats, None)
    }

    /// Create a consumer that also updates Prometheus metrics per event.
    pub fn new_with_metrics(
        queue: Arc<IntakeQueue>,
        store: Arc<dyn DedupStore>,
        stats: Arc<IngestStats>,
        metrics: IngestMetrics,
    ) -> Self {
        Self::build(queue, store, stats, Some(metrics))
    }

    fn build(
        queue: Arc<IntakeQueue>,
        store: Arc<dyn DedupStore>,
        stats: Arc<IngestStats>,
        metrics: Option<IngestMetrics>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConsumerInner {
                queue,
                store,
                stats,
                metrics,
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Spawn the run loop. No-op while already running.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;

        if self.running.load(Ordering::Acquire) {
            debug!("Consumer already running");
            return;
        }
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("Previous consumer loop is still finishing an event, not starting another");
            return;
        }

        info!("Starting consumer");
        self.running.store(true, Ordering::Release);
        self.shutdown.send_replace(false);

        let inner = self.inner.clone();
        let running = self.running.clone();
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(inner.run(running, shutdown)));

        info!("Consumer started successfully");
    }

    /// Ask the loop to exit and wait up to `timeout` for it to do so.
    pub async fn stop(&self, timeout: Duration) -> StopOutcome {
        info!("Stopping consumer");
        self.running.store(false, Ordering::Release);
        self.shutdown.send_replace(true);

        let mut task = self.task.lock().await;
        let Some(handle) = task.as_mut() else {
            debug!("No consumer task to stop");
            return StopOutcome::NotRunning;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    error!(error = %e, "Consumer task ended abnormally");
                } else {
                    info!("Consumer stopped successfully");
                }
                *task = None;
                StopOutcome::Stopped
            }
            Err(_) => {
                error!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Consumer stop timed out"
                );
                StopOutcome::TimedOut
            }
        }
    }

    /// Wait up to `timeout` for every admitted event to reach an outcome.
    pub async fn wait_drained(&self, timeout: Duration) -> DrainOutcome {
        match tokio::time::timeout(timeout, self.inner.queue.join()).await {
            Ok(()) => DrainOutcome::Drained,
            Err(_) => {
                let pending = self.inner.queue.pending();
                warn!(
                    pending,
                    timeout_ms = timeout.as_millis() as u64,
                    "Queue drain timed out"
                );
                DrainOutcome::TimedOut { pending }
            }
        }
    }

    /// Run one dedup attempt outside the loop and record its outcome.
    ///
    /// Does not touch queue completion tracking.
    pub async fn process_event(&self, event: &Event) -> ProcessingOutcome {
        self.inner.process_event(event).await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
