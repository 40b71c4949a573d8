//! Intake boundary: the only write path into the queue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::consumer::{DedupConsumer, DrainOutcome, StopOutcome};
use crate::error::{IngestError, IngestResult};
use crate::event::{Event, EventRecord};
use crate::metrics::IngestMetrics;
use crate::queue::{IntakeQueue, DEFAULT_QUEUE_CAPACITY};
use crate::stats::{IngestStats, StatsSnapshot};
use crate::store::DedupStore;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of admitted-but-unprocessed events
    pub queue_capacity: usize,
    /// Bound on the drain wait and on the consumer stop wait at shutdown
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// How much of a batch made it into the queue.
///
/// There is no batch atomicity: when the queue fills partway, the prefix
/// stays admitted and `accepted < submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub accepted: usize,
    pub submitted: usize,
}

impl PublishReceipt {
    pub fn is_complete(&self) -> bool {
        self.accepted == self.submitted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drain: DrainOutcome,
    pub stop: StopOutcome,
}

/// Queue, consumer, stats and store wired together.
pub struct IngestPipeline {
    queue: Arc<IntakeQueue>,
    stats: Arc<IngestStats>,
    store: Arc<dyn DedupStore>,
    consumer: DedupConsumer,
    metrics: Option<IngestMetrics>,
    accepting: AtomicBool,
    drain_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn DedupStore>, config: PipelineConfig) -> Self {
        Self::build(store, config, None)
    }

    pub fn new_with_metrics(
        store: Arc<dyn DedupStore>,
        config: PipelineConfig,
        metrics: IngestMetrics,
    ) -> Self {
        Self::build(store, config, Some(metrics))
    }

    fn build(
        store: Arc<dyn DedupStore>,
        config: PipelineConfig,
        metrics: Option<IngestMetrics>,
    ) -> Self {
        let queue = Arc::new(IntakeQueue::new(config.queue_capacity));
        let stats = Arc::new(IngestStats::new());
        let consumer = match &metrics {
            Some(metrics) => DedupConsumer::new_with_metrics(
                queue.clone(),
                store.clone(),
                stats.clone(),
                metrics.clone(),
            ),
            None => DedupConsumer::new(queue.clone(), store.clone(), stats.clone()),
        };

        info!(
            queue_capacity = queue.capacity(),
            drain_timeout_ms = config.drain_timeout.as_millis() as u64,
            "Ingest pipeline created"
        );

        Self {
            queue,
            stats,
            store,
            consumer,
            metrics,
            accepting: AtomicBool::new(true),
            drain_timeout: config.drain_timeout,
        }
    }

    pub async fn start(&self) {
        self.accepting.store(true, Ordering::Release);
        self.consumer.start().await;
    }

    /// Validate and admit one event without waiting.
    ///
    /// Fails with `QueueFull` when there is no free slot.
    pub fn submit(&self, event: Event) -> IngestResult<()> {
        event.validate_event()?;
        self.admit(event)
    }

    /// Validate and admit one event, waiting for a free slot if necessary.
    pub async fn submit_wait(&self, event: Event) -> IngestResult<()> {
        event.validate_event()?;
        self.ensure_accepting()?;
        let permit = self.queue.reserve().await?;
        self.record_received(&event);
        permit.push(event);
        Ok(())
    }

    /// Validate a whole batch, then admit it item by item.
    ///
    /// A malformed item rejects the batch before anything is queued. Once
    /// admission starts, a full queue ends it early and the receipt reports
    /// the admitted prefix.
    pub fn publish(&self, events: Vec<Event>) -> IngestResult<PublishReceipt> {
        for (index, event) in events.iter().enumerate() {
            event.validate_event().map_err(|e| match e {
                IngestError::InvalidEvent(msg) => {
                    IngestError::InvalidEvent(format!("item {index}: {msg}"))
                }
                other => other,
            })?;
        }

        let submitted = events.len();
        let mut accepted = 0;

        for event in events {
            match self.admit(event) {
                Ok(()) => accepted += 1,
                Err(e) if accepted == 0 && !e.is_backpressure() => return Err(e),
                Err(e) => {
                    warn!(
                        accepted,
                        submitted,
                        error = %e,
                        "Batch only partially admitted"
                    );
                    break;
                }
            }
        }

        debug!(accepted, submitted, "Batch admitted");
        Ok(PublishReceipt {
            accepted,
            submitted,
        })
    }

    pub async fn list_events(&self, topic: &str) -> IngestResult<Vec<EventRecord>> {
        self.store.list_events(topic).await
    }

    pub async fn is_processed(&self, topic: &str, event_id: &str) -> IngestResult<bool> {
        self.store.is_processed(topic, event_id).await
    }

    pub async fn distinct_topics(&self) -> IngestResult<BTreeSet<String>> {
        self.store.distinct_topics().await
    }

    /// Live, not transactionally consistent, view of the counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.queue.pending())
    }

    pub async fn wait_drained(&self, timeout: Duration) -> DrainOutcome {
        self.consumer.wait_drained(timeout).await
    }

    /// Stop admitting, give the backlog `drain_timeout` to finish, then stop
    /// the consumer.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down ingest pipeline");
        self.accepting.store(false, Ordering::Release);

        let drain = self.consumer.wait_drained(self.drain_timeout).await;
        let stop = self.consumer.stop(self.drain_timeout).await;

        info!(drain = ?drain, stop = ?stop, "Ingest pipeline shut down");
        ShutdownReport { drain, stop }
    }

    pub fn consumer(&self) -> &DedupConsumer {
        &self.consumer
    }

    pub fn queue(&self) -> &IntakeQueue {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn DedupStore> {
        &self.store
    }

    fn admit(&self, event: Event) -> IngestResult<()> {
        self.ensure_accepting()?;
        let permit = self.queue.try_reserve()?;
        self.record_received(&event);
        permit.push(event);
        Ok(())
    }

    fn ensure_accepting(&self) -> IngestResult<()> {
        if self.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(IngestError::QueueClosed)
        }
    }

    fn record_received(&self, event: &Event) {
        self.stats.record_received(&event.topic);
        if let Some(metrics) = &self.metrics {
            metrics.received.inc();
            metrics.queue_depth.set(self.queue.pending() as i64 + 1);
        }
    }
}
