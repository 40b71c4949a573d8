//! # Idempotent Ingestion Pipeline
//!
//! Turns at-least-once event submissions into an exactly-once effect on
//! durable state. Producers may resubmit the same `(topic, event_id)` any
//! number of times; the first copy the consumer dequeues is persisted and every
//! later copy is counted as a duplicate and dropped. This holds within a
//! process lifetime and across restarts.
//!
//! ## Architecture
//!
//! ```text
//! producers ─► IngestPipeline ─► IntakeQueue ─► DedupConsumer ─► DedupStore
//!                   │              (bounded)     (one task)     (SQLite, WAL)
//!                   └──────────────► IngestStats ◄──────┘
//! ```
//!
//! - **IngestPipeline**: validates events and admits them; the only write path
//! - **IntakeQueue**: bounded FIFO with explicit backpressure (`QueueFull`)
//! - **DedupConsumer**: single sequential worker calling `insert_if_absent`
//! - **DedupStore**: atomic insert-if-absent of the dedup row and the event row
//! - **IngestStats**: independent live counters; not a consistent snapshot
//!
//! ## Usage Example
//!
//! ```no_run
//! use idempotent_ingest::{Event, IngestPipeline, PipelineConfig, SqliteEventStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), idempotent_ingest::IngestError> {
//! let store = SqliteEventStore::open_path("./data/aggregator.db").await?;
//! let pipeline = IngestPipeline::new(Arc::new(store), PipelineConfig::default());
//! pipeline.start().await;
//!
//! let event = Event::new(
//!     "orders",
//!     "order-42",
//!     "2025-10-24T13:30:00",
//!     "checkout",
//!     serde_json::json!({"total": 12}),
//! );
//! pipeline.submit(event.clone())?;
//! pipeline.submit(event)?; // resubmission, dropped by the consumer
//!
//! pipeline.wait_drained(Duration::from_secs(1)).await;
//! let stats = pipeline.stats();
//! assert_eq!(stats.unique_processed, 1);
//! assert_eq!(stats.duplicate_dropped, 1);
//!
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **Exactly-once effect**: the store's insert commits the dedup row and the
//!   event row in one transaction, so neither is ever visible without the other
//! - **Durability**: the commit is flushed before `insert_if_absent` returns
//! - **Per-topic order**: events are persisted and listed in dequeue order
//! - **No cross-topic order**
//!
//! ## Failure Handling
//!
//! A store error while consuming is logged, counted in `store_failures` and the
//! event is dropped without retry. Producers already got their acknowledgement
//! at intake and never see it. A store that cannot be opened at startup is
//! fatal.
//!
//! ## Counter Skew
//!
//! `received` is bumped at intake, the processed counters after the dedup
//! decision. `received >= unique_processed + duplicate_dropped` always holds,
//! with equality once the queue is drained and no store write failed.

mod consumer;
mod error;
mod event;
mod metrics;
mod pipeline;
mod queue;
mod stats;
mod store;

pub use consumer::{DedupConsumer, DrainOutcome, ProcessingOutcome, StopOutcome};
pub use error::{IngestError, IngestResult};
pub use event::{parse_timestamp, DedupKey, Event, EventRecord};
pub use metrics::IngestMetrics;
pub use pipeline::{IngestPipeline, PipelineConfig, PublishReceipt, ShutdownReport};
pub use queue::{IntakePermit, IntakeQueue, DEFAULT_QUEUE_CAPACITY};
pub use stats::{IngestStats, StatsSnapshot};
pub use store::{DedupStore, SqliteEventStore, StoreOptions};
