//! Durable dedup store.
//!
//! [`DedupStore`] is the single authority for "has this `(topic, event_id)`
//! ever been seen". [`SqliteEventStore`] implements it on a SQLite file:
//!
//! - `dedup` holds one row per key; its primary key is the dedup primitive
//! - `events` holds the full body, written in the same transaction
//! - WAL journaling lets readers run against a snapshot while the consumer writes
//! - `synchronous=FULL` makes a commit durable before `insert_if_absent` returns

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::IngestResult;
use crate::event::{Event, EventRecord};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Storage operations the consumer and the read paths depend on.
///
/// Implementations must be safe under concurrent callers: the pipeline has a
/// single writer, but readers run alongside it and external tooling may call
/// `insert_if_absent` directly.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomically create the dedup record and the event record for the key.
    ///
    /// Returns `true` if this call created them, `false` if the key was
    /// already present (nothing is written in that case).
    async fn insert_if_absent(&self, event: &Event) -> IngestResult<bool>;

    /// Read-only existence check on the dedup set.
    async fn is_processed(&self, topic: &str, event_id: &str) -> IngestResult<bool>;

    /// All events of a topic, oldest first.
    async fn list_events(&self, topic: &str) -> IngestResult<Vec<EventRecord>>;

    /// Every topic with at least one persisted event.
    async fn distinct_topics(&self) -> IngestResult<BTreeSet<String>>;
}

/// Connection settings for [`SqliteEventStore`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/aggregator.db"),
            max_connections: 4,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

/// SQLite-backed [`DedupStore`]
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
    /// Bits of the last `processed_at` handed out, so it never goes backwards
    last_processed_at: Arc<AtomicU64>,
}

impl SqliteEventStore {
    /// Open (or create) the store at `options.path` and apply migrations.
    ///
    /// Fails if the file cannot be opened or migrated. Callers treat this as
    /// fatal at startup.
    pub async fn open(options: &StoreOptions) -> IngestResult<Self> {
        let path = options.path.as_path();
        info!(path = %path.display(), "Opening event store");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;

        MIGRATOR.run(&pool).await?;

        // Resume the clamp from the newest stored commit.
        let latest: f64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(processed_at), 0.0) FROM events")
                .fetch_one(&pool)
                .await?;

        debug!(
            max_connections = options.max_connections,
            busy_timeout_secs = options.busy_timeout.as_secs(),
            "Event store ready"
        );

        Ok(Self {
            pool,
            last_processed_at: Arc::new(AtomicU64::new(latest.to_bits())),
        })
    }

    /// Shorthand for [`open`](Self::open) with default options.
    pub async fn open_path(path: impl AsRef<Path>) -> IngestResult<Self> {
        Self::open(&StoreOptions::new(path.as_ref())).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of persisted events, for one topic or all of them.
    pub async fn count_events(&self, topic: Option<&str>) -> IngestResult<i64> {
        let row = match topic {
            Some(topic) => {
                sqlx::query("SELECT COUNT(*) AS n FROM events WHERE topic = ?1")
                    .bind(topic)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS n FROM events")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.try_get("n")?)
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Event store closed");
    }

    /// Wall-clock seconds, clamped to be non-decreasing within this process.
    fn next_processed_at(&self) -> f64 {
        let now = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        let previous = self
            .last_processed_at
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(now.max(f64::from_bits(bits)).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        now.max(f64::from_bits(previous))
    }
}

#[async_trait]
impl DedupStore for SqliteEventStore {
    async fn insert_if_absent(&self, event: &Event) -> IngestResult<bool> {
        let payload = serde_json::to_string(&event.payload)?;
        let processed_at = self.next_processed_at();

        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO dedup (topic, event_id, processed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (topic, event_id) DO NOTHING
            "#,
        )
        .bind(&event.topic)
        .bind(&event.event_id)
        .bind(processed_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !claimed {
            tx.rollback().await?;
            debug!(
                topic = %event.topic,
                event_id = %event.event_id,
                "Key already present, nothing written"
            );
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO events (topic, event_id, timestamp, source, payload, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&event.topic)
        .bind(&event.event_id)
        .bind(&event.timestamp)
        .bind(&event.source)
        .bind(&payload)
        .bind(processed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            topic = %event.topic,
            event_id = %event.event_id,
            processed_at,
            "Event committed"
        );

        Ok(true)
    }

    async fn is_processed(&self, topic: &str, event_id: &str) -> IngestResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM dedup WHERE topic = ?1 AND event_id = ?2
            ) AS present
            "#,
        )
        .bind(topic)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        let present: i64 = row.try_get("present")?;
        Ok(present != 0)
    }

    async fn list_events(&self, topic: &str) -> IngestResult<Vec<EventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, topic, event_id, timestamp, source, payload, processed_at
            FROM events
            WHERE topic = ?1
            ORDER BY processed_at ASC, seq ASC
            "#,
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn distinct_topics(&self) -> IngestResult<BTreeSet<String>> {
        let rows = sqlx::query("SELECT DISTINCT topic FROM events")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("topic").map_err(Into::into))
            .collect()
    }
}

fn record_from_row(row: &SqliteRow) -> IngestResult<EventRecord> {
    let topic: String = row.try_get("topic")?;
    let event_id: String = row.try_get("event_id")?;
    let raw_payload: String = row.try_get("payload")?;

    // A row that fails to decode is still returned; the body is the only casualty.
    let payload = serde_json::from_str(&raw_payload).unwrap_or_else(|e| {
        warn!(
            topic = %topic,
            event_id = %event_id,
            error = %e,
            "Stored payload is not valid JSON"
        );
        serde_json::Value::Object(serde_json::Map::new())
    });

    Ok(EventRecord {
        topic,
        event_id,
        timestamp: row.try_get("timestamp")?,
        source: row.try_get("source")?,
        payload,
        processed_at: row.try_get("processed_at")?,
        seq: row.try_get("seq")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteEventStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteEventStore::open_path(dir.path().join("store.db"))
            .await
            .expect("open store");
        (dir, store)
    }

    fn event(topic: &str, id: &str) -> Event {
        Event::new(topic, id, "2025-10-24T13:30:00", "test", json!({"id": id}))
    }

    #[tokio::test]
    async fn test_insert_if_absent_claims_once() {
        let (_dir, store) = open_temp().await;
        let e = event("t", "u001");

        assert!(!store.is_processed("t", "u001").await.unwrap());
        assert!(store.insert_if_absent(&e).await.unwrap());
        assert!(store.is_processed("t", "u001").await.unwrap());
        assert!(!store.insert_if_absent(&e).await.unwrap());

        assert_eq!(store.count_events(Some("t")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_keeps_first_body() {
        let (_dir, store) = open_temp().await;
        let first = Event::new("t", "k", "2025-10-24T13:30:00", "a", json!({"v": 1}));
        let second = Event::new("t", "k", "2025-10-24T13:31:00", "b", json!({"v": 2}));

        assert!(store.insert_if_absent(&first).await.unwrap());
        assert!(!store.insert_if_absent(&second).await.unwrap());

        let records = store.list_events("t").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "a");
        assert_eq!(records[0].payload, json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_same_event_id_in_different_topics() {
        let (_dir, store) = open_temp().await;

        assert!(store.insert_if_absent(&event("a", "same")).await.unwrap());
        assert!(store.insert_if_absent(&event("b", "same")).await.unwrap());

        let topics = store.distinct_topics().await.unwrap();
        assert_eq!(topics.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(store.count_events(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_events_in_commit_order() {
        let (_dir, store) = open_temp().await;
        let ids: Vec<String> = (0..20).map(|i| format!("e{i:02}")).collect();

        for id in &ids {
            store.insert_if_absent(&event("ordered", id)).await.unwrap();
        }
        store.insert_if_absent(&event("other", "x")).await.unwrap();

        let records = store.list_events("ordered").await.unwrap();
        let listed: Vec<&str> = records.iter().map(|r| r.event_id.as_str()).collect();
        assert_eq!(listed, ids.iter().map(String::as_str).collect::<Vec<_>>());

        for pair in records.windows(2) {
            assert!(pair[0].processed_at <= pair[1].processed_at);
            assert!(pair[0].seq < pair[1].seq);
        }
    }

    #[tokio::test]
    async fn test_unknown_topic_is_empty() {
        let (_dir, store) = open_temp().await;
        assert!(store.list_events("missing").await.unwrap().is_empty());
        assert!(store.distinct_topics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dedup_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let store = SqliteEventStore::open_path(&path).await.unwrap();
        assert!(store.insert_if_absent(&event("persist", "p001")).await.unwrap());
        store.close().await;

        let reopened = SqliteEventStore::open_path(&path).await.unwrap();
        assert!(reopened.is_processed("persist", "p001").await.unwrap());
        assert!(!reopened.insert_if_absent(&event("persist", "p001")).await.unwrap());
        assert_eq!(reopened.list_events("persist").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_resumes_processed_at_clamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        // A commit stamped a day ahead of the current clock.
        let ahead = Utc::now().timestamp() as f64 + 86_400.0;
        let store = SqliteEventStore::open_path(&path).await.unwrap();
        assert!(store.insert_if_absent(&event("clock", "a")).await.unwrap());
        sqlx::query("UPDATE events SET processed_at = ?1")
            .bind(ahead)
            .execute(store.pool())
            .await
            .unwrap();
        store.close().await;

        let reopened = SqliteEventStore::open_path(&path).await.unwrap();
        assert!(reopened.insert_if_absent(&event("clock", "b")).await.unwrap());

        let records = reopened.list_events("clock").await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(records[1].processed_at >= ahead);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_same_key() {
        let (_dir, store) = open_temp().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_if_absent(&event("race", "same")).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1, "exactly one caller claims the key");
        assert_eq!(store.count_events(Some("race")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_processed_at_never_decreases() {
        let store = SqliteEventStore {
            pool: SqlitePoolOptions::new()
                .connect_lazy("sqlite::memory:")
                .unwrap(),
            last_processed_at: Arc::new(AtomicU64::new(f64::MAX.to_bits())),
        };
        assert_eq!(store.next_processed_at(), f64::MAX);
    }
}
