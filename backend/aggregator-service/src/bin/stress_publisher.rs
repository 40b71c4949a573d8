//! Load generator for the aggregator.
//!
//! Posts `STRESS_COUNT` events in batches to `STRESS_URL/publish`, reusing an
//! already-sent `event_id` with probability `STRESS_DUP_RATE`. At the end it
//! prints the server's `/stats` so the dedup counts can be compared with what
//! was sent.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

const TOPIC: &str = "stress";
const SOURCE: &str = "stress_publisher";

#[derive(Debug, Deserialize)]
struct StressConfig {
    #[serde(default = "default_url")]
    url: String,
    #[serde(default = "default_count")]
    count: usize,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default = "default_dup_rate")]
    dup_rate: f64,
}

fn default_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_count() -> usize {
    5000
}

fn default_batch_size() -> usize {
    100
}

fn default_dup_rate() -> f64 {
    0.2
}

#[derive(Debug, Default)]
struct Totals {
    sent: usize,
    accepted: usize,
    reused_ids: usize,
    unique_ids: usize,
}

fn build_batch<R: Rng>(
    rng: &mut R,
    size: usize,
    dup_rate: f64,
    sent_ids: &mut Vec<String>,
    totals: &mut Totals,
) -> Vec<Value> {
    (0..size)
        .map(|_| {
            let reused = if rng.gen_bool(dup_rate) {
                sent_ids.choose(rng).cloned()
            } else {
                None
            };

            let (event_id, kind) = match reused {
                Some(id) => {
                    totals.reused_ids += 1;
                    (id, "dup")
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    sent_ids.push(id.clone());
                    totals.unique_ids += 1;
                    (id, "unique")
                }
            };

            json!({
                "topic": TOPIC,
                "event_id": event_id,
                "timestamp": Utc::now().to_rfc3339(),
                "source": SOURCE,
                "payload": {"info": kind},
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config: StressConfig = envy::prefixed("STRESS_")
        .from_env()
        .context("Failed to load STRESS_* configuration")?;
    if !(0.0..=1.0).contains(&config.dup_rate) {
        bail!("STRESS_DUP_RATE must be within [0, 1], got {}", config.dup_rate);
    }
    let batch_size = config.batch_size.max(1);
    let base = config.url.trim_end_matches('/').to_string();

    info!(
        url = %base,
        count = config.count,
        batch_size,
        dup_rate = config.dup_rate,
        "Starting stress publisher"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")?;

    let mut rng = rand::thread_rng();
    let mut sent_ids = Vec::with_capacity(config.count);
    let mut totals = Totals::default();
    let started = Instant::now();

    while totals.sent < config.count {
        let size = batch_size.min(config.count - totals.sent);
        let batch = build_batch(&mut rng, size, config.dup_rate, &mut sent_ids, &mut totals);
        totals.sent += size;

        let resp = client
            .post(format!("{base}/publish"))
            .json(&batch)
            .send()
            .await
            .context("Publish request failed")?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let accepted = body.get("accepted").and_then(Value::as_u64).unwrap_or(0) as usize;
        totals.accepted += accepted;

        if !status.is_success() {
            warn!(status = %status, body = %body, "Publish failed, stopping");
            break;
        }
    }

    let elapsed = started.elapsed();
    let rate = totals.sent as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        sent = totals.sent,
        accepted = totals.accepted,
        unique_ids = totals.unique_ids,
        reused_ids = totals.reused_ids,
        elapsed_secs = format!("{:.2}", elapsed.as_secs_f64()),
        events_per_sec = format!("{rate:.0}"),
        "Stress run finished"
    );

    match client.get(format!("{base}/stats")).send().await {
        Ok(resp) => {
            let stats: Value = resp.json().await.context("Invalid /stats response")?;
            info!(stats = %stats, "Server stats");
        }
        Err(e) => warn!(error = %e, "Could not fetch /stats"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_batch_without_duplicates() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ids = Vec::new();
        let mut totals = Totals::default();

        let batch = build_batch(&mut rng, 50, 0.0, &mut ids, &mut totals);
        assert_eq!(batch.len(), 50);
        assert_eq!(totals.unique_ids, 50);
        assert_eq!(totals.reused_ids, 0);

        let distinct: HashSet<&str> = batch
            .iter()
            .map(|e| e["event_id"].as_str().unwrap())
            .collect();
        assert_eq!(distinct.len(), 50);
    }

    #[test]
    fn test_batch_reuses_sent_ids() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ids = vec!["seed-id".to_string()];
        let mut totals = Totals::default();

        let batch = build_batch(&mut rng, 20, 1.0, &mut ids, &mut totals);
        assert_eq!(totals.reused_ids, 20);
        assert!(batch.iter().all(|e| e["event_id"] == "seed-id"));
        assert!(batch.iter().all(|e| e["topic"] == TOPIC));
    }
}
