//! HTTP-level tests for aggregator-service.
//!
//! Each test builds the real app over a throwaway SQLite file.

use actix_web::{test, web, App};
use aggregator_service::{configure, AppState};
use idempotent_ingest::{DrainOutcome, IngestPipeline, PipelineConfig, SqliteEventStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn setup(capacity: usize, start_consumer: bool) -> (TempDir, Arc<IngestPipeline>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = SqliteEventStore::open_path(dir.path().join("aggregator.db"))
        .await
        .expect("Failed to open store");
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::new(store),
        PipelineConfig {
            queue_capacity: capacity,
            drain_timeout: Duration::from_secs(5),
        },
    ));
    if start_consumer {
        pipeline.start().await;
    }
    (dir, pipeline)
}

fn event(topic: &str, id: &str) -> Value {
    json!({
        "topic": topic,
        "event_id": id,
        "timestamp": "2025-10-24T13:30:00",
        "source": "x",
        "payload": {"msg": format!("event {id}")}
    })
}

async fn drained(pipeline: &IngestPipeline) {
    assert_eq!(
        pipeline.wait_drained(Duration::from_secs(10)).await,
        DrainOutcome::Drained
    );
}

macro_rules! app {
    ($pipeline:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new($pipeline.clone())))
                .configure(configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_publish_single_object() {
    let (_dir, pipeline) = setup(64, true).await;
    let app = app!(pipeline);

    let req = test::TestRequest::post()
        .uri("/publish")
        .set_json(event("t", "u001"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["accepted"], 1);

    drained(&pipeline).await;

    let req = test::TestRequest::get().uri("/events?topic=t").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["event_id"], "u001");
    assert_eq!(body["events"][0]["payload"]["msg"], "event u001");
    assert!(body["events"][0]["processed_at"].as_f64().unwrap() > 0.0);

    pipeline.shutdown().await;
}

#[actix_web::test]
async fn test_duplicate_is_dropped() {
    let (_dir, pipeline) = setup(64, true).await;
    let app = app!(pipeline);

    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/publish")
            .set_json(json!([event("t", "u001")]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        drained(&pipeline).await;
    }

    let req = test::TestRequest::get().uri("/stats").to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["received"], 2);
    assert_eq!(stats["unique_processed"], 1);
    assert_eq!(stats["duplicate_dropped"], 1);
    assert_eq!(stats["topics_count"], 1);
    assert_eq!(stats["topics"], json!(["t"]));
    assert!(stats["uptime_seconds"].as_f64().unwrap() >= 0.0);

    pipeline.shutdown().await;
}

#[actix_web::test]
async fn test_batch_keeps_order() {
    let (_dir, pipeline) = setup(64, true).await;
    let app = app!(pipeline);

    let batch: Vec<Value> = (0..5).map(|i| event("batch", &format!("b{i}"))).collect();
    let req = test::TestRequest::post()
        .uri("/publish")
        .set_json(&batch)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["accepted"], 5);

    drained(&pipeline).await;

    let req = test::TestRequest::get().uri("/events?topic=batch").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let ids: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["b0", "b1", "b2", "b3", "b4"]);

    pipeline.shutdown().await;
}

#[actix_web::test]
async fn test_invalid_event_rejects_batch() {
    let (_dir, pipeline) = setup(64, true).await;
    let app = app!(pipeline);

    let cases = vec![
        json!([event("t", "ok"), {"topic": "t", "event_id": "x", "source": "s"}]),
        json!({"topic": "", "event_id": "a", "timestamp": "2025-10-24", "source": "s"}),
        json!({"topic": "t", "event_id": "a", "timestamp": "yesterday", "source": "s"}),
        json!({"topic": "t".repeat(256), "event_id": "a", "timestamp": "2025-10-24", "source": "s"}),
        json!({"topic": "t", "event_id": "a", "timestamp": "2025-10-24", "source": "s", "payload": [1, 2]}),
        json!({"topic": "t", "event_id": "a", "timestamp": "2025-10-24", "source": "s", "payload": "text"}),
        json!({"topic": "t", "event_id": "a", "timestamp": "2025-10-24", "source": "s", "payload": 5}),
    ];

    for body in cases {
        let req = test::TestRequest::post()
            .uri("/publish")
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "body: {body}");
    }

    let req = test::TestRequest::post()
        .uri("/publish")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    assert_eq!(pipeline.stats().received, 0);
    pipeline.shutdown().await;
}

#[actix_web::test]
async fn test_events_requires_topic() {
    let (_dir, pipeline) = setup(64, true).await;
    let app = app!(pipeline);

    for uri in ["/events", "/events?topic="] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "uri: {uri}");
    }

    let req = test::TestRequest::get().uri("/events?topic=unknown").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 0);
    assert_eq!(body["events"], json!([]));

    pipeline.shutdown().await;
}

#[actix_web::test]
async fn test_full_queue_returns_503_with_receipt() {
    // Consumer not started so nothing drains.
    let (_dir, pipeline) = setup(2, false).await;
    let app = app!(pipeline);

    let batch: Vec<Value> = (0..4).map(|i| event("bp", &format!("e{i}"))).collect();
    let req = test::TestRequest::post()
        .uri("/publish")
        .set_json(&batch)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["accepted"], 2);
    assert_eq!(body["submitted"], 4);
    assert_eq!(pipeline.stats().received, 2);
}

#[actix_web::test]
async fn test_health_and_metrics() {
    let (_dir, pipeline) = setup(8, true).await;
    let app = app!(pipeline);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["consumer_running"], true);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    pipeline.shutdown().await;
}
