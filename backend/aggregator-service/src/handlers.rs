//! HTTP handlers. Thin adapters over [`IngestPipeline`].

use actix_web::{web, HttpResponse};
use idempotent_ingest::{Event, EventRecord, IngestPipeline};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub accepted: usize,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    pub count: usize,
    pub events: Vec<EventRecord>,
}

/// A body is either one event object or an array of them.
fn parse_events(body: Value) -> Result<Vec<Event>> {
    let items = match body {
        Value::Array(items) => items,
        single => vec![single],
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            serde_json::from_value::<Event>(raw)
                .map_err(|e| AppError::Validation(format!("item {index}: {e}")))
        })
        .collect()
}

/// POST /publish
pub async fn publish(state: web::Data<AppState>, body: web::Json<Value>) -> Result<HttpResponse> {
    let events = parse_events(body.into_inner())?;
    let receipt = state.pipeline.publish(events)?;

    if !receipt.is_complete() {
        warn!(
            accepted = receipt.accepted,
            submitted = receipt.submitted,
            "Publish hit backpressure"
        );
        return Err(AppError::Backpressure {
            accepted: receipt.accepted,
            submitted: receipt.submitted,
        });
    }

    debug!(accepted = receipt.accepted, "Publish accepted");
    Ok(HttpResponse::Ok().json(PublishResponse {
        accepted: receipt.accepted,
    }))
}

/// GET /events?topic=...
pub async fn list_events(
    state: web::Data<AppState>,
    query: web::Query<EventsQuery>,
) -> Result<HttpResponse> {
    let topic = query
        .into_inner()
        .topic
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("topic must be a non-empty string".to_string()))?;

    let events = state.pipeline.list_events(&topic).await?;
    Ok(HttpResponse::Ok().json(EventsResponse {
        count: events.len(),
        events,
    }))
}

/// GET /stats
pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.pipeline.stats())
}

/// GET /health
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "consumer_running": state.pipeline.consumer().is_running(),
    }))
}

/// GET /metrics
pub async fn metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
