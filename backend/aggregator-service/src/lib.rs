//! HTTP boundary for the idempotent event aggregator.
//!
//! Routes are registered through [`configure`] so the binary and the
//! integration tests build the same app.

pub mod config;
pub mod error;
pub mod handlers;

use actix_web::web;

pub use config::{Config, LogFormat};
pub use error::AppError;
pub use handlers::AppState;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into());

    cfg.app_data(json_config)
        .route("/publish", web::post().to(handlers::publish))
        .route("/events", web::get().to(handlers::list_events))
        .route("/stats", web::get().to(handlers::stats))
        .route("/health", web::get().to(handlers::health))
        .route("/metrics", web::get().to(handlers::metrics));
}
