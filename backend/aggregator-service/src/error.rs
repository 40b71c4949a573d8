use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use idempotent_ingest::IngestError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Queue filled while admitting a batch; the prefix stays admitted
    #[error("Intake queue full: accepted {accepted} of {submitted}")]
    Backpressure { accepted: usize, submitted: usize },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted: Option<usize>,
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        let (accepted, submitted) = match self {
            AppError::Backpressure {
                accepted,
                submitted,
            } => (Some(*accepted), Some(*submitted)),
            _ => (None, None),
        };

        HttpResponse::build(code).json(ErrorResponse {
            error: self.to_string(),
            code: code.as_u16(),
            accepted,
            submitted,
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Backpressure { .. } | AppError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidEvent(msg) => AppError::Validation(msg),
            IngestError::QueueFull { .. } | IngestError::QueueClosed => {
                AppError::Unavailable(err.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Backpressure {
                accepted: 1,
                submitted: 3
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_ingest_error() {
        let err: AppError = IngestError::InvalidEvent("topic: too long".into()).into();
        assert!(matches!(err, AppError::Validation(ref m) if m == "topic: too long"));

        let err: AppError = IngestError::QueueFull { capacity: 8 }.into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: AppError = IngestError::QueueClosed.into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: AppError = IngestError::Other(anyhow::anyhow!("disk gone")).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
