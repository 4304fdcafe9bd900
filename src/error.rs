//! Pipeline error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use tracing::{error, warn};

/// Every failure the document pipeline can surface to a caller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Failed to store document: {0}")]
    Storage(String),

    #[error("Failed to start OCR job: {0}")]
    JobStart(String),

    #[error("OCR job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("OCR job {job_id} did not finish within {elapsed:?} ({attempts} status checks)")]
    PollingTimeout {
        job_id: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Text analysis failed: {0}")]
    Analysis(String),

    #[error("Processing cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PollingTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::JobStart(_) | Self::JobFailed { .. } | Self::Analysis(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        if status.is_server_error() {
            error!("Request failed ({}): {}", status, message);
        } else {
            warn!("Rejected request ({}): {}", status, message);
        }

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Render an error with its full `anyhow` context chain on one line.
pub(crate) fn chain(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
