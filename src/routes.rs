//! HTTP surface: upload endpoint, SNS receiver, health check.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::completion::notify::{route_sns_delivery, CompletionRegistry, SnsOutcome};
use crate::error::PipelineError;
use crate::pipeline::{DocumentPipeline, ProcessedDocument};
use crate::storage::UploadedFile;

const NO_FILE: &str = "No file uploaded";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DocumentPipeline>,
    /// Present only when jobs complete through SNS notifications.
    pub notifications: Option<CompletionRegistry>,
    pub http: reqwest::Client,
    /// Cancelled on shutdown; every request waits on a child of it.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let mut extract = Router::new().route("/process", post(process_document));
    if state.notifications.is_some() {
        extract = extract.route("/notifications", post(receive_notification));
    }

    Router::new()
        .route("/health", get(health))
        .nest("/extract-text", extract)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Upload a document, OCR it and (optionally) analyze the text.
async fn process_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessedDocument>, PipelineError> {
    let Ok(mut multipart) = multipart else {
        return Err(PipelineError::BadRequest(NO_FILE.to_string()));
    };

    let file = read_single_file(&mut multipart).await?;
    info!("Received file: {} ({} bytes)", file.filename, file.data.len());

    // Dropping this future (client gone) abandons the wait as well.
    let cancel = state.shutdown.child_token();
    let document = state.pipeline.process(file, &cancel).await?;

    Ok(Json(document))
}

/// Pull exactly one `file` field out of the form.
async fn read_single_file(multipart: &mut Multipart) -> Result<UploadedFile, PipelineError> {
    let mut file: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Multipart error", e))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if file.is_some() {
            return Err(PipelineError::BadRequest(
                "Only one file may be uploaded".to_string(),
            ));
        }

        let filename = field.file_name().unwrap_or("document").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error("Failed to read file", e))?;
        file = Some(UploadedFile { filename, data });
    }

    file.filter(|f| !f.data.is_empty())
        .ok_or_else(|| PipelineError::BadRequest(NO_FILE.to_string()))
}

/// Body over the upload limit is 413; anything else wrong with the stream is 400.
fn multipart_error(context: &str, err: MultipartError) -> PipelineError {
    let message = format!("{}: {}", context, err.body_text());
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PipelineError::PayloadTooLarge(message)
    } else {
        PipelineError::BadRequest(message)
    }
}

/// SNS HTTP(S) subscription endpoint for Textract completion messages.
async fn receive_notification(State(state): State<AppState>, body: String) -> StatusCode {
    let Some(registry) = &state.notifications else {
        return StatusCode::NOT_FOUND;
    };

    match route_sns_delivery(registry, &body) {
        Ok(SnsOutcome::ConfirmSubscription { topic_arn, url }) => {
            confirm_subscription(&state.http, &topic_arn, &url).await
        }
        Ok(SnsOutcome::Delivered) | Ok(SnsOutcome::Ignored) => StatusCode::OK,
        Err(e) => {
            warn!("Rejected SNS delivery: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

async fn confirm_subscription(http: &reqwest::Client, topic_arn: &str, url: &str) -> StatusCode {
    if !is_sns_url(url) {
        warn!("Refusing to confirm subscription via non-SNS URL {}", url);
        return StatusCode::BAD_REQUEST;
    }

    match http.get(url).send().await.and_then(|r| r.error_for_status()) {
        Ok(_) => {
            info!("Confirmed SNS subscription to {}", topic_arn);
            StatusCode::OK
        }
        Err(e) => {
            error!("Failed to confirm SNS subscription to {}: {}", topic_arn, e);
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Only follow confirmation links that point at an SNS endpoint.
fn is_sns_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            parsed.scheme() == "https"
                && parsed
                    .host_str()
                    .map(|h| h.starts_with("sns.") && h.ends_with(".amazonaws.com"))
                    .unwrap_or(false)
        }
        Err(_) => false,
    }
}
