//! OCR Insight - document text extraction and analysis server.
//!
//! Uploads go to S3, Textract recognizes the text asynchronously, and
//! Comprehend optionally adds sentiment and entities to the response.

mod analysis;
mod completion;
mod config;
mod error;
mod ocr;
mod pipeline;
mod routes;
mod storage;
mod submitter;

#[cfg(test)]
mod testing;

use analysis::comprehend::ComprehendNlp;
use analysis::TextAnalyzer;
use anyhow::Context;
use aws_config::{BehaviorVersion, Region};
use completion::notify::{CompletionRegistry, NotificationStrategy};
use completion::poll::PollingStrategy;
use completion::JobCompletionStrategy;
use config::{AppConfig, CompletionMode};
use ocr::textract::TextractOcr;
use ocr::OcrService;
use pipeline::DocumentPipeline;
use routes::AppState;
use std::sync::Arc;
use storage::BlobUploader;
use submitter::JobSubmitter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ocr_insight=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Config: bucket={}, completion={:?}, analysis={}, poll ceiling={} checks / {:?}",
        config.bucket,
        config.completion_mode,
        config.analysis_enabled,
        config.poll.max_attempts,
        config.poll.timeout
    );

    // AWS clients are built once and shared by every request
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    let aws = loader.load().await;

    let uploader = BlobUploader::s3(
        &config.bucket,
        &aws,
        config.s3_endpoint.as_deref(),
        &config.upload_prefix,
    )?;

    let ocr: Arc<dyn OcrService> = Arc::new(TextractOcr::new(&aws));
    let submitter = JobSubmitter::new(ocr, config.bucket.clone());

    let mut notifications = None;
    let completion: Arc<dyn JobCompletionStrategy> = match config.completion_mode {
        CompletionMode::Poll => Arc::new(PollingStrategy::new(submitter, config.poll.clone())),
        CompletionMode::Notify => {
            let channel = config
                .notification
                .clone()
                .context("Notification mode without an SNS channel")?;
            let registry = CompletionRegistry::new();
            notifications = Some(registry.clone());
            Arc::new(NotificationStrategy::new(
                submitter,
                registry,
                channel,
                config.poll.clone(),
            ))
        }
    };
    info!("Completion strategy: {}", completion.name());

    let analyzer = config.analysis_enabled.then(|| {
        TextAnalyzer::new(
            Arc::new(ComprehendNlp::new(&aws)),
            config.analysis_language.clone(),
        )
    });

    let shutdown = CancellationToken::new();
    let state = AppState {
        pipeline: Arc::new(DocumentPipeline::new(uploader, completion, analyzer)),
        notifications,
        http: reqwest::Client::new(),
        shutdown: shutdown.clone(),
    };

    let app = routes::router(state, config.max_upload_bytes);

    // Run server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM, cancelling in-flight job waits.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }

    info!("Shutting down, cancelling pending jobs...");
    shutdown.cancel();
}
