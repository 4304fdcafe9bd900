//! Submit-and-wait strategies bridging an async OCR job to one HTTP request.
//!
//! [`poll::PollingStrategy`] queries job status with backoff until the job is
//! terminal. [`notify::NotificationStrategy`] starts the job with an SNS
//! channel and sleeps until the completion message is delivered to us.

pub mod notify;
pub mod poll;

use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::storage::StorageKey;

#[async_trait::async_trait]
pub trait JobCompletionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start OCR on `key` and return the extracted text once the job succeeds.
    async fn extract_text(
        &self,
        key: &StorageKey,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError>;
}
