//! Job submitter: asks the OCR service to start working on a stored upload.

use std::sync::Arc;
use tracing::info;

use crate::error::{chain, PipelineError};
use crate::ocr::{JobHandle, JobRequest, NotificationTarget, OcrService};
use crate::storage::StorageKey;

#[derive(Clone)]
pub struct JobSubmitter {
    ocr: Arc<dyn OcrService>,
    bucket: String,
}

impl JobSubmitter {
    pub fn new(ocr: Arc<dyn OcrService>, bucket: impl Into<String>) -> Self {
        Self {
            ocr,
            bucket: bucket.into(),
        }
    }

    pub fn ocr(&self) -> &Arc<dyn OcrService> {
        &self.ocr
    }

    /// Start a job. Only requests processing; says nothing about progress.
    pub async fn submit(
        &self,
        key: &StorageKey,
        notification: Option<NotificationTarget>,
    ) -> Result<JobHandle, PipelineError> {
        let request = JobRequest {
            bucket: self.bucket.clone(),
            key: key.as_str().to_string(),
            notification,
        };

        let job_id = self
            .ocr
            .start_job(&request)
            .await
            .map_err(|e| PipelineError::JobStart(chain(&e)))?
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                PipelineError::JobStart(format!("{} returned no job identifier", self.ocr.name()))
            })?;

        info!("Processing started for {}, job id: {}", key, job_id);
        Ok(JobHandle::new(job_id))
    }
}
