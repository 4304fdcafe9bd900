//! AWS Textract OCR backend (asynchronous text detection).

use anyhow::{Context, Result};
use aws_sdk_textract::error::DisplayErrorContext;
use aws_sdk_textract::types::{
    BlockType, DocumentLocation, JobStatus as TextractJobStatus, NotificationChannel, S3Object,
};
use aws_sdk_textract::Client;
use tracing::{debug, info, warn};

use super::{BlockKind, JobHandle, JobRequest, JobResult, JobStatus, OcrService, TextBlock};

/// Textract returns at most this many blocks per page.
const MAX_RESULTS_PER_PAGE: i32 = 1000;

pub struct TextractOcr {
    client: Client,
}

impl TextractOcr {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait::async_trait]
impl OcrService for TextractOcr {
    fn name(&self) -> &str {
        "textract"
    }

    async fn start_job(&self, request: &JobRequest) -> Result<Option<String>> {
        let location = DocumentLocation::builder()
            .s3_object(
                S3Object::builder()
                    .bucket(&request.bucket)
                    .name(&request.key)
                    .build(),
            )
            .build();

        let mut call = self
            .client
            .start_document_text_detection()
            .document_location(location);

        if let Some(target) = &request.notification {
            let channel = NotificationChannel::builder()
                .sns_topic_arn(&target.topic_arn)
                .role_arn(&target.role_arn)
                .build()
                .context("Invalid Textract notification channel")?;
            call = call.notification_channel(channel).job_tag(&target.job_tag);
        }

        let response = call
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", DisplayErrorContext(&e)))
            .context("StartDocumentTextDetection request failed")?;

        let job_id = response.job_id().map(str::to_string);
        if let Some(id) = &job_id {
            info!("Textract job {} started for s3://{}/{}", id, request.bucket, request.key);
        }
        Ok(job_id)
    }

    async fn get_job_result(&self, job: &JobHandle) -> Result<JobResult> {
        let mut blocks = Vec::new();
        let mut next_token: Option<String> = None;
        let mut status;
        let mut status_message;
        let mut pages = 0u32;

        loop {
            let response = self
                .client
                .get_document_text_detection()
                .job_id(job.as_str())
                .max_results(MAX_RESULTS_PER_PAGE)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("{}", DisplayErrorContext(&e)))
                .context("GetDocumentTextDetection request failed")?;
            pages += 1;

            status = match response.job_status() {
                Some(s) => map_status(job, s),
                None => anyhow::bail!("Textract response for job {} carried no status", job),
            };
            status_message = response.status_message().map(str::to_string);

            blocks.extend(response.blocks().iter().map(|block| TextBlock {
                kind: match block.block_type() {
                    Some(BlockType::Line) => BlockKind::Line,
                    Some(BlockType::Word) => BlockKind::Word,
                    _ => BlockKind::Other,
                },
                text: block.text().map(str::to_string),
            }));

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(
            "Textract job {}: {:?}, {} blocks over {} page(s)",
            job,
            status,
            blocks.len(),
            pages
        );

        Ok(JobResult {
            status,
            blocks,
            status_message,
        })
    }
}

fn map_status(job: &JobHandle, status: &TextractJobStatus) -> JobStatus {
    match status {
        TextractJobStatus::InProgress => JobStatus::Running,
        TextractJobStatus::Succeeded => JobStatus::Succeeded,
        TextractJobStatus::PartialSuccess => {
            warn!("Textract job {} only partially succeeded", job);
            JobStatus::Succeeded
        }
        TextractJobStatus::Failed => JobStatus::Failed,
        other => {
            warn!("Textract job {} reported unknown status {}", job, other.as_str());
            JobStatus::Running
        }
    }
}
