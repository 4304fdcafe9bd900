//! Asynchronous OCR job abstraction.
//!
//! Defines the [`OcrService`] trait and the job types shared by the submitter,
//! the completion strategies and the Textract adapter.

pub mod textract;

use std::fmt;

/// Identifier of one running OCR job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The only job states the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Line,
    Word,
    Other,
}

/// One recognized element of a job's result set.
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub kind: BlockKind,
    pub text: Option<String>,
}

/// Status plus every block the service currently exposes for a job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub status: JobStatus,
    pub blocks: Vec<TextBlock>,
    pub status_message: Option<String>,
}

/// SNS channel and tag attached to a job so its completion is pushed to us.
#[derive(Debug, Clone)]
pub struct NotificationTarget {
    pub topic_arn: String,
    pub role_arn: String,
    pub job_tag: String,
}

/// Everything needed to start a text-detection job on a stored object.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub bucket: String,
    pub key: String,
    pub notification: Option<NotificationTarget>,
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrService: Send + Sync {
    fn name(&self) -> &str;

    /// Ask the service to start processing. `Ok(None)` means the service
    /// accepted the call but handed back no job id.
    async fn start_job(&self, request: &JobRequest) -> anyhow::Result<Option<String>>;

    /// Current status and full result set of a job.
    async fn get_job_result(&self, job: &JobHandle) -> anyhow::Result<JobResult>;
}

/// Join the text of every LINE block with single spaces and trim.
pub fn collect_line_text(blocks: &[TextBlock]) -> String {
    let lines: Vec<&str> = blocks
        .iter()
        .filter(|b| b.kind == BlockKind::Line)
        .filter_map(|b| b.text.as_deref())
        .filter(|t| !t.is_empty())
        .collect();

    lines.join(" ").trim().to_string()
}
