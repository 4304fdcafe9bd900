//! Notification-driven completion.
//!
//! Jobs are started with an SNS notification channel and a per-request job
//! tag. SNS delivers the completion message to `POST /extract-text/notifications`,
//! which hands it to the [`CompletionRegistry`]; the waiting request wakes up
//! and fetches the result set once.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::poll::CompletionPoller;
use super::JobCompletionStrategy;
use crate::config::{NotificationConfig, PollConfig};
use crate::error::PipelineError;
use crate::ocr::{JobStatus, NotificationTarget};
use crate::storage::StorageKey;
use crate::submitter::JobSubmitter;

/// Completion message for one job.
#[derive(Debug, Clone)]
pub struct JobNotice {
    pub job_id: String,
    pub status: JobStatus,
}

/// Job tag → waiting request.
#[derive(Clone, Default)]
pub struct CompletionRegistry {
    waiters: Arc<Mutex<HashMap<String, oneshot::Sender<JobNotice>>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for `tag`. The entry is removed when the returned
    /// [`Registration`] is dropped.
    pub fn register(&self, tag: &str) -> Registration {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.to_string(), tx);

        Registration {
            tag: tag.to_string(),
            registry: self.clone(),
            rx,
        }
    }

    /// Wake the request waiting on `tag`. Returns false if nobody is waiting.
    pub fn complete(&self, tag: &str, notice: JobNotice) -> bool {
        let waiter = self
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag);

        match waiter {
            Some(tx) => tx.send(notice).is_ok(),
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn remove(&self, tag: &str) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag);
    }
}

pub struct Registration {
    tag: String,
    registry: CompletionRegistry,
    rx: oneshot::Receiver<JobNotice>,
}

impl Registration {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// `None` if the registry dropped the waiter without a notice.
    pub async fn recv(&mut self) -> Option<JobNotice> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.tag);
    }
}

// ============================================================================
// SNS deliveries
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "Type")]
enum SnsEnvelope {
    SubscriptionConfirmation {
        #[serde(rename = "TopicArn")]
        topic_arn: String,
        #[serde(rename = "SubscribeURL")]
        subscribe_url: String,
    },
    Notification {
        #[serde(rename = "Message")]
        message: String,
    },
    UnsubscribeConfirmation {},
}

/// Body Textract publishes when a job finishes.
#[derive(Debug, Deserialize)]
struct TextractNotice {
    #[serde(rename = "JobId")]
    job_id: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "JobTag", default)]
    job_tag: Option<String>,
}

/// What the HTTP layer should do after a delivery has been routed.
#[derive(Debug, PartialEq, Eq)]
pub enum SnsOutcome {
    /// GET this URL to confirm the subscription.
    ConfirmSubscription { topic_arn: String, url: String },
    /// A waiting request was woken.
    Delivered,
    /// Valid message that nobody here is waiting for.
    Ignored,
}

/// Parse an SNS delivery body and wake the matching waiter, if any.
pub fn route_sns_delivery(
    registry: &CompletionRegistry,
    body: &str,
) -> Result<SnsOutcome, serde_json::Error> {
    let envelope: SnsEnvelope = serde_json::from_str(body)?;

    let message = match envelope {
        SnsEnvelope::SubscriptionConfirmation {
            topic_arn,
            subscribe_url,
        } => {
            return Ok(SnsOutcome::ConfirmSubscription {
                topic_arn,
                url: subscribe_url,
            })
        }
        SnsEnvelope::UnsubscribeConfirmation {} => return Ok(SnsOutcome::Ignored),
        SnsEnvelope::Notification { message } => message,
    };

    let notice: TextractNotice = serde_json::from_str(&message)?;

    let status = match notice.status.as_str() {
        "SUCCEEDED" | "PARTIAL_SUCCESS" => JobStatus::Succeeded,
        "FAILED" | "ERROR" => JobStatus::Failed,
        other => {
            debug!("Ignoring non-terminal status {} for job {}", other, notice.job_id);
            return Ok(SnsOutcome::Ignored);
        }
    };

    let Some(tag) = notice.job_tag else {
        debug!("Ignoring notification for untagged job {}", notice.job_id);
        return Ok(SnsOutcome::Ignored);
    };

    let delivered = registry.complete(
        &tag,
        JobNotice {
            job_id: notice.job_id.clone(),
            status,
        },
    );

    if delivered {
        info!("Completion notice for job {} ({:?}) delivered", notice.job_id, status);
        Ok(SnsOutcome::Delivered)
    } else {
        debug!("No request waiting on tag {} (job {})", tag, notice.job_id);
        Ok(SnsOutcome::Ignored)
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Submit with an SNS channel and wait for the push instead of polling.
pub struct NotificationStrategy {
    submitter: JobSubmitter,
    registry: CompletionRegistry,
    channel: NotificationConfig,
    poller: CompletionPoller,
    timeout: Duration,
}

impl NotificationStrategy {
    pub fn new(
        submitter: JobSubmitter,
        registry: CompletionRegistry,
        channel: NotificationConfig,
        poll: PollConfig,
    ) -> Self {
        let timeout = poll.timeout;
        let poller = CompletionPoller::new(submitter.ocr().clone(), poll);
        Self {
            submitter,
            registry,
            channel,
            poller,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl JobCompletionStrategy for NotificationStrategy {
    fn name(&self) -> &'static str {
        "notify"
    }

    async fn extract_text(
        &self,
        key: &StorageKey,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let started = Instant::now();

        // Register before submitting so an early notification cannot be missed.
        let mut registration = self.registry.register(&Uuid::new_v4().simple().to_string());

        let target = NotificationTarget {
            topic_arn: self.channel.topic_arn.clone(),
            role_arn: self.channel.role_arn.clone(),
            job_tag: registration.tag().to_string(),
        };
        let job = self.submitter.submit(key, Some(target)).await?;
        info!("Waiting for completion notice of job {} (tag {})", job, registration.tag());
        debug!("{} requests awaiting completion notices", self.registry.pending());

        let notice = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            received = tokio::time::timeout_at(started + self.timeout, registration.recv()) => match received {
                Ok(Some(notice)) => notice,
                Ok(None) => return Err(PipelineError::Cancelled),
                Err(_) => {
                    return Err(PipelineError::PollingTimeout {
                        job_id: job.to_string(),
                        attempts: 0,
                        elapsed: started.elapsed(),
                    })
                }
            },
        };
        drop(registration);

        if notice.job_id != job.as_str() {
            warn!("Notice for tag of job {} names job {}", job, notice.job_id);
        }

        if notice.status == JobStatus::Failed {
            return Err(PipelineError::JobFailed {
                job_id: job.to_string(),
                reason: "completion notice reported FAILED".to_string(),
            });
        }

        // The job is terminal; this normally takes a single status check.
        // Whatever is left of the budget bounds it.
        self.poller.wait_since(&job, started, cancel).await
    }
}
