//! Completion poller: checks job status with bounded exponential backoff.

use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::JobCompletionStrategy;
use crate::config::PollConfig;
use crate::error::PipelineError;
use crate::ocr::{collect_line_text, JobHandle, JobStatus, OcrService};
use crate::storage::StorageKey;
use crate::submitter::JobSubmitter;

/// Waits for one job to reach a terminal state.
///
/// Each status check rebuilds the text from the full result set returned by
/// that check, so the last check before SUCCEEDED is authoritative. Failed
/// checks are logged and retried; the loop gives up after
/// `max_attempts` checks or `timeout` wall time, whichever comes first.
#[derive(Clone)]
pub struct CompletionPoller {
    ocr: Arc<dyn OcrService>,
    config: PollConfig,
}

impl CompletionPoller {
    pub fn new(ocr: Arc<dyn OcrService>, config: PollConfig) -> Self {
        Self { ocr, config }
    }

    pub async fn wait(
        &self,
        job: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        self.wait_since(job, Instant::now(), cancel).await
    }

    /// Like [`wait`](Self::wait), but the wall-time budget runs from `started`
    /// so time already spent on this job counts against it.
    pub async fn wait_since(
        &self,
        job: &JobHandle,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let mut interval = self.config.initial_interval;
        let mut attempts = 0u32;

        loop {
            let remaining = self.config.timeout.saturating_sub(started.elapsed());
            if attempts >= self.config.max_attempts || remaining.is_zero() {
                break;
            }
            attempts += 1;

            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                checked = tokio::time::timeout(remaining, self.ocr.get_job_result(job)) => checked,
            };

            match checked {
                Ok(Ok(result)) => {
                    let text = collect_line_text(&result.blocks);
                    match result.status {
                        JobStatus::Succeeded => {
                            info!(
                                "Job {} succeeded after {} status checks ({:?}), {} chars extracted",
                                job,
                                attempts,
                                started.elapsed(),
                                text.len()
                            );
                            return Ok(text);
                        }
                        JobStatus::Failed => {
                            return Err(PipelineError::JobFailed {
                                job_id: job.to_string(),
                                reason: result
                                    .status_message
                                    .unwrap_or_else(|| "no reason given".to_string()),
                            });
                        }
                        JobStatus::Running => {
                            debug!(
                                "Job {} still running (check {}/{}, {} blocks so far)",
                                job,
                                attempts,
                                self.config.max_attempts,
                                result.blocks.len()
                            );
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("Status check {} for job {} failed, will retry: {:#}", attempts, job, e);
                }
                Err(_) => {
                    warn!("Status check {} for job {} ran past the {:?} budget", attempts, job, remaining);
                }
            }

            if attempts >= self.config.max_attempts {
                break;
            }
            let remaining = self.config.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(interval.min(remaining)) => {}
            }
            interval = self.config.next_interval(interval);
        }

        Err(PipelineError::PollingTimeout {
            job_id: job.to_string(),
            attempts,
            elapsed: started.elapsed(),
        })
    }
}

/// Submit, then poll until the job is terminal.
pub struct PollingStrategy {
    submitter: JobSubmitter,
    poller: CompletionPoller,
}

impl PollingStrategy {
    pub fn new(submitter: JobSubmitter, config: PollConfig) -> Self {
        let poller = CompletionPoller::new(submitter.ocr().clone(), config);
        Self { submitter, poller }
    }
}

#[async_trait::async_trait]
impl JobCompletionStrategy for PollingStrategy {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn extract_text(
        &self,
        key: &StorageKey,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let job = self.submitter.submit(key, None).await?;
        self.poller.wait(&job, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failed, query_error, running, succeeded, ScriptedOcr};
    use std::time::Duration;

    fn poller(ocr: Arc<ScriptedOcr>, config: PollConfig) -> CompletionPoller {
        CompletionPoller::new(ocr, config)
    }

    fn job() -> JobHandle {
        JobHandle::new("job-1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_result_set_is_authoritative() {
        let ocr = Arc::new(ScriptedOcr::new("job-1").with_script(vec![
            running(&["Hello"]),
            running(&["Hello", "World"]),
            succeeded(&["Hello", "World", "Final"]),
        ]));

        let text = poller(ocr.clone(), PollConfig::default())
            .wait(&job(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "Hello World Final");
        assert_eq!(ocr.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job() {
        let ocr = Arc::new(
            ScriptedOcr::new("job-1")
                .with_script(vec![running(&[]), failed("Unsupported document format")]),
        );

        let err = poller(ocr.clone(), PollConfig::default())
            .wait(&job(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::JobFailed { job_id, reason } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(reason, "Unsupported document format");
            }
            other => panic!("expected JobFailed, got {:?}", other),
        }
        // No further checks once FAILED is seen
        assert_eq!(ocr.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let ocr = Arc::new(ScriptedOcr::new("job-1").with_script(vec![
            query_error("connection reset by peer"),
            running(&[]),
            query_error("ThrottlingException"),
            succeeded(&["Done"]),
        ]));

        let text = poller(ocr.clone(), PollConfig::default())
            .wait(&job(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "Done");
        assert_eq!(ocr.queries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling() {
        let ocr = Arc::new(ScriptedOcr::new("job-1"));
        let config = PollConfig {
            timeout: Duration::from_secs(24 * 3600),
            ..PollConfig::default()
        };

        let err = poller(ocr.clone(), config)
            .wait(&job(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::PollingTimeout { attempts: 60, .. }));
        assert_eq!(ocr.queries(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_time_ceiling() {
        let ocr = Arc::new(ScriptedOcr::new("job-1"));
        let started = Instant::now();

        let err = poller(ocr.clone(), PollConfig::default())
            .wait(&job(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::PollingTimeout { attempts, elapsed, .. } => {
                assert!(attempts < 60);
                assert!(elapsed >= Duration::from_secs(300));
            }
            other => panic!("expected PollingTimeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(301));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_counts_from_given_start() {
        let ocr = Arc::new(ScriptedOcr::new("job-1"));
        let started = Instant::now();
        tokio::time::sleep(Duration::from_secs(295)).await;

        let err = poller(ocr.clone(), PollConfig::default())
            .wait_since(&job(), started, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::PollingTimeout { elapsed, .. } => {
                assert!(elapsed >= Duration::from_secs(300) && elapsed < Duration::from_secs(301));
            }
            other => panic!("expected PollingTimeout, got {:?}", other),
        }
        // Checks at 295s, 296s and 298s; the 4s backoff is cut to the 2s left
        assert_eq!(ocr.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_checks() {
        let ocr = Arc::new(ScriptedOcr::new("job-1").with_script(vec![
            running(&[]),
            running(&[]),
            running(&[]),
            succeeded(&["x"]),
        ]));
        let started = Instant::now();

        poller(ocr, PollConfig::default())
            .wait(&job(), &CancellationToken::new())
            .await
            .unwrap();

        // 1s + 2s + 4s
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_check() {
        let ocr = Arc::new(ScriptedOcr::new("job-1"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poller(ocr.clone(), PollConfig::default())
            .wait(&job(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(ocr.queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let ocr = Arc::new(ScriptedOcr::new("job-1"));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = poller(ocr.clone(), PollConfig::default())
            .wait(&job(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        // Checks at t=0, 1s and 3s; the 4s backoff is interrupted at 5s
        assert_eq!(ocr.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_strategy_submits_then_waits() {
        let ocr = Arc::new(
            ScriptedOcr::new("job-7").with_script(vec![running(&[]), succeeded(&["Page one"])]),
        );
        let strategy = PollingStrategy::new(JobSubmitter::new(ocr.clone(), "docs"), PollConfig::default());
        let key = StorageKey::generate("uploads", "scan.png");

        let text = strategy
            .extract_text(&key, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "Page one");
        assert_eq!(ocr.started().len(), 1);
        assert_eq!(ocr.started()[0].key, key.as_str());
    }
}
