//! In-process stand-ins for the OCR and NLP services.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::analysis::{DetectedEntity, NlpService, SentimentDetection, SentimentScores};
use crate::ocr::{BlockKind, JobHandle, JobRequest, JobResult, JobStatus, OcrService, TextBlock};

type Step = Result<JobResult, String>;

pub fn running(lines: &[&str]) -> Step {
    Ok(result(JobStatus::Running, lines, None))
}

pub fn succeeded(lines: &[&str]) -> Step {
    Ok(result(JobStatus::Succeeded, lines, None))
}

pub fn failed(message: &str) -> Step {
    Ok(result(JobStatus::Failed, &[], Some(message)))
}

pub fn query_error(message: &str) -> Step {
    Err(message.to_string())
}

pub fn line(text: &str) -> TextBlock {
    TextBlock {
        kind: BlockKind::Line,
        text: Some(text.to_string()),
    }
}

fn result(status: JobStatus, lines: &[&str], message: Option<&str>) -> JobResult {
    JobResult {
        status,
        blocks: lines.iter().map(|l| line(l)).collect(),
        status_message: message.map(str::to_string),
    }
}

/// OCR service that replays a fixed sequence of results, then keeps
/// reporting RUNNING.
pub struct ScriptedOcr {
    job_id: Option<String>,
    start_error: Option<String>,
    script: Mutex<VecDeque<Step>>,
    started: Mutex<Vec<JobRequest>>,
    queries: AtomicU32,
}

impl ScriptedOcr {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            start_error: None,
            script: Mutex::new(VecDeque::new()),
            started: Mutex::new(Vec::new()),
            queries: AtomicU32::new(0),
        }
    }

    pub fn without_job_id() -> Self {
        Self {
            job_id: None,
            ..Self::new("")
        }
    }

    pub fn rejecting_start(message: &str) -> Self {
        Self {
            start_error: Some(message.to_string()),
            ..Self::new("")
        }
    }

    pub fn with_script(self, steps: Vec<Step>) -> Self {
        *self.script.lock().unwrap() = steps.into();
        self
    }

    pub fn started(&self) -> Vec<JobRequest> {
        self.started.lock().unwrap().clone()
    }

    pub fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OcrService for ScriptedOcr {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start_job(&self, request: &JobRequest) -> anyhow::Result<Option<String>> {
        if let Some(message) = &self.start_error {
            anyhow::bail!("{}", message);
        }
        self.started.lock().unwrap().push(request.clone());
        Ok(self.job_id.clone())
    }

    async fn get_job_result(&self, _job: &JobHandle) -> anyhow::Result<JobResult> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(result(JobStatus::Running, &[], None)),
        }
    }
}

/// NLP service with canned answers.
pub struct StubNlp {
    label: String,
    entities: Vec<DetectedEntity>,
    reject: Option<String>,
    calls: AtomicU32,
}

impl StubNlp {
    pub fn new(label: &str, entities: &[(&str, &str, f32)]) -> Self {
        Self {
            label: label.to_string(),
            entities: entities
                .iter()
                .map(|(text, kind, score)| DetectedEntity {
                    text: text.to_string(),
                    entity_type: kind.to_string(),
                    score: Some(*score),
                })
                .collect(),
            reject: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn neutral_with_two_entities() -> Self {
        Self::new(
            "NEUTRAL",
            &[("Acme Corp", "ORGANIZATION", 0.987), ("Berlin", "LOCATION", 0.912)],
        )
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            reject: Some(message.to_string()),
            ..Self::new("NEUTRAL", &[])
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NlpService for StubNlp {
    fn name(&self) -> &str {
        "stub"
    }

    async fn detect_sentiment(&self, _text: &str, _language: &str) -> anyhow::Result<SentimentDetection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.reject {
            anyhow::bail!("{}", message);
        }
        Ok(SentimentDetection {
            label: self.label.clone(),
            scores: SentimentScores {
                positive: 0.05,
                negative: 0.02,
                neutral: 0.9,
                mixed: 0.03,
            },
        })
    }

    async fn detect_entities(&self, _text: &str, _language: &str) -> anyhow::Result<Vec<DetectedEntity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.reject {
            anyhow::bail!("{}", message);
        }
        Ok(self.entities.clone())
    }
}
