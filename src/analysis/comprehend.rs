//! AWS Comprehend NLP backend.

use anyhow::{Context, Result};
use aws_sdk_comprehend::error::DisplayErrorContext;
use aws_sdk_comprehend::types::LanguageCode;
use aws_sdk_comprehend::Client;
use tracing::debug;

use super::{DetectedEntity, NlpService, SentimentDetection, SentimentScores};

pub struct ComprehendNlp {
    client: Client,
}

impl ComprehendNlp {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait::async_trait]
impl NlpService for ComprehendNlp {
    fn name(&self) -> &str {
        "comprehend"
    }

    async fn detect_sentiment(&self, text: &str, language: &str) -> Result<SentimentDetection> {
        let response = self
            .client
            .detect_sentiment()
            .text(text)
            .language_code(LanguageCode::from(language))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", DisplayErrorContext(&e)))
            .context("DetectSentiment request failed")?;

        let label = response
            .sentiment()
            .map(|s| s.as_str().to_string())
            .context("DetectSentiment returned no sentiment")?;

        let score = response.sentiment_score();
        let scores = SentimentScores {
            positive: score.and_then(|s| s.positive()).unwrap_or(0.0),
            negative: score.and_then(|s| s.negative()).unwrap_or(0.0),
            neutral: score.and_then(|s| s.neutral()).unwrap_or(0.0),
            mixed: score.and_then(|s| s.mixed()).unwrap_or(0.0),
        };

        debug!("Comprehend sentiment: {} {:?}", label, scores);
        Ok(SentimentDetection { label, scores })
    }

    async fn detect_entities(&self, text: &str, language: &str) -> Result<Vec<DetectedEntity>> {
        let response = self
            .client
            .detect_entities()
            .text(text)
            .language_code(LanguageCode::from(language))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", DisplayErrorContext(&e)))
            .context("DetectEntities request failed")?;

        let entities: Vec<DetectedEntity> = response
            .entities()
            .iter()
            .filter_map(|entity| {
                Some(DetectedEntity {
                    text: entity.text()?.to_string(),
                    entity_type: entity
                        .r#type()
                        .map(|t| t.as_str().to_string())
                        .unwrap_or_else(|| "OTHER".to_string()),
                    score: entity.score(),
                })
            })
            .collect();

        debug!("Comprehend detected {} entities", entities.len());
        Ok(entities)
    }
}
