//! Sentiment and entity analysis of extracted text.

pub mod comprehend;

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::{chain, PipelineError};

/// Confidence per sentiment category, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SentimentScores {
    pub positive: f32,
    pub negative: f32,
    pub neutral: f32,
    pub mixed: f32,
}

#[derive(Debug, Clone)]
pub struct SentimentDetection {
    pub label: String,
    pub scores: SentimentScores,
}

#[derive(Debug, Clone)]
pub struct DetectedEntity {
    pub text: String,
    pub entity_type: String,
    pub score: Option<f32>,
}

/// Async trait implemented by each NLP backend.
#[async_trait::async_trait]
pub trait NlpService: Send + Sync {
    fn name(&self) -> &str;
    async fn detect_sentiment(&self, text: &str, language: &str) -> anyhow::Result<SentimentDetection>;
    async fn detect_entities(&self, text: &str, language: &str) -> anyhow::Result<Vec<DetectedEntity>>;
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Sentiment {
    pub sentiment: String,
    pub score: SentimentScores,
}

#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Confidence with two decimals, e.g. `"0.93"`.
    pub score: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub sentiment: Sentiment,
    pub entities: Vec<Entity>,
}

// ============================================================================
// Analyzer
// ============================================================================

#[derive(Clone)]
pub struct TextAnalyzer {
    nlp: Arc<dyn NlpService>,
    language: String,
}

impl TextAnalyzer {
    pub fn new(nlp: Arc<dyn NlpService>, language: impl Into<String>) -> Self {
        Self {
            nlp,
            language: language.into(),
        }
    }

    pub async fn analyze(&self, text: &str) -> Result<AnalysisResult, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::Analysis("no text to analyze".to_string()));
        }

        let (sentiment, entities) = tokio::try_join!(
            self.nlp.detect_sentiment(text, &self.language),
            self.nlp.detect_entities(text, &self.language),
        )
        .map_err(|e| PipelineError::Analysis(chain(&e)))?;

        if entities.is_empty() {
            info!("No entities detected in the text");
        }

        let result = AnalysisResult {
            sentiment: Sentiment {
                sentiment: sentiment.label,
                score: sentiment.scores,
            },
            entities: entities
                .into_iter()
                .map(|e| Entity {
                    text: e.text,
                    entity_type: e.entity_type,
                    score: format_score(e.score.unwrap_or(0.0)),
                })
                .collect(),
        };

        info!(
            "Analysis via {}: sentiment {}, {} entities",
            self.nlp.name(),
            result.sentiment.sentiment,
            result.entities.len()
        );
        Ok(result)
    }
}

/// Two-decimal score string, rounding exact halves up as `toFixed(2)` does.
///
/// The f32 is widened through its shortest decimal form so `0.995` is seen
/// as the double a JSON client would parse, not as `0.99500000476...`.
fn format_score(score: f32) -> String {
    let value: f64 = score.to_string().parse().unwrap_or(f64::from(score));

    // Only odd multiples of 1/8 are exact ties at two decimals
    if (value * 8.0).fract() == 0.0 {
        format!("{:.2}", (value * 100.0).round() / 100.0)
    } else {
        format!("{:.2}", value)
    }
}
