//! Document pipeline: upload → OCR job → wait → optional analysis.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analysis::{Entity, Sentiment, TextAnalyzer};
use crate::completion::JobCompletionStrategy;
use crate::error::PipelineError;
use crate::storage::{BlobUploader, UploadedFile};

/// Response body of `POST /extract-text/process`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocument {
    pub extracted_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
}

pub struct DocumentPipeline {
    uploader: BlobUploader,
    completion: Arc<dyn JobCompletionStrategy>,
    analyzer: Option<TextAnalyzer>,
}

impl DocumentPipeline {
    pub fn new(
        uploader: BlobUploader,
        completion: Arc<dyn JobCompletionStrategy>,
        analyzer: Option<TextAnalyzer>,
    ) -> Self {
        Self {
            uploader,
            completion,
            analyzer,
        }
    }

    /// Run every stage in order. Any failure aborts the run; nothing partial
    /// is returned.
    pub async fn process(
        &self,
        file: UploadedFile,
        cancel: &CancellationToken,
    ) -> Result<ProcessedDocument, PipelineError> {
        let key = self.uploader.upload(&file).await?;
        info!("Uploaded document to {}: {}", self.uploader.bucket(), key);

        let extracted_text = self.completion.extract_text(&key, cancel).await?;

        let (sentiment, entities) = match &self.analyzer {
            Some(analyzer) => {
                let analysis = analyzer.analyze(&extracted_text).await?;
                (Some(analysis.sentiment), Some(analysis.entities))
            }
            None => (None, None),
        };

        info!(
            "Processed {} via {} strategy: {} chars extracted",
            file.filename,
            self.completion.name(),
            extracted_text.len()
        );

        Ok(ProcessedDocument {
            extracted_text,
            sentiment,
            entities,
        })
    }
}
