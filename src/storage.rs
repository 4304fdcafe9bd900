//! Blob uploader: puts incoming documents into object storage under a fresh key.

use aws_config::SdkConfig;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use bytes::Bytes;
use object_store::aws::{AmazonS3Builder, AwsCredential};
use object_store::path::Path;
use object_store::{CredentialProvider, ObjectStore, PutOptions, PutPayload};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::PipelineError;

/// An uploaded file as received from the multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Bytes,
}

/// Key of a stored upload, unique per call to [`StorageKey::generate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// `{prefix}/{uuid}-{filename}` with the filename reduced to a safe charset.
    pub fn generate(prefix: &str, filename: &str) -> Self {
        let name = sanitize_filename(filename);
        let key = if prefix.is_empty() {
            format!("{}-{}", Uuid::new_v4(), name)
        } else {
            format!("{}/{}-{}", prefix, Uuid::new_v4(), name)
        };
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drop any directory part and replace characters S3 keys handle badly.
fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Writes uploads into a bucket through any [`ObjectStore`] backend.
#[derive(Clone)]
pub struct BlobUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl BlobUploader {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Build an S3-backed uploader that resolves region and credentials
    /// through the same SDK config as the Textract and Comprehend clients.
    pub fn s3(
        bucket: &str,
        aws: &SdkConfig,
        endpoint: Option<&str>,
        prefix: &str,
    ) -> anyhow::Result<Self> {
        let store = s3_builder(bucket, aws, endpoint)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure S3 store: {}", e))?;

        Ok(Self::new(Arc::new(store), bucket, prefix))
    }

    /// Bucket the OCR service should read uploads from.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn upload(&self, file: &UploadedFile) -> Result<StorageKey, PipelineError> {
        let key = StorageKey::generate(&self.prefix, &file.filename);
        let location = Path::from(key.as_str());
        let size = file.data.len();
        let start = Instant::now();

        self.store
            .put_opts(
                &location,
                PutPayload::from(file.data.clone()),
                PutOptions::default(),
            )
            .await
            .map_err(|e| {
                error!("Upload of {} to bucket {} failed: {}", key, self.bucket, e);
                PipelineError::Storage(e.to_string())
            })?;

        info!(
            "Uploaded {} ({} bytes) to bucket {} in {:?}",
            key,
            size,
            self.bucket,
            start.elapsed()
        );

        Ok(key)
    }
}

fn s3_builder(bucket: &str, aws: &SdkConfig, endpoint: Option<&str>) -> AmazonS3Builder {
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

    if let Some(region) = aws.region() {
        builder = builder.with_region(region.to_string());
    }
    if let Some(provider) = aws.credentials_provider() {
        builder = builder.with_credentials(Arc::new(SdkCredentials::new(provider)));
    }
    if let Some(endpoint) = endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    builder
}

/// Refresh credentials this long before they expire.
const CREDENTIAL_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Feeds credentials from the AWS SDK provider chain (env, profile, SSO,
/// instance role) to object_store, caching them until shortly before expiry.
struct SdkCredentials {
    provider: SharedCredentialsProvider,
    cached: Mutex<Option<(Arc<AwsCredential>, Option<SystemTime>)>>,
}

impl SdkCredentials {
    fn new(provider: SharedCredentialsProvider) -> Self {
        Self {
            provider,
            cached: Mutex::new(None),
        }
    }
}

impl fmt::Debug for SdkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkCredentials").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl CredentialProvider for SdkCredentials {
    type Credential = AwsCredential;

    async fn get_credential(&self) -> object_store::Result<Arc<AwsCredential>> {
        let mut cached = self.cached.lock().await;

        if let Some((credential, expiry)) = cached.as_ref() {
            let fresh = match expiry {
                Some(at) => *at > SystemTime::now() + CREDENTIAL_REFRESH_MARGIN,
                None => true,
            };
            if fresh {
                return Ok(credential.clone());
            }
        }

        let credentials = self
            .provider
            .provide_credentials()
            .await
            .map_err(|e| object_store::Error::Generic {
                store: "S3",
                source: Box::new(e),
            })?;
        debug!("Resolved AWS credentials for uploads (expiry {:?})", credentials.expiry());

        let credential = Arc::new(AwsCredential {
            key_id: credentials.access_key_id().to_string(),
            secret_key: credentials.secret_access_key().to_string(),
            token: credentials.session_token().map(str::to_string),
        });
        *cached = Some((credential.clone(), credentials.expiry()));

        Ok(credential)
    }
}
