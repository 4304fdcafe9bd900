//! Service configuration.
//!
//! Everything is read from the environment (after `.env` is loaded in `main`).
//! Lookups go through a closure so tests can feed a plain map instead of
//! mutating the process environment.

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_UPLOAD_PREFIX: &str = "uploads";
const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024; // 100MB

/// How the request waits for an OCR job to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Query job status with backoff until it is terminal.
    Poll,
    /// Start the job with an SNS channel and wait for the delivery.
    Notify,
}

impl FromStr for CompletionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Ok(Self::Poll),
            "notify" | "notification" | "sns" => Ok(Self::Notify),
            other => bail!("unknown completion mode '{}' (expected 'poll' or 'notify')", other),
        }
    }
}

/// SNS channel Textract publishes job completion to.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub topic_arn: String,
    pub role_arn: String,
}

/// Backoff and ceiling for the completion poller.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            max_attempts: 60,
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollConfig {
    /// Delay to use after `current`: doubled, capped at `max_interval`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bucket: String,
    pub region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub upload_prefix: String,
    pub completion_mode: CompletionMode,
    pub notification: Option<NotificationConfig>,
    pub analysis_enabled: bool,
    pub analysis_language: String,
    pub poll: PollConfig,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bucket = get("S3_BUCKET").context("S3_BUCKET environment variable not set")?;

        let completion_mode = match get("COMPLETION_MODE") {
            Some(raw) => raw.parse().context("Invalid COMPLETION_MODE")?,
            None => CompletionMode::Poll,
        };

        let notification = match (get("SNS_TOPIC_ARN"), get("SNS_ROLE_ARN")) {
            (Some(topic_arn), Some(role_arn)) => Some(NotificationConfig {
                topic_arn,
                role_arn,
            }),
            _ => None,
        };
        if completion_mode == CompletionMode::Notify && notification.is_none() {
            bail!("COMPLETION_MODE=notify requires SNS_TOPIC_ARN and SNS_ROLE_ARN");
        }

        let defaults = PollConfig::default();
        let poll = PollConfig {
            initial_interval: Duration::from_millis(parse_or(
                &get,
                "POLL_INITIAL_INTERVAL_MS",
                defaults.initial_interval.as_millis() as u64,
            )?),
            max_interval: Duration::from_millis(parse_or(
                &get,
                "POLL_MAX_INTERVAL_MS",
                defaults.max_interval.as_millis() as u64,
            )?),
            max_attempts: parse_or(&get, "POLL_MAX_ATTEMPTS", defaults.max_attempts)?,
            timeout: Duration::from_secs(parse_or(
                &get,
                "POLL_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
        };
        if poll.max_attempts == 0 {
            bail!("POLL_MAX_ATTEMPTS must be at least 1");
        }
        if poll.initial_interval > poll.max_interval {
            bail!("POLL_INITIAL_INTERVAL_MS must not exceed POLL_MAX_INTERVAL_MS");
        }

        Ok(Self {
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            bucket,
            region: get("AWS_REGION"),
            s3_endpoint: get("S3_ENDPOINT"),
            upload_prefix: get("UPLOAD_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_UPLOAD_PREFIX.to_string()),
            completion_mode,
            notification,
            analysis_enabled: parse_flag(&get, "ANALYSIS_ENABLED", true)?,
            analysis_language: get("ANALYSIS_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            poll,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("Invalid {} '{}': expected true or false", key, v),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("S3_BUCKET", "docs")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.bucket, "docs");
        assert_eq!(config.upload_prefix, "uploads");
        assert_eq!(config.completion_mode, CompletionMode::Poll);
        assert!(config.analysis_enabled);
        assert_eq!(config.analysis_language, "en");
        assert_eq!(config.poll.max_attempts, 60);
        assert_eq!(config.poll.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_bucket_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));
    }

    #[test]
    fn test_notify_requires_channel() {
        let err = load(&[("S3_BUCKET", "docs"), ("COMPLETION_MODE", "notify")]).unwrap_err();
        assert!(err.to_string().contains("SNS_TOPIC_ARN"));

        let config = load(&[
            ("S3_BUCKET", "docs"),
            ("COMPLETION_MODE", "notify"),
            ("SNS_TOPIC_ARN", "arn:aws:sns:us-east-1:123:textract"),
            ("SNS_ROLE_ARN", "arn:aws:iam::123:role/textract"),
        ])
        .unwrap();
        assert_eq!(config.completion_mode, CompletionMode::Notify);
        assert!(config.notification.is_some());
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = load(&[("S3_BUCKET", "docs"), ("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = load(&[("S3_BUCKET", "docs"), ("ANALYSIS_ENABLED", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("ANALYSIS_ENABLED"));

        let err = load(&[("S3_BUCKET", "docs"), ("POLL_MAX_ATTEMPTS", "0")]).unwrap_err();
        assert!(err.to_string().contains("POLL_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("S3_BUCKET", "docs"),
            ("PORT", "8080"),
            ("UPLOAD_PREFIX", "/incoming/"),
            ("ANALYSIS_ENABLED", "false"),
            ("POLL_INITIAL_INTERVAL_MS", "250"),
            ("POLL_MAX_INTERVAL_MS", "2000"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.upload_prefix, "incoming");
        assert!(!config.analysis_enabled);
        assert_eq!(config.poll.initial_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let poll = PollConfig::default();
        assert_eq!(poll.next_interval(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(poll.next_interval(Duration::from_secs(4)), Duration::from_secs(8));
        assert_eq!(poll.next_interval(Duration::from_secs(8)), Duration::from_secs(10));
        assert_eq!(poll.next_interval(Duration::from_secs(10)), Duration::from_secs(10));
    }
}
