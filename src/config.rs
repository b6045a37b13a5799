use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Clarifai model used for every classification.
pub const MODEL_ID: &str = "general-image-recognition";
pub const MODEL_VERSION_ID: &str = "aa7f35c01e0642fda5cf400f543e7c40";

pub const DEFAULT_API_BASE: &str = "https://api.clarifai.com";

/// Number of concurrent workers per run.
pub const WORKER_COUNT: usize = 5;

/// Total attempts (first call included) made for one image.
pub const MAX_ATTEMPTS: u32 = 8;

pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// CSV file whose first column holds the image URLs
    #[arg(long, env = "INPUT_CSV", default_value = "input_images.csv")]
    pub input: PathBuf,

    /// CSV file the tags and confidence scores are written to
    #[arg(long, env = "OUTPUT_CSV", default_value = "classified_images.csv")]
    pub output: PathBuf,

    /// Clarifai API key (personal access token)
    #[arg(long, env = "CLARIFAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Base URL of the Clarifai REST API
    #[arg(long, env = "CLARIFAI_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Classify every URL without checking it is reachable first
    #[arg(long, env = "SKIP_URL_VALIDATION")]
    pub skip_url_validation: bool,

    /// Only retry throttled requests instead of every failure
    #[arg(long, env = "RETRY_RATE_LIMIT_ONLY")]
    pub retry_rate_limit_only: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Serve Prometheus metrics on this address while the batch runs
    #[arg(long, env = "METRICS_ADDRESS")]
    pub metrics_address: Option<SocketAddr>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("skip_url_validation", &self.skip_url_validation)
            .field("retry_rate_limit_only", &self.retry_rate_limit_only)
            .field("log_json", &self.log_json)
            .field("metrics_address", &self.metrics_address)
            .finish()
    }
}

/// Identifies the remote model a client is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub model_id: String,
    pub version_id: String,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            model_id: MODEL_ID.to_string(),
            version_id: MODEL_VERSION_ID.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: ModelSpec,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        let retry = if config.retry_rate_limit_only {
            RetryPolicy::default().rate_limit_only()
        } else {
            RetryPolicy::default()
        };

        Self {
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: ModelSpec::default(),
            retry,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub workers: usize,
    pub validate_urls: bool,
    pub validation_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: WORKER_COUNT,
            validate_urls: true,
            validation_timeout: VALIDATION_TIMEOUT,
        }
    }
}

impl From<&Config> for BatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            validate_urls: !config.skip_url_validation,
            ..Self::default()
        }
    }
}
