use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Classification, Concept};

/// Failure of a single remote call.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("rate limited: {0}")]
    Throttled(String),
    #[error("post model outputs failed, status {code}: {description}")]
    Status { code: u32, description: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, RemoteError::Throttled(_))
    }
}

/// One attempt against the remote recognition model.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    async fn post_model_outputs(&self, image_url: &str) -> Result<Vec<Concept>, RemoteError>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image_url: &str) -> Classification;
}
