use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;

use crate::clarifai_engine::ClarifaiService;
use crate::config::ClientConfig;
use crate::engine::{Classifier, RecognitionService};
use crate::retry::RetryPolicy;
use crate::types::Classification;

/// Classifies single images, retrying the remote call per its policy.
///
/// Holds no per-call state, so one instance is shared by every worker.
pub struct ClassificationClient<S> {
    service: S,
    retry: RetryPolicy,
}

impl ClassificationClient<ClarifaiService> {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let service = ClarifaiService::new(&config)?;
        Ok(Self::with_service(service, config.retry))
    }
}

impl<S: RecognitionService> ClassificationClient<S> {
    pub fn with_service(service: S, retry: RetryPolicy) -> Self {
        Self { service, retry }
    }

    pub fn service(&self) -> &S {
        &self.service
    }
}

#[async_trait]
impl<S: RecognitionService> Classifier for ClassificationClient<S> {
    #[tracing::instrument(skip(self))]
    async fn classify(&self, image_url: &str) -> Classification {
        if image_url.is_empty() {
            tracing::warn!("Empty image reference, nothing to classify");
            return Classification::InvalidInput;
        }

        let service = &self.service;
        let outcome = self
            .retry
            .run(move |attempt| {
                tracing::trace!(attempt, "Posting model outputs request");
                service.post_model_outputs(image_url)
            })
            .await;

        match outcome {
            Ok(concepts) => {
                tracing::debug!(concepts = concepts.len(), "Classification succeeded");
                Classification::Concepts(concepts)
            }
            Err(failure) => {
                counter!("classification_failures_total").increment(1);
                tracing::error!(
                    url = %image_url,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Error processing image"
                );
                if failure.error.is_throttled() {
                    Classification::RateLimited {
                        attempts: failure.attempts,
                    }
                } else {
                    Classification::RemoteError(failure.error.to_string())
                }
            }
        }
    }
}
