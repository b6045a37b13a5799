use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};

use crate::config::{ClientConfig, ModelSpec};
use crate::engine::{RecognitionService, RemoteError};
use crate::types::{Concept, PostModelOutputsRequest, PostModelOutputsResponse};

pub const STATUS_SUCCESS: u32 = 10000;
/// Clarifai's "request throttled" status.
pub const STATUS_THROTTLED: u32 = 11005;

/// Clarifai v2 REST client for a single model version.
#[derive(Clone)]
pub struct ClarifaiService {
    client: Client,
    endpoint: String,
    authorization: String,
    model: ModelSpec,
}

impl ClarifaiService {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let endpoint = format!(
            "{}/v2/models/{}/versions/{}/outputs",
            config.api_base, config.model.model_id, config.model.version_id
        );

        Ok(Self {
            client,
            endpoint,
            authorization: format!("Key {}", config.api_key),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    fn decode(http_status: StatusCode, body: &str) -> Result<Vec<Concept>, RemoteError> {
        let response: PostModelOutputsResponse = match serde_json::from_str(body) {
            Ok(response) => response,
            Err(e) => {
                return Err(match http_status {
                    StatusCode::SERVICE_UNAVAILABLE => {
                        RemoteError::Throttled(format!("HTTP {http_status}"))
                    }
                    status if !status.is_success() => RemoteError::Status {
                        code: u32::from(status.as_u16()),
                        description: status
                            .canonical_reason()
                            .unwrap_or("unknown")
                            .to_string(),
                    },
                    _ => RemoteError::Decode(e.to_string()),
                });
            }
        };

        match response.status.code {
            STATUS_SUCCESS => response
                .outputs
                .into_iter()
                .next()
                .map(|output| output.data.concepts.into_iter().map(Concept::from).collect())
                .ok_or_else(|| RemoteError::Decode("response has no outputs".to_string())),
            STATUS_THROTTLED => Err(RemoteError::Throttled(response.status.description)),
            code => Err(RemoteError::Status {
                code,
                description: response.status.description,
            }),
        }
    }
}

#[async_trait]
impl RecognitionService for ClarifaiService {
    #[tracing::instrument(skip(self), fields(model = %self.model.model_id))]
    async fn post_model_outputs(&self, image_url: &str) -> Result<Vec<Concept>, RemoteError> {
        let request = PostModelOutputsRequest::for_image_url(image_url);

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, &self.authorization)
            .json(&request)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let http_status = response.status();
        if http_status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::Throttled(format!("HTTP {http_status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        tracing::trace!(status = %http_status, body_len = body.len(), "Received model outputs");
        Self::decode(http_status, &body)
    }
}
