//! Embedding model boundary
//!
//! The model itself is a black box: a batch of inputs goes in, one outcome per
//! input comes back. A failed item only affects that item. A [`BackendError`]
//! means the whole batch is unusable.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::EmbeddingSettings;
use crate::error::PipelineError;
use crate::models::{EmbeddingInput, EmbeddingType};

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Embedded(Vec<f32>),
    Failed(String),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl From<BackendError> for PipelineError {
    fn from(err: BackendError) -> Self {
        PipelineError::BackendUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Compute one outcome per input, in input order
    async fn compute(
        &self,
        embedding_type: &EmbeddingType,
        inputs: &[EmbeddingInput],
    ) -> Result<Vec<ItemOutcome>, BackendError>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    embedding_type: &'a str,
    model_name: &'a str,
    inputs: &'a [EmbeddingInput],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    results: Vec<EmbedResult>,
}

#[derive(Debug, Deserialize)]
struct EmbedResult {
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

/// Model server speaking `POST {url}/embed`
///
/// Request: `{"embedding_type", "model_name", "inputs": [...]}`.
/// Response: `{"results": [{"vector": [..]} | {"error": ".."}]}`, one
/// result per input. A length mismatch or vectors of differing dimension
/// reject the whole batch.
pub struct HttpEmbeddingBackend {
    client: Client,
    endpoint: String,
}

impl HttpEmbeddingBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(crate::sources::http::USER_AGENT)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build backend client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embed", base_url.trim_end_matches('/')),
        })
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, PipelineError> {
        let url = settings.backend_url.as_deref().ok_or_else(|| {
            PipelineError::Config("embedding.backend_url must be set to compute embeddings".to_string())
        })?;
        Self::new(url, Duration::from_secs(settings.backend_timeout_secs))
    }
}

/// Check a backend response against the batch it answers
fn validate_results(
    results: Vec<EmbedResult>,
    expected: usize,
) -> Result<Vec<ItemOutcome>, BackendError> {
    if results.len() != expected {
        return Err(BackendError::InvalidResponse(format!(
            "expected {} results, got {}",
            expected,
            results.len()
        )));
    }

    let mut dimension: Option<usize> = None;
    let mut outcomes = Vec::with_capacity(results.len());
    for (idx, result) in results.into_iter().enumerate() {
        match (result.vector, result.error) {
            (Some(vector), None) => {
                if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
                    outcomes.push(ItemOutcome::Failed(format!(
                        "item {}: empty or non-finite vector",
                        idx
                    )));
                    continue;
                }
                match dimension {
                    Some(d) if d != vector.len() => {
                        return Err(BackendError::InvalidResponse(format!(
                            "item {} has dimension {}, expected {}",
                            idx,
                            vector.len(),
                            d
                        )));
                    }
                    _ => dimension = Some(vector.len()),
                }
                outcomes.push(ItemOutcome::Embedded(vector));
            }
            (_, Some(error)) => outcomes.push(ItemOutcome::Failed(error)),
            (None, None) => outcomes.push(ItemOutcome::Failed(format!(
                "item {}: neither vector nor error",
                idx
            ))),
        }
    }
    Ok(outcomes)
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn compute(
        &self,
        embedding_type: &EmbeddingType,
        inputs: &[EmbeddingInput],
    ) -> Result<Vec<ItemOutcome>, BackendError> {
        let request = EmbedRequest {
            embedding_type: &embedding_type.name,
            model_name: &embedding_type.model_name,
            inputs,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Unreachable(format!(
                "{} answered HTTP {}",
                self.endpoint,
                status.as_u16()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        debug!(
            embedding_type = %embedding_type.name,
            inputs = inputs.len(),
            "Backend batch computed"
        );

        validate_results(body.results, inputs.len())
    }
}
