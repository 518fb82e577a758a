use crate::config::{API_TOKEN_ENV, LlmConfig};
use crate::llm::{LlmError, TextGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const DEFAULT_API_BASE: &str = "https://api-inference.huggingface.co/models";

/// Hosted inference API: `{"inputs": ..}` in, `[{"generated_text": ..}]` out.
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

#[derive(Deserialize)]
struct Candidate {
    generated_text: String,
}

impl HuggingFaceProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::ConfigError(format!(
                "API token is required for the huggingface backend (set llm.api_key or {})",
                API_TOKEN_ENV
            ))
        })?;

        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", DEFAULT_API_BASE, config.model));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }
}

/// Takes the first candidate's text; any other payload shape is a format error.
fn parse_completion(body: &str) -> Result<String, LlmError> {
    match serde_json::from_str::<Vec<Candidate>>(body) {
        Ok(candidates) => candidates
            .into_iter()
            .next()
            .map(|c| c.generated_text)
            .ok_or_else(|| LlmError::FormatError("empty candidate list".to_string())),
        Err(e) => Err(LlmError::FormatError(format!("{} - Response was: {}", e, body))),
    }
}

#[async_trait]
impl TextGenerator for HuggingFaceProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        debug!("Sending prompt to {}", self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&InferenceRequest { inputs: prompt })
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::ConnectionError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            error!("Inference API responded with status code: {} - {}", status, body);
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}",
                status
            )));
        }

        debug!("Raw response from inference API: {}", body);
        parse_completion(&body)
    }
}
