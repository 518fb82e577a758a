pub mod extract;
pub mod prompt;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Failure of a single call to a text-generation backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("unexpected response format: {0}")]
    FormatError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Transport and HTTP status failures are worth another attempt; a
    /// payload we cannot read will not improve by asking again.
    fn is_retryable(&self) -> bool {
        matches!(self, LlmError::ConnectionError(_) | LlmError::ResponseError(_))
    }
}

/// Outcome of turning a prompt into candidate SQL, when no SQL came out.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("query generation failed after {attempts} attempt(s): {reason}")]
    Transport { attempts: u32, reason: String },
    #[error("unexpected response format")]
    Format(String),
    #[error("no SELECT or SHOW statement found in model output")]
    NoSqlExtracted { completion: String },
}

impl GenerationError {
    /// Backend payload or completion text behind the failure, when there is one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            GenerationError::Transport { .. } => None,
            GenerationError::Format(body) => Some(body),
            GenerationError::NoSqlExtracted { completion } => Some(completion),
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Sends the prompt once and returns the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

/// Query generation client: one backend plus the retry policy around it.
pub struct LlmManager {
    generator: Box<dyn TextGenerator>,
    retry: RetryPolicy,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let generator: Box<dyn TextGenerator> = match config.backend.as_str() {
            "huggingface" => Box::new(providers::huggingface::HuggingFaceProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self::with_generator(generator, RetryPolicy::from_config(config)))
    }

    pub fn with_generator(generator: Box<dyn TextGenerator>, retry: RetryPolicy) -> Self {
        Self { generator, retry }
    }

    /// Calls the backend under the retry policy and extracts candidate SQL.
    /// Every failure comes back as a `GenerationError`.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let completion = self.complete_with_retry(prompt).await?;
        debug!("Raw completion: {}", completion);

        match extract::extract_sql(&completion) {
            Some(sql) => {
                info!("Generated SQL: {}", sql);
                Ok(sql)
            }
            None => {
                warn!("No SQL statement in completion: {}", completion);
                Err(GenerationError::NoSqlExtracted { completion })
            }
        }
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String, GenerationError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.generator.complete(prompt).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Generation attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, max_attempts, e, self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(LlmError::FormatError(detail)) => {
                    error!("Unexpected response format: {}", detail);
                    return Err(GenerationError::Format(detail));
                }
                Err(e) => {
                    error!("Generation failed after {} attempt(s): {}", attempt, e);
                    return Err(GenerationError::Transport {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;

    fn refused() -> Result<String, LlmError> {
        Err(LlmError::ConnectionError("connection refused".to_string()))
    }

    #[tokio::test]
    async fn transport_failures_use_exactly_the_retry_budget() {
        let script = ScriptedGenerator::new(vec![refused(), refused(), refused(), Ok("SELECT 1".into())]);
        let manager = script.clone().into_manager();

        let err = manager.generate("prompt").await.unwrap_err();

        assert_eq!(script.calls(), 3);
        match err {
            GenerationError::Transport { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn recovers_when_a_later_attempt_succeeds() {
        let script = ScriptedGenerator::new(vec![
            Err(LlmError::ResponseError("503 Service Unavailable".into())),
            Ok("SQL: SELECT * FROM employees".into()),
        ]);
        let manager = script.clone().into_manager();

        let sql = manager.generate("prompt").await.unwrap();

        assert_eq!(sql, "SELECT * FROM employees");
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test]
    async fn format_errors_are_not_retried() {
        let script = ScriptedGenerator::new(vec![Err(LlmError::FormatError("{\"error\":\"x\"}".into()))]);
        let manager = script.clone().into_manager();

        let err = manager.generate("prompt").await.unwrap_err();

        assert!(matches!(err, GenerationError::Format(_)));
        assert_eq!(err.to_string(), "unexpected response format");
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn completion_without_sql_is_reported() {
        let manager = ScriptedGenerator::replying("Sorry, I cannot help with that.").into_manager();

        let err = manager.generate("prompt").await.unwrap_err();

        assert!(matches!(err, GenerationError::NoSqlExtracted { .. }));
        assert_eq!(err.detail(), Some("Sorry, I cannot help with that."));
    }

    #[tokio::test]
    async fn config_errors_are_not_retried() {
        let script = ScriptedGenerator::new(vec![Err(LlmError::ConfigError("no key".into()))]);
        let manager = script.clone().into_manager();

        let err = manager.generate("prompt").await.unwrap_err();

        assert!(matches!(err, GenerationError::Transport { attempts: 1, .. }));
        assert_eq!(script.calls(), 1);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = crate::config::AppConfig::default().llm;
        config.backend = "carrier-pigeon".to_string();

        assert!(matches!(LlmManager::new(&config), Err(LlmError::ConfigError(_))));
    }
}
