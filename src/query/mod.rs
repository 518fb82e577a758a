pub mod validator;

use crate::db::executor::{ExecutionError, ExecutionResult, QueryExecutor};
use crate::db::schema_store::{SchemaError, SchemaStore};
use crate::llm::{prompt, GenerationError, LlmManager};
use axum::http::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use validator::Rejection;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("schema unavailable: {0}")]
    SchemaUnavailable(#[from] SchemaError),
    #[error("{0}")]
    Generation(#[from] GenerationError),
    #[error("{0}")]
    Rejected(#[from] Rejection),
    #[error("{0}")]
    Execution(#[from] ExecutionError),
}

impl QueryError {
    /// Ungenerable or refused questions, and asking before any database is
    /// connected, are the caller's problem. An unreadable snapshot or a
    /// statement the database could not run is ours.
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::SchemaUnavailable(SchemaError::NotFound(_))
            | QueryError::Generation(_)
            | QueryError::Rejected(_) => StatusCode::BAD_REQUEST,
            QueryError::SchemaUnavailable(_) | QueryError::Execution(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// A question that made it through the whole pipeline.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub question: String,
    pub generated_query: String,
    pub results: ExecutionResult,
}

/// A failed run, with whatever SQL was produced before the failure.
#[derive(Debug)]
pub struct QueryFailure {
    pub generated_query: Option<String>,
    pub error: QueryError,
}

impl From<QueryError> for QueryFailure {
    fn from(error: QueryError) -> Self {
        Self {
            generated_query: None,
            error,
        }
    }
}

impl From<SchemaError> for QueryFailure {
    fn from(err: SchemaError) -> Self {
        QueryError::from(err).into()
    }
}

impl From<GenerationError> for QueryFailure {
    fn from(err: GenerationError) -> Self {
        QueryError::from(err).into()
    }
}

/// Question → prompt → generation → validation → execution.
pub struct QueryService {
    schema_store: Arc<SchemaStore>,
    llm: Arc<LlmManager>,
    executor: QueryExecutor,
    require_schema: bool,
}

impl QueryService {
    pub fn new(
        schema_store: Arc<SchemaStore>,
        llm: Arc<LlmManager>,
        executor: QueryExecutor,
        require_schema: bool,
    ) -> Self {
        Self {
            schema_store,
            llm,
            executor,
            require_schema,
        }
    }

    pub fn schema_store(&self) -> &Arc<SchemaStore> {
        &self.schema_store
    }

    #[cfg(test)]
    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub async fn answer(&self, question: &str) -> Result<QueryOutcome, QueryFailure> {
        debug!("NL-query: {}", question);

        let schema = if self.require_schema {
            Some(self.schema_store.load().await?)
        } else {
            self.schema_store.load_optional().await?
        };
        if schema.is_none() {
            info!("No schema snapshot; using schema-less prompt");
        }

        let prompt = prompt::build_prompt(question, schema.as_deref());
        debug!("Prepared LLM prompt: {}", prompt);

        let candidate = match self.llm.generate(&prompt).await {
            Ok(candidate) => candidate,
            Err(e) => {
                if let Some(detail) = e.detail() {
                    debug!("Generation detail: {}", detail);
                }
                return Err(e.into());
            }
        };

        let sql = match validator::validate(Some(candidate.as_str()), schema.as_deref()) {
            Ok(sql) => sql.to_string(),
            Err(rejection) => {
                warn!("Rejected generated SQL ({}): {}", rejection, candidate);
                return Err(QueryFailure {
                    generated_query: Some(candidate),
                    error: rejection.into(),
                });
            }
        };
        info!("Validated SQL: {}", sql);

        match self.executor.execute(&sql).await {
            Ok(results) => Ok(QueryOutcome {
                question: question.to_string(),
                generated_query: sql,
                results,
            }),
            Err(e) => Err(QueryFailure {
                generated_query: Some(sql),
                error: e.into(),
            }),
        }
    }
}
