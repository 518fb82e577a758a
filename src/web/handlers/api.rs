use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::executor::ExecutionResult;
use crate::db::history::AuditRecord;
use crate::db::schema_store::Schema;
use crate::web::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;

// Error payload

/// Every failure leaves the API as `{ "error": "<reason>" }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// Query types

#[derive(Debug, Deserialize)]
pub struct NlQueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct NlQueryResponse {
    pub id: Option<i64>,
    pub query: String,
    pub generated_query: String,
    pub results: ExecutionResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub table_count: usize,
    pub history_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub message: String,
    pub schema: Schema,
}

// API Implementations

// Natural language query
pub async fn nl_query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NlQueryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<NlQueryResponse>), ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;

    let question = payload.query.trim();
    if question.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "query must not be empty"));
    }

    match state.query_service.answer(question).await {
        Ok(outcome) => {
            let summary = format!("Processed query: {} ({} rows)", outcome.generated_query, outcome.results.row_count());
            let record = record_history(&state, question, Some(&outcome.generated_query), &summary).await;

            Ok((
                StatusCode::CREATED,
                Json(NlQueryResponse {
                    id: record.as_ref().map(|r| r.id),
                    query: outcome.question,
                    generated_query: outcome.generated_query,
                    results: outcome.results,
                    timestamp: record.map(|r| r.timestamp).unwrap_or_else(Utc::now),
                }),
            ))
        }
        Err(failure) => {
            let message = failure.error.to_string();
            record_history(&state, question, failure.generated_query.as_deref(), &message).await;
            Err(ApiError::new(failure.error.status_code(), message))
        }
    }
}

// Audit rows are best effort: a failed write is logged, never surfaced
async fn record_history(
    state: &AppState,
    question: &str,
    generated_query: Option<&str>,
    response: &str,
) -> Option<AuditRecord> {
    match state.history.record(question, generated_query, response).await {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Failed to record query history: {}", e);
            None
        }
    }
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = state.history.recent(limit).await.map_err(|e| {
        error!("Failed to read query history: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read query history")
    })?;
    Ok(Json(records))
}

// Schema
pub async fn get_schema(State(state): State<Arc<AppState>>) -> Result<Json<Schema>, ApiError> {
    let store = state.query_service.schema_store();
    match store.load_optional().await {
        Ok(Some(schema)) => Ok(Json(schema.as_ref().clone())),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "No schema snapshot; POST /connect-database first",
        )),
        Err(e) => {
            error!("Failed to load schema snapshot: {}", e);
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

pub async fn connect_database(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let store = state.query_service.schema_store();
    let schema = store.extract(&state.db_pool).await.map_err(|e| {
        error!("Schema extraction failed: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    info!("Connected to {} and saved schema", state.config.database.connection_string);
    Ok(Json(ConnectResponse {
        message: format!(
            "Connected to the database successfully! Schema saved to {}",
            store.snapshot_path().display()
        ),
        schema: schema.as_ref().clone(),
    }))
}

// System status
pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, ApiError> {
    let now = Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    let table_count = match state.query_service.schema_store().load_optional().await {
        Ok(schema) => schema.map(|s| s.len()).unwrap_or(0),
        Err(e) => {
            warn!("Schema snapshot unavailable for status: {}", e);
            0
        }
    };

    let history_count = state.history.count().await.map_err(|e| {
        error!("Failed to count query history: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        table_count,
        history_count,
    }))
}
