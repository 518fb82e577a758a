use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest(
            "/api",
            Router::new()
                // Natural-language query
                .route("/query", post(handlers::api::nl_query))

                // Audit trail
                .route("/history", get(handlers::api::list_history))

                // Schema snapshot
                .route("/schema", get(handlers::api::get_schema))

                // System status
                .route("/status", get(handlers::api::system_status))
        )
}

// Admin Routes - database connection management
pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new().route("/connect-database", post(handlers::api::connect_database))
}

pub fn app(state: Arc<AppState>) -> Router {
    api_routes().merge(admin_routes()).with_state(state)
}
