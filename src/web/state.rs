use crate::config::AppConfig;
use crate::db::db_pool::DuckDbPool;
use crate::db::history::HistoryStore;
use crate::query::QueryService;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    /// Pool for the database questions are answered against.
    pub db_pool: DuckDbPool,
    pub query_service: QueryService,
    pub history: HistoryStore,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db_pool: DuckDbPool,
        query_service: QueryService,
        history: HistoryStore,
    ) -> Self {
        Self {
            config,
            db_pool,
            query_service,
            history,
            startup_time: chrono::Utc::now(),
        }
    }
}
