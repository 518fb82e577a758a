use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

mod config;
mod db;
mod llm;
mod query;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::db_pool::{build_pool, DuckDBConnectionManager};
use crate::db::executor::QueryExecutor;
use crate::db::history::HistoryStore;
use crate::db::schema_store::SchemaStore;
use crate::llm::LlmManager;
use crate::query::QueryService;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Initialize logging
    init_tracing(&config.logging);

    // Ensure data directory exists
    let data_dir = PathBuf::from(&config.data_dir);
    if !data_dir.exists() {
        info!("Creating data directory: {}", config.data_dir);
        std::fs::create_dir_all(&data_dir)?;
    }

    info!("Initializing DuckDB connection pool for {}", config.database.connection_string);
    let db_manager = DuckDBConnectionManager::file(&config.database.connection_string)?;
    let pool = build_pool(db_manager, config.database.pool_size)?;

    let history_path = config.history_path();
    let history_manager = DuckDBConnectionManager::file(&history_path.to_string_lossy())?;
    let history = HistoryStore::open(build_pool(history_manager, 1)?).await?;

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = match LlmManager::new(&config.llm) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to initialize LLM backend: {}", e);
            return Err(e.into());
        }
    };

    // Warm the schema cache; a missing snapshot is fine until /connect-database runs
    let schema_store = Arc::new(SchemaStore::new(&config.schema.snapshot_path));
    match schema_store.load().await {
        Ok(schema) => info!("Schema snapshot has {} tables", schema.len()),
        Err(e) => warn!("{}", e),
    }

    let query_service = QueryService::new(
        schema_store,
        Arc::new(llm_manager),
        QueryExecutor::new(pool.clone()),
        config.schema.require_snapshot,
    );

    let app_state = Arc::new(AppState::new(config.clone(), pool, query_service, history));

    // Start the web server
    info!("Starting chatdb server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
