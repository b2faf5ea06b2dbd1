use crate::config::AppConfig;
use crate::db::QueryExecutor;
use crate::processor::QueryProcessor;
use crate::schema::SchemaCatalog;
use std::sync::Arc;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<SchemaCatalog>,
    pub processor: QueryProcessor,
    pub executor: Arc<dyn QueryExecutor>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        catalog: Arc<SchemaCatalog>,
        processor: QueryProcessor,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            config,
            catalog,
            processor,
            executor,
            startup_time: chrono::Utc::now(),
        }
    }
}
