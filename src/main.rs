use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

mod config;
mod db;
mod llm;
mod processor;
mod schema;
mod sql;
mod util;
mod visualization;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::AnalyticsStore;
use crate::llm::LlmManager;
use crate::processor::QueryProcessor;
use crate::schema::SchemaCatalog;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let args = CliArgs::parse();

    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("Connecting to {} warehouse", config.database.backend);
    let store = AnalyticsStore::new(&config.database)?;

    let catalog = match &config.schema.catalog_path {
        Some(path) => SchemaCatalog::from_json_file(path)?,
        None => {
            info!("Reading table schemas from the warehouse");
            SchemaCatalog::from_source(store.schema_source.as_ref()).await?
        }
    };
    if catalog.is_empty() {
        warn!("Schema catalog is empty; prompts will carry no field listings");
    } else {
        info!("Schema catalog holds {} tables", catalog.len());
    }
    let catalog = Arc::new(catalog);

    let dataset = if config.database.dataset.is_empty() {
        catalog.dataset().unwrap_or_default().to_string()
    } else {
        config.database.dataset.clone()
    };

    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    let processor = QueryProcessor::new(
        catalog.clone(),
        llm_manager,
        store.executor.clone(),
        dataset,
    );

    let app_state = Arc::new(AppState::new(
        config.clone(),
        catalog,
        processor,
        store.executor,
    ));

    info!("Starting health-nlq server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
