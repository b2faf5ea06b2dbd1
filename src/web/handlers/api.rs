use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::db::Row;
use crate::visualization::VisualizationSpec;
use crate::web::state::AppState;

fn default_include_visualization() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_include_visualization")]
    pub include_visualization: bool,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub sql_query: String,
    pub data: Vec<Row>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization_config: Option<VisualizationSpec>,
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_scanned: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
    pub row_count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub message: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub database_connected: bool,
    pub llm_backend: String,
    pub database_backend: String,
    pub version: String,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct DatasetList {
    pub dataset: Option<String>,
    pub datasets: Vec<String>,
}

pub async fn root() -> Json<StatusMessage> {
    Json(StatusMessage {
        message: "Healthcare Analytics AI Backend".to_string(),
        status: "healthy".to_string(),
    })
}

pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    state.executor.run("SELECT 1 AS ok", None).await.map_err(|e| {
        error!("Health check failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Service unhealthy: {}", e),
        )
    })?;

    let uptime = chrono::Utc::now().signed_duration_since(state.startup_time);
    Ok(Json(HealthStatus {
        status: "healthy".to_string(),
        database_connected: true,
        llm_backend: state.config.llm.backend.clone(),
        database_backend: state.config.database.backend.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds(),
    }))
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, String)> {
    if payload.query.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query must not be empty".to_string()));
    }

    let limit = payload.limit.unwrap_or(state.config.query.default_limit);
    info!("Processing query: {}", payload.query);

    let answer = state
        .processor
        .answer_question(&payload.query, Some(limit), payload.include_visualization)
        .await
        .map_err(|e| {
            error!("Query processing failed: {}", e);
            error!("Query that failed: {}", payload.query);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Query processing failed: {}", e),
            )
        })?;

    Ok(Json(QueryResponse {
        sql_query: answer.sql_query,
        data: answer.rows,
        summary: answer.summary,
        visualization_config: answer.visualization,
        execution_time: answer.execution_time_secs,
        bytes_scanned: answer.bytes_scanned,
        estimated_cost_usd: answer.estimated_cost_usd,
        row_count: answer.row_count,
    }))
}

pub async fn list_datasets(State(state): State<Arc<AppState>>) -> Json<DatasetList> {
    Json(DatasetList {
        dataset: state.catalog.dataset().map(str::to_string),
        datasets: state.catalog.table_names(),
    })
}
