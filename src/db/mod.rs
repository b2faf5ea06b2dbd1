pub mod bigquery;
pub mod db_pool;
pub mod duckdb_store;

use crate::config::DatabaseConfig;
use crate::schema::SchemaSource;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

/// One result row, columns in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug)]
pub enum DbError {
    ConnectionError(String),
    QueryError(String),
    ConfigError(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::ConnectionError(msg) => write!(f, "Database connection error: {}", msg),
            DbError::QueryError(msg) => write!(f, "Query error: {}", msg),
            DbError::ConfigError(msg) => write!(f, "Database configuration error: {}", msg),
        }
    }
}

impl Error for DbError {}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub bytes_scanned: Option<u64>,
    pub estimated_cost_usd: Option<f64>,
}

/// Dry-run estimate of what a statement would scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostEstimate {
    pub bytes_scanned: Option<u64>,
    pub estimated_cost_usd: Option<f64>,
}

impl CostEstimate {
    pub fn from_bytes(bytes: u64, cost_per_tb_usd: f64) -> Self {
        Self {
            bytes_scanned: Some(bytes),
            estimated_cost_usd: Some(bytes as f64 / 1024f64.powi(4) * cost_per_tb_usd),
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn run(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryResult, DbError>;
    async fn estimate_cost(&self, sql: &str) -> Result<CostEstimate, DbError>;
}

static LIMIT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());

/// Appends `LIMIT n` unless the statement already carries a LIMIT.
pub fn apply_row_limit(sql: &str, row_limit: Option<usize>) -> String {
    let Some(limit) = row_limit else {
        return sql.to_string();
    };
    if LIMIT_CLAUSE.is_match(sql) {
        warn!("Query already contains LIMIT clause, not adding LIMIT {}", limit);
        return sql.to_string();
    }
    info!("Added LIMIT {} to query", limit);
    format!("{} LIMIT {};", sql.trim_end().trim_end_matches(';').trim_end(), limit)
}

/// The configured store, seen both as an executor and as a schema source.
pub struct AnalyticsStore {
    pub executor: Arc<dyn QueryExecutor>,
    pub schema_source: Arc<dyn SchemaSource>,
}

impl AnalyticsStore {
    pub fn new(config: &DatabaseConfig) -> Result<Self, DbError> {
        match config.backend.as_str() {
            "bigquery" => {
                let client = Arc::new(bigquery::BigQueryClient::new(config)?);
                Ok(Self {
                    executor: client.clone(),
                    schema_source: client,
                })
            }
            "duckdb" => {
                let store = Arc::new(duckdb_store::DuckDbStore::new(config)?);
                Ok(Self {
                    executor: store.clone(),
                    schema_source: store,
                })
            }
            other => Err(DbError::ConfigError(format!(
                "Unsupported database backend: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_appended_once() {
        assert_eq!(
            apply_row_limit("SELECT id FROM patient;", Some(50)),
            "SELECT id FROM patient LIMIT 50;"
        );
        assert_eq!(
            apply_row_limit("SELECT id FROM patient LIMIT 10;", Some(50)),
            "SELECT id FROM patient LIMIT 10;"
        );
        assert_eq!(
            apply_row_limit("SELECT id FROM patient;", None),
            "SELECT id FROM patient;"
        );
    }

    #[test]
    fn cost_estimate_scales_per_terabyte() {
        let estimate = CostEstimate::from_bytes(1024u64.pow(4), 5.0);
        assert_eq!(estimate.bytes_scanned, Some(1024u64.pow(4)));
        assert_eq!(estimate.estimated_cost_usd, Some(5.0));
    }
}
