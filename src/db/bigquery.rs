use crate::config::DatabaseConfig;
use crate::db::{apply_row_limit, CostEstimate, DbError, QueryExecutor, QueryResult, Row};
use crate::schema::{Field, FieldMode, FieldType, SchemaError, SchemaSource, TableSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const QUERY_TIMEOUT_MS: u32 = 30_000;
const MAX_RESULT_PAGES: usize = 50;

/// BigQuery over its REST API.
pub struct BigQueryClient {
    client: reqwest::Client,
    api_url: String,
    project_id: String,
    dataset_project: String,
    dataset_id: String,
    access_token: String,
    cost_per_tb_usd: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    dry_run: bool,
    timeout_ms: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    schema: Option<ResponseSchema>,
    #[serde(default)]
    rows: Vec<ResponseRow>,
    #[serde(default)]
    total_bytes_processed: Option<String>,
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Deserialize, Default)]
struct ResponseSchema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Deserialize)]
struct ResponseRow {
    f: Vec<Cell>,
}

#[derive(Deserialize)]
struct Cell {
    v: Value,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReference,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[derive(Deserialize)]
struct TableResource {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    schema: ResponseSchema,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl BigQueryClient {
    pub fn new(config: &DatabaseConfig) -> Result<Self, DbError> {
        let project_id = config.project_id.clone().ok_or_else(|| {
            DbError::ConfigError("project_id is required for the BigQuery backend".to_string())
        })?;
        let access_token = config.access_token.clone().ok_or_else(|| {
            DbError::ConfigError("access_token is required for the BigQuery backend".to_string())
        })?;

        // `project.dataset`, or a bare dataset billed to our own project.
        let (dataset_project, dataset_id) = match config.dataset.rsplit_once('.') {
            Some((project, dataset)) => (project.to_string(), dataset.to_string()),
            None => (project_id.clone(), config.dataset.clone()),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;

        info!(
            "BigQuery client initialized for project: {}, dataset: {}.{}",
            project_id, dataset_project, dataset_id
        );

        Ok(Self {
            client,
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            project_id,
            dataset_project,
            dataset_id,
            access_token,
            cost_per_tb_usd: config.cost_per_tb_usd,
        })
    }

    fn dataset_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}",
            self.api_url, self.dataset_project, self.dataset_id
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DbError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);
        error!("BigQuery responded with status code {}: {}", status, message);
        Err(DbError::QueryError(message))
    }

    async fn query(&self, sql: &str, dry_run: bool) -> Result<QueryResponse, DbError> {
        let url = format!("{}/projects/{}/queries", self.api_url, self.project_id);
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            dry_run,
            timeout_ms: QUERY_TIMEOUT_MS,
        };
        self.send(self.client.post(&url).json(&request))
            .await?
            .json()
            .await
            .map_err(|e| DbError::QueryError(format!("Failed to parse query response: {}", e)))
    }

    async fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, DbError> {
        let url = format!("{}/projects/{}/queries/{}", self.api_url, self.project_id, job.job_id);
        let mut params = vec![("timeoutMs", QUERY_TIMEOUT_MS.to_string())];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.send(self.client.get(&url).query(&params))
            .await?
            .json()
            .await
            .map_err(|e| DbError::QueryError(format!("Failed to parse query results: {}", e)))
    }
}

#[async_trait]
impl QueryExecutor for BigQueryClient {
    async fn run(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryResult, DbError> {
        let sql = apply_row_limit(sql, row_limit);
        info!("Executing BigQuery:\n{}", sql);

        let mut response = self.query(&sql, false).await?;
        let mut job: Option<JobReference> = None;
        // Jobs still running when `jobs.query` returns report their bytes later.
        let mut bytes_scanned = None;

        let mut fields = Vec::new();
        let mut rows = Vec::new();
        for _ in 0..MAX_RESULT_PAGES {
            if bytes_scanned.is_none() {
                bytes_scanned = response
                    .total_bytes_processed
                    .as_deref()
                    .and_then(|b| b.parse::<u64>().ok());
            }
            if let Some(reference) = response.job_reference.take() {
                job = Some(reference);
            }
            if let Some(schema) = response.schema.take() {
                fields = schema.fields;
            }
            rows.extend(response.rows.drain(..).map(|row| decode_row(&fields, row)));

            let complete = response.job_complete.unwrap_or(true);
            let next_page = response.page_token.take();
            if complete && next_page.is_none() {
                break;
            }
            let Some(current) = job.as_ref() else {
                break;
            };
            debug!("Fetching more results for job {}", current.job_id);
            response = self.query_results(current, next_page.as_deref()).await?;
        }

        info!(
            "Query returned {} rows, scanned {:?} bytes",
            rows.len(),
            bytes_scanned
        );
        Ok(QueryResult {
            rows,
            bytes_scanned,
            estimated_cost_usd: bytes_scanned
                .map(|b| CostEstimate::from_bytes(b, self.cost_per_tb_usd))
                .and_then(|e| e.estimated_cost_usd),
        })
    }

    async fn estimate_cost(&self, sql: &str) -> Result<CostEstimate, DbError> {
        let response = self.query(sql, true).await?;
        let bytes = response
            .total_bytes_processed
            .as_deref()
            .and_then(|b| b.parse::<u64>().ok())
            .unwrap_or(0);
        let estimate = CostEstimate::from_bytes(bytes, self.cost_per_tb_usd);
        debug!("Dry run estimate: {:?}", estimate);
        Ok(estimate)
    }
}

#[async_trait]
impl SchemaSource for BigQueryClient {
    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        info!(
            "Listing tables from project: {}, dataset: {}",
            self.dataset_project, self.dataset_id
        );
        let url = format!("{}/tables", self.dataset_url());
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: TableList = self
                .send(request)
                .await
                .map_err(|e| SchemaError::Source(e.to_string()))?
                .json()
                .await
                .map_err(|e| SchemaError::Source(e.to_string()))?;

            tables.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(tables)
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema, SchemaError> {
        let url = format!("{}/tables/{}", self.dataset_url(), table);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| SchemaError::Source(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SchemaError::NotFound(table.to_string()));
        }
        if !response.status().is_success() {
            return Err(SchemaError::Source(format!(
                "BigQuery responded with status code {} for table {}",
                response.status(),
                table
            )));
        }

        let resource: TableResource = response
            .json()
            .await
            .map_err(|e| SchemaError::Source(e.to_string()))?;
        Ok(TableSchema {
            table_name: table.to_string(),
            description: resource.description.filter(|d| !d.is_empty()),
            fields: resource.schema.fields,
        })
    }
}

fn decode_row(fields: &[Field], row: ResponseRow) -> Row {
    fields
        .iter()
        .zip(row.f)
        .map(|(field, cell)| (field.name.clone(), decode_value(field, cell.v)))
        .collect()
}

/// Converts a `f`/`v` encoded cell into plain JSON using the column's schema.
fn decode_value(field: &Field, value: Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    if field.mode == FieldMode::Repeated {
        let element = Field {
            mode: FieldMode::Nullable,
            ..field.clone()
        };
        return match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| decode_value(&element, unwrap_v(item)))
                    .collect(),
            ),
            other => other,
        };
    }

    match (&field.field_type, value) {
        (FieldType::Record, Value::Object(mut record)) => {
            let cells = match record.remove("f") {
                Some(Value::Array(cells)) => cells,
                _ => Vec::new(),
            };
            Value::Object(
                field
                    .nested_fields
                    .iter()
                    .zip(cells)
                    .map(|(nested, cell)| (nested.name.clone(), decode_value(nested, unwrap_v(cell))))
                    .collect(),
            )
        }
        (FieldType::Integer, Value::String(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(s)),
        (FieldType::Float | FieldType::Numeric, Value::String(s)) => s
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or(Value::String(s)),
        (FieldType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        (FieldType::Timestamp, Value::String(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(|secs| chrono::DateTime::from_timestamp_micros((secs * 1_000_000.0) as i64))
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::String(s)),
        (_, other) => other,
    }
}

fn unwrap_v(cell: Value) -> Value {
    match cell {
        Value::Object(mut map) if map.contains_key("v") => map.remove("v").unwrap_or(Value::Null),
        other => other,
    }
}
