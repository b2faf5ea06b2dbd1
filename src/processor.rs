use crate::db::{DbError, QueryExecutor, Row};
use crate::llm::{GenerationOptions, LlmError, LlmManager};
use crate::schema::{SchemaError, SchemaSource, TableSchema};
use crate::sql::{build_sql_prompt, build_summary_prompt, extract_and_repair_sql};
use crate::visualization::{classify, VisualizationSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const SUMMARY_FALLBACK: &str = "Unable to generate summary at this time.";

#[derive(Debug)]
pub enum ProcessError {
    Schema(SchemaError),
    Generation(LlmError),
    Execution(DbError),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Schema(e) => write!(f, "{}", e),
            ProcessError::Generation(e) => write!(f, "{}", e),
            ProcessError::Execution(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ProcessError {}

impl From<SchemaError> for ProcessError {
    fn from(e: SchemaError) -> Self {
        ProcessError::Schema(e)
    }
}

impl From<LlmError> for ProcessError {
    fn from(e: LlmError) -> Self {
        ProcessError::Generation(e)
    }
}

impl From<DbError> for ProcessError {
    fn from(e: DbError) -> Self {
        ProcessError::Execution(e)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub sql_query: String,
    pub rows: Vec<Row>,
    pub summary: String,
    pub visualization: Option<VisualizationSpec>,
    pub execution_time_secs: f64,
    pub bytes_scanned: Option<u64>,
    pub estimated_cost_usd: Option<f64>,
    pub row_count: usize,
}

/// Runs one question end to end: schema, prompt, model, repair, execution,
/// chart and summary, strictly in that order.
pub struct QueryProcessor {
    schema_source: Arc<dyn SchemaSource>,
    llm: Arc<LlmManager>,
    executor: Arc<dyn QueryExecutor>,
    dataset: String,
}

impl QueryProcessor {
    pub fn new(
        schema_source: Arc<dyn SchemaSource>,
        llm: Arc<LlmManager>,
        executor: Arc<dyn QueryExecutor>,
        dataset: String,
    ) -> Self {
        Self {
            schema_source,
            llm,
            executor,
            dataset,
        }
    }

    pub async fn answer_question(
        &self,
        question: &str,
        row_limit: Option<usize>,
        want_visualization: bool,
    ) -> Result<QueryAnswer, ProcessError> {
        let started = Instant::now();
        info!("Processing question: {}", question);

        let schemas = self.collect_schemas().await?;
        let sql = self.generate_sql(question, &schemas).await?;

        match self.executor.estimate_cost(&sql).await {
            Ok(estimate) => info!(
                "Estimated scan: {:?} bytes, ${:?}",
                estimate.bytes_scanned, estimate.estimated_cost_usd
            ),
            Err(e) => warn!("Cost estimation failed: {}", e),
        }

        let result = self.executor.run(&sql, row_limit).await.map_err(|e| {
            error!("Query execution failed: {}", e);
            e
        })?;
        info!("Query returned {} rows", result.rows.len());

        let visualization = if want_visualization && !result.rows.is_empty() {
            classify(&result.rows)
        } else {
            None
        };

        let summary = self.summarize(question, &result.rows, &sql).await;

        Ok(QueryAnswer {
            row_count: result.rows.len(),
            sql_query: sql,
            rows: result.rows,
            summary,
            visualization,
            execution_time_secs: started.elapsed().as_secs_f64(),
            bytes_scanned: result.bytes_scanned,
            estimated_cost_usd: result.estimated_cost_usd,
        })
    }

    async fn collect_schemas(&self) -> Result<BTreeMap<String, TableSchema>, ProcessError> {
        let tables = self.schema_source.list_tables().await?;
        let mut schemas = BTreeMap::new();
        for table in tables {
            match self.schema_source.get_schema(&table).await {
                Ok(schema) => {
                    schemas.insert(table, schema);
                }
                Err(e) => warn!("Could not get schema for {}: {}", table, e),
            }
        }
        Ok(schemas)
    }

    async fn generate_sql(
        &self,
        question: &str,
        schemas: &BTreeMap<String, TableSchema>,
    ) -> Result<String, ProcessError> {
        let prompt = build_sql_prompt(question, schemas, &self.dataset);
        let raw = self.llm.generate(&prompt, &GenerationOptions::sql()).await?;
        debug!("Raw model response: {}", raw);

        let sql = extract_and_repair_sql(&raw);
        info!("Generated SQL: {}", sql);
        Ok(sql)
    }

    async fn summarize(&self, question: &str, rows: &[Row], sql: &str) -> String {
        let prompt = build_summary_prompt(question, rows, sql);
        match self.llm.generate(&prompt, &GenerationOptions::summary()).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                error!("Summary generation failed: {}", e);
                SUMMARY_FALLBACK.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CostEstimate, QueryResult};
    use crate::llm::TextGenerator;
    use crate::schema::{Field, FieldMode, FieldType, SchemaCatalog};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers the SQL prompt with `sql_reply` and fails or echoes on summaries.
    struct ScriptedModel {
        sql_reply: String,
        summary_fails: bool,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedModel {
        async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if *options == GenerationOptions::sql() {
                return Ok(self.sql_reply.clone());
            }
            if self.summary_fails {
                Err(LlmError::ConnectionError("model unavailable".to_string()))
            } else {
                Ok("  Most patients are female.  ".to_string())
            }
        }
    }

    struct RecordingExecutor {
        rows: Vec<Row>,
        fail_with: Option<String>,
        seen: Arc<Mutex<Vec<(String, Option<usize>)>>>,
    }

    #[async_trait]
    impl QueryExecutor for RecordingExecutor {
        async fn run(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryResult, DbError> {
            self.seen.lock().unwrap().push((sql.to_string(), row_limit));
            if let Some(msg) = &self.fail_with {
                return Err(DbError::QueryError(msg.clone()));
            }
            Ok(QueryResult {
                rows: self.rows.clone(),
                bytes_scanned: Some(2048),
                estimated_cost_usd: Some(0.0),
            })
        }

        async fn estimate_cost(&self, _sql: &str) -> Result<CostEstimate, DbError> {
            Err(DbError::QueryError("dry run unsupported".to_string()))
        }
    }

    /// Lists a table whose schema cannot be fetched.
    struct PartialSource(SchemaCatalog);

    #[async_trait]
    impl SchemaSource for PartialSource {
        async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
            let mut tables = self.0.list_tables().await?;
            tables.push("encounter".to_string());
            Ok(tables)
        }

        async fn get_schema(&self, table: &str) -> Result<TableSchema, SchemaError> {
            self.0.get_schema(table).await
        }
    }

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![TableSchema::new(
            "patient",
            vec![
                Field::scalar("id", FieldType::String, FieldMode::Nullable),
                Field::scalar("gender", FieldType::String, FieldMode::Nullable),
            ],
        )])
    }

    fn gender_rows() -> Vec<Row> {
        json!([{"gender": "female", "n": 6}, {"gender": "male", "n": 4}])
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    struct Harness {
        processor: QueryProcessor,
        prompts: Arc<Mutex<Vec<String>>>,
        seen: Arc<Mutex<Vec<(String, Option<usize>)>>>,
    }

    fn harness(sql_reply: &str, summary_fails: bool, fail_with: Option<&str>) -> Harness {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let model = ScriptedModel {
            sql_reply: sql_reply.to_string(),
            summary_fails,
            prompts: prompts.clone(),
        };
        let executor = RecordingExecutor {
            rows: gender_rows(),
            fail_with: fail_with.map(str::to_string),
            seen: seen.clone(),
        };
        Harness {
            processor: QueryProcessor::new(
                Arc::new(PartialSource(catalog())),
                Arc::new(LlmManager::with_generator(Box::new(model))),
                Arc::new(executor),
                "bigquery-public-data.fhir_synthea".to_string(),
            ),
            prompts,
            seen,
        }
    }

    #[tokio::test]
    async fn answers_with_repaired_sql() {
        let h = harness(
            "```sql\nSELECT gender, COUNT(*) AS n FROM `bigquery-public-data.fhir_synthea.Patient` GROUP BY gender\n```",
            false,
            None,
        );
        let answer = h
            .processor
            .answer_question("How many patients by gender?", Some(1000), true)
            .await
            .unwrap();

        assert_eq!(
            answer.sql_query,
            "SELECT gender, COUNT(*) AS n FROM `bigquery-public-data.fhir_synthea.patient` GROUP BY gender;"
        );
        assert_eq!(answer.row_count, 2);
        assert_eq!(answer.summary, "Most patients are female.");
        assert_eq!(answer.visualization.as_ref().map(|v| v.kind()), Some("bar"));
        assert_eq!(answer.bytes_scanned, Some(2048));

        let seen = h.seen.lock().unwrap();
        assert_eq!(seen[0].0, answer.sql_query);
        assert_eq!(seen[0].1, Some(1000));

        let prompts = h.prompts.lock().unwrap();
        assert!(prompts[0].contains("patient:"));
        assert!(prompts[0].contains("Natural language question: How many patients by gender?"));
        assert!(prompts[1].contains("Number of results: 2"));
    }

    #[tokio::test]
    async fn summary_failure_uses_fallback() {
        let h = harness("SELECT gender FROM patient", true, None);
        let answer = h.processor.answer_question("genders", None, false).await.unwrap();
        assert_eq!(answer.summary, SUMMARY_FALLBACK);
        assert!(answer.visualization.is_none());
        assert_eq!(answer.rows.len(), 2);
    }

    #[tokio::test]
    async fn execution_diagnostic_is_preserved() {
        let h = harness(
            "SELECT code.id FROM condition",
            false,
            Some("Field name id does not exist in STRUCT<text STRING>"),
        );
        let err = h
            .processor
            .answer_question("conditions", Some(10), true)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Execution(_)));
        assert!(err.to_string().contains("Field name id does not exist in STRUCT<text STRING>"));
    }
}
