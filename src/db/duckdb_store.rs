use crate::config::DatabaseConfig;
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::{apply_row_limit, CostEstimate, DbError, QueryExecutor, QueryResult, Row};
use crate::schema::{Field, FieldMode, FieldType, SchemaError, SchemaSource, TableSchema};
use async_trait::async_trait;
use duckdb::types::{TimeUnit, Value as DuckValue};
use r2d2::Pool;
use serde_json::Value;
use tracing::{debug, info};

/// Local DuckDB file standing in for the warehouse.
pub struct DuckDbStore {
    pool: Pool<DuckDBConnectionManager>,
    schema: String,
}

impl DuckDbStore {
    pub fn new(config: &DatabaseConfig) -> Result<Self, DbError> {
        info!(
            "Initializing DuckDB connection pool at {}",
            config.connection_string
        );
        let manager = DuckDBConnectionManager::new(config.connection_string.clone());
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1) as u32)
            .build(manager)
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;

        Ok(Self {
            pool,
            schema: config.dataset.clone(),
        })
    }

    async fn with_connection<T, F>(&self, task: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&duckdb::Connection) -> Result<T, DbError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| DbError::ConnectionError(e.to_string()))?;
            task(&conn)
        })
        .await
        .map_err(|e| DbError::ConnectionError(format!("Database task execution failed: {}", e)))?
    }
}

fn query_rows(conn: &duckdb::Connection, sql: &str) -> Result<Vec<Row>, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let value: DuckValue = row.get(i)?;
            record.insert(name.clone(), to_json(value));
        }
        records.push(record);
    }
    Ok(records)
}

fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(v) => Value::from(v),
        DuckValue::SmallInt(v) => Value::from(v),
        DuckValue::Int(v) => Value::from(v),
        DuckValue::BigInt(v) => Value::from(v),
        DuckValue::UTinyInt(v) => Value::from(v),
        DuckValue::USmallInt(v) => Value::from(v),
        DuckValue::UInt(v) => Value::from(v),
        DuckValue::UBigInt(v) => Value::from(v),
        DuckValue::HugeInt(v) => i64::try_from(v)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(v.to_string())),
        DuckValue::Float(v) => Value::from(v as f64),
        DuckValue::Double(v) => Value::from(v),
        DuckValue::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(d.to_string())),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Date32(days) => chrono::DateTime::from_timestamp(i64::from(days) * 86_400, 0)
            .map(|dt| Value::String(dt.date_naive().to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Timestamp(unit, v) => {
            let micros = match unit {
                TimeUnit::Second => v.saturating_mul(1_000_000),
                TimeUnit::Millisecond => v.saturating_mul(1_000),
                TimeUnit::Microsecond => v,
                TimeUnit::Nanosecond => v / 1_000,
            };
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|dt| Value::String(dt.naive_utc().to_string()))
                .unwrap_or(Value::Null)
        }
        DuckValue::List(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

#[async_trait]
impl QueryExecutor for DuckDbStore {
    async fn run(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryResult, DbError> {
        // DuckDB reads `dataset.table` without BigQuery's backtick quoting.
        let sql = apply_row_limit(&sql.replace('`', ""), row_limit);
        info!("Executing DuckDB query:\n{}", sql);

        let rows = self
            .with_connection(move |conn| {
                query_rows(conn, &sql).map_err(|e| DbError::QueryError(e.to_string()))
            })
            .await?;

        info!("Query returned {} rows", rows.len());
        Ok(QueryResult {
            rows,
            bytes_scanned: None,
            estimated_cost_usd: None,
        })
    }

    async fn estimate_cost(&self, _sql: &str) -> Result<CostEstimate, DbError> {
        debug!("DuckDB has no dry-run mode, skipping cost estimate");
        Ok(CostEstimate::default())
    }
}

#[async_trait]
impl SchemaSource for DuckDbStore {
    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let schema = self.schema.clone();
        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT table_name FROM information_schema.tables \
                     WHERE table_schema = ? ORDER BY table_name",
                )
                .map_err(|e| DbError::QueryError(e.to_string()))?;
            let tables: Vec<String> = stmt
                .query_map([&schema], |row| row.get::<_, String>(0))
                .map_err(|e| DbError::QueryError(e.to_string()))?
                .filter_map(Result::ok)
                .collect();
            Ok(tables)
        })
        .await
        .map_err(|e| SchemaError::Source(e.to_string()))
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema, SchemaError> {
        let schema = self.schema.clone();
        let table_name = table.to_string();
        let columns = self
            .with_connection(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT column_name, data_type, is_nullable \
                         FROM information_schema.columns \
                         WHERE table_schema = ? AND table_name = ? \
                         ORDER BY ordinal_position",
                    )
                    .map_err(|e| DbError::QueryError(e.to_string()))?;
                let columns: Vec<(String, String, bool)> = stmt
                    .query_map([&schema, &table_name], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)? == "YES",
                        ))
                    })
                    .map_err(|e| DbError::QueryError(e.to_string()))?
                    .filter_map(Result::ok)
                    .collect();
                Ok(columns)
            })
            .await
            .map_err(|e| SchemaError::Source(e.to_string()))?;

        if columns.is_empty() {
            return Err(SchemaError::NotFound(table.to_string()));
        }

        let fields = columns
            .iter()
            .map(|(name, data_type, nullable)| field_from_duckdb(name, data_type, *nullable))
            .collect();
        Ok(TableSchema::new(table, fields))
    }
}

/// Converts a DuckDB type string such as `STRUCT("text" VARCHAR, tags VARCHAR[])[]`
/// into a field.
fn field_from_duckdb(name: &str, data_type: &str, nullable: bool) -> Field {
    let data_type = data_type.trim();
    if let Some(element) = data_type.strip_suffix("[]") {
        let mut field = field_from_duckdb(name, element, nullable);
        field.mode = FieldMode::Repeated;
        return field;
    }

    let mode = if nullable {
        FieldMode::Nullable
    } else {
        FieldMode::Required
    };

    let upper = data_type.to_uppercase();
    if upper.starts_with("STRUCT(") && data_type.ends_with(')') {
        let members = &data_type["STRUCT(".len()..data_type.len() - 1];
        let nested = split_members(members)
            .into_iter()
            .filter_map(|member| {
                let (member_name, member_type) = split_member(member)?;
                Some(field_from_duckdb(&member_name, member_type, true))
            })
            .collect();
        return Field::record(name, mode, nested);
    }

    Field::scalar(name, duckdb_field_type(data_type), mode)
}

fn duckdb_field_type(data_type: &str) -> FieldType {
    let upper = data_type.to_uppercase();
    let base = upper.split('(').next().unwrap_or_default().trim();
    match base {
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "BPCHAR" | "UUID" => FieldType::String,
        "BLOB" | "BYTEA" => FieldType::Bytes,
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "HUGEINT" | "UTINYINT"
        | "USMALLINT" | "UINTEGER" | "UBIGINT" => FieldType::Integer,
        "FLOAT" | "REAL" | "DOUBLE" => FieldType::Float,
        "DECIMAL" | "NUMERIC" => FieldType::Numeric,
        "BOOLEAN" | "BOOL" => FieldType::Boolean,
        "DATE" => FieldType::Date,
        "TIME" => FieldType::Time,
        "TIMESTAMP" => FieldType::DateTime,
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => FieldType::Timestamp,
        "JSON" => FieldType::Json,
        _ => FieldType::Other(data_type.to_string()),
    }
}

fn split_members(members: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in members.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                parts.push(&members[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&members[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn split_member(member: &str) -> Option<(String, &str)> {
    let member = member.trim();
    if let Some(rest) = member.strip_prefix('"') {
        let close = rest.find('"')?;
        return Some((rest[..close].to_string(), rest[close + 1..].trim()));
    }
    let (name, data_type) = member.split_once(char::is_whitespace)?;
    Some((name.to_string(), data_type.trim()))
}
