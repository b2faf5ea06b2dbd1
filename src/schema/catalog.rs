use crate::schema::{Field, SchemaError, SchemaSource, TableSchema};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Read-only set of table schemas, loaded once at start-up.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    dataset: Option<String>,
    tables: BTreeMap<String, TableSchema>,
}

#[derive(Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    dataset_id: Option<String>,
    tables: BTreeMap<String, SnapshotTable>,
}

#[derive(Deserialize)]
struct SnapshotTable {
    #[serde(default)]
    description: Option<String>,
    #[serde(alias = "fields")]
    schema: Vec<Field>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            dataset: None,
            tables: tables
                .into_iter()
                .map(|t| (t.table_name.clone(), t))
                .collect(),
        }
    }

    /// Parses a schema snapshot as written by the schema dump tooling.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let snapshot: SnapshotFile =
            serde_json::from_str(json).map_err(|e| SchemaError::Invalid(e.to_string()))?;

        let mut tables = BTreeMap::new();
        for (name, table) in snapshot.tables {
            let schema = TableSchema {
                table_name: name.clone(),
                description: table.description.filter(|d| !d.trim().is_empty()),
                fields: table.schema,
            };
            schema.validate()?;
            tables.insert(name, schema);
        }

        Ok(Self {
            dataset: snapshot.dataset_id,
            tables,
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SchemaError> {
        info!("Loading schema catalog from {}", path.display());
        let json = std::fs::read_to_string(path).map_err(|e| {
            SchemaError::Source(format!("failed to read {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_json_str(&json)?;
        info!("Loaded {} table schemas from snapshot", catalog.tables.len());
        Ok(catalog)
    }

    /// Builds the catalog from a live source. Tables whose schema cannot be
    /// fetched are logged and left out.
    pub async fn from_source(source: &dyn SchemaSource) -> Result<Self, SchemaError> {
        let table_names = source.list_tables().await?;
        info!("Available tables: {:?}", table_names);

        let mut tables = BTreeMap::new();
        for name in table_names {
            match source.get_schema(&name).await {
                Ok(schema) => {
                    if let Err(e) = schema.validate() {
                        warn!("Skipping table {}: {}", name, e);
                        continue;
                    }
                    debug!("Retrieved schema for {}: {} fields", name, schema.fields.len());
                    tables.insert(name, schema);
                }
                Err(e) => warn!("Failed to get schema for {}: {}", name, e),
            }
        }

        Ok(Self {
            dataset: None,
            tables,
        })
    }

    pub fn dataset(&self) -> Option<&str> {
        self.dataset.as_deref()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[async_trait]
impl SchemaSource for SchemaCatalog {
    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        Ok(self.table_names())
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema, SchemaError> {
        self.table(table)
            .cloned()
            .ok_or_else(|| SchemaError::NotFound(table.to_string()))
    }
}
