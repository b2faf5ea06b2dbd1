pub mod catalog;
pub mod format;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

pub use catalog::SchemaCatalog;

#[derive(Debug)]
pub enum SchemaError {
    NotFound(String),
    Invalid(String),
    Source(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::NotFound(table) => write!(f, "Table not found: {}", table),
            SchemaError::Invalid(msg) => write!(f, "Invalid schema: {}", msg),
            SchemaError::Source(msg) => write!(f, "Schema source error: {}", msg),
        }
    }
}

impl Error for SchemaError {}

/// Column types as reported by the analytical store.
///
/// The store reports several spellings for the same type (`INT64` and
/// `INTEGER`, `STRUCT` and `RECORD`); they collapse to one variant here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Bytes,
    Integer,
    Float,
    Numeric,
    Boolean,
    Timestamp,
    Date,
    Time,
    DateTime,
    Json,
    Record,
    Other(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::String => "STRING",
            FieldType::Bytes => "BYTES",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Numeric => "NUMERIC",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
            FieldType::Json => "JSON",
            FieldType::Record => "RECORD",
            FieldType::Other(name) => name,
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, FieldType::Record)
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        match name.trim().to_uppercase().as_str() {
            "STRING" => FieldType::String,
            "BYTES" => FieldType::Bytes,
            "INTEGER" | "INT64" => FieldType::Integer,
            "FLOAT" | "FLOAT64" => FieldType::Float,
            "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => FieldType::Numeric,
            "BOOLEAN" | "BOOL" => FieldType::Boolean,
            "TIMESTAMP" => FieldType::Timestamp,
            "DATE" => FieldType::Date,
            "TIME" => FieldType::Time,
            "DATETIME" => FieldType::DateTime,
            "JSON" => FieldType::Json,
            "RECORD" | "STRUCT" => FieldType::Record,
            _ => FieldType::Other(name),
        }
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

impl fmt::Display for FieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldMode::Nullable => f.write_str("NULLABLE"),
            FieldMode::Required => f.write_str("REQUIRED"),
            FieldMode::Repeated => f.write_str("REPEATED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, deserialize_with = "mode_or_default")]
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "nested_fields", rename = "fields", skip_serializing_if = "Vec::is_empty")]
    pub nested_fields: Vec<Field>,
}

// The schema dump writes `"mode": null` for some nested fields.
fn mode_or_default<'de, D>(deserializer: D) -> Result<FieldMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<FieldMode>::deserialize(deserializer)?.unwrap_or_default())
}

impl Field {
    pub fn scalar(name: &str, field_type: FieldType, mode: FieldMode) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            mode,
            description: None,
            nested_fields: Vec::new(),
        }
    }

    pub fn record(name: &str, mode: FieldMode, nested_fields: Vec<Field>) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Record,
            mode,
            description: None,
            nested_fields,
        }
    }

    #[cfg(test)]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Checks that only RECORD fields carry nested fields, recursively.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !self.field_type.is_record() && !self.nested_fields.is_empty() {
            return Err(SchemaError::Invalid(format!(
                "field '{}' of type {} declares nested fields",
                self.name, self.field_type
            )));
        }
        self.nested_fields.iter().try_for_each(Field::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(table_name: &str, fields: Vec<Field>) -> Self {
        Self {
            table_name: table_name.to_string(),
            description: None,
            fields,
        }
    }

    #[cfg(test)]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        self.fields.iter().try_for_each(Field::validate)
    }
}

/// Where table schemas come from: a loaded snapshot or the live store.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>, SchemaError>;
    async fn get_schema(&self, table: &str) -> Result<TableSchema, SchemaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_accepts_engine_spellings() {
        assert_eq!(FieldType::from("INT64".to_string()), FieldType::Integer);
        assert_eq!(FieldType::from("struct".to_string()), FieldType::Record);
        assert_eq!(FieldType::from("BOOL".to_string()), FieldType::Boolean);
        assert_eq!(
            FieldType::from("GEOGRAPHY".to_string()),
            FieldType::Other("GEOGRAPHY".to_string())
        );
    }

    #[test]
    fn nested_fields_only_allowed_on_records() {
        let bad = Field {
            nested_fields: vec![Field::scalar("text", FieldType::String, FieldMode::Nullable)],
            ..Field::scalar("code", FieldType::String, FieldMode::Nullable)
        };
        assert!(matches!(bad.validate(), Err(SchemaError::Invalid(_))));

        let good = Field::record(
            "code",
            FieldMode::Nullable,
            vec![Field::scalar("text", FieldType::String, FieldMode::Nullable)],
        );
        assert!(good.validate().is_ok());
    }

    #[test]
    fn field_deserializes_from_schema_dump() {
        let json = r#"{
            "name": "code",
            "type": "RECORD",
            "mode": "NULLABLE",
            "description": "",
            "fields": [
                {"name": "text", "type": "STRING", "mode": null},
                {"name": "coding", "type": "RECORD", "mode": "REPEATED", "fields": [
                    {"name": "display", "type": "STRING", "mode": "NULLABLE"}
                ]}
            ]
        }"#;
        let field: Field = serde_json::from_str(json).unwrap();
        assert!(field.field_type.is_record());
        assert_eq!(field.nested_fields.len(), 2);
        assert_eq!(field.nested_fields[0].mode, FieldMode::Nullable);
        assert_eq!(field.nested_fields[1].mode, FieldMode::Repeated);
        assert_eq!(field.nested_fields[1].nested_fields[0].name, "display");
    }
}
