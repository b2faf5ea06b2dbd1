use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: String, // "bigquery" or "duckdb"
    /// `project.dataset` for BigQuery, a schema name for DuckDB
    pub dataset: String,
    pub project_id: Option<String>,
    pub access_token: Option<String>,
    pub api_url: Option<String>,
    pub connection_string: String,
    pub pool_size: usize,
    pub cost_per_tb_usd: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "bigquery".to_string(),
            dataset: "bigquery-public-data.fhir_synthea".to_string(),
            project_id: None,
            access_token: None,
            api_url: None,
            connection_string: "health-nlq.db".to_string(),
            pool_size: 4,
            cost_per_tb_usd: 5.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: String, // "vertex", "ollama", or "remote"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub project_id: Option<String>,
    pub region: String,
    pub access_token: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "vertex".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            api_url: None,
            project_id: None,
            region: "us-central1".to_string(),
            access_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SchemaConfig {
    /// Snapshot of table schemas; when unset the schemas are read from the warehouse.
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub default_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: crate::sql::prompt::DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub schema: SchemaConfig,
    pub query: QueryConfig,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// JSON snapshot of the table schemas
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/health-nlq/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // HEALTH_NLQ__DATABASE__ACCESS_TOKEN and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("HEALTH_NLQ")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;
        config.apply_args(args);
        Ok(config)
    }

    fn apply_args(&mut self, args: &CliArgs) {
        if let Some(host) = &args.host {
            self.web.host = host.clone();
        }
        if let Some(port) = args.port {
            self.web.port = port;
        }
        if let Some(catalog) = &args.catalog {
            self.schema.catalog_path = Some(catalog.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_section_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
backend = "duckdb"
connection_string = ":memory:"

[llm]
backend = "ollama"
model = "llama3"
"#
        )
        .unwrap();

        let args = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::default()
        };
        let config = AppConfig::new(&args).unwrap();

        assert_eq!(config.database.backend, "duckdb");
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.database.cost_per_tb_usd, 5.0);
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.llm.region, "us-central1");
        assert_eq!(config.web.port, 8000);
        assert_eq!(config.query.default_limit, 1000);
    }

    #[test]
    fn command_line_overrides_win() {
        let mut config = AppConfig::default();
        config.apply_args(&CliArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(9000),
            catalog: Some(PathBuf::from("catalog.json")),
            ..CliArgs::default()
        });

        assert_eq!(config.web.host, "127.0.0.1");
        assert_eq!(config.web.port, 9000);
        assert_eq!(
            config.schema.catalog_path.as_deref(),
            Some(Path::new("catalog.json"))
        );
    }
}
