pub mod models;
pub mod providers;

pub use models::GenerationOptions;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use tracing::info;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// A text-in, text-out generative model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError>;
}

pub struct LlmManager {
    generator: Box<dyn TextGenerator + Send + Sync>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let generator: Box<dyn TextGenerator + Send + Sync> = match config.backend.as_str() {
            "vertex" => Box::new(providers::vertex::VertexProvider::new(config)?),
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        info!("LLM manager using backend {} with model {}", config.backend, config.model);
        Ok(Self { generator })
    }

    pub fn with_generator(generator: Box<dyn TextGenerator + Send + Sync>) -> Self {
        Self { generator }
    }

    pub async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
        self.generator.generate(prompt, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
            Ok(format!("{}@{}", prompt, options.max_output_tokens))
        }
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = LlmConfig {
            backend: "local".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(LlmManager::new(&config), Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn vertex_needs_a_project() {
        let config = LlmConfig {
            access_token: Some("token".to_string()),
            ..LlmConfig::default()
        };
        assert!(matches!(LlmManager::new(&config), Err(LlmError::ConfigError(_))));
    }

    #[tokio::test]
    async fn manager_forwards_options() {
        let manager = LlmManager::with_generator(Box::new(Echo));
        let out = manager.generate("hi", &GenerationOptions::summary()).await.unwrap();
        assert_eq!(out, "hi@512");
    }
}
