use crate::config::LlmConfig;
use crate::llm::{GenerationOptions, LlmError, TextGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// Gemini models served from Vertex AI `generateContent`.
pub struct VertexProvider {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

impl From<&GenerationOptions> for GenerationConfig {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            max_output_tokens: options.max_output_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
        }
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl VertexProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let project_id = config.project_id.clone().ok_or_else(|| {
            LlmError::ConfigError("project_id is required for the Vertex AI provider".to_string())
        })?;
        let access_token = config.access_token.clone().ok_or_else(|| {
            LlmError::ConfigError("access_token is required for the Vertex AI provider".to_string())
        })?;

        let base = config
            .api_url
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com/v1", config.region));
        let endpoint = format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            base.trim_end_matches('/'),
            project_id,
            config.region,
            config.model
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        info!("Vertex AI initialized for project: {}, model: {}", project_id, config.model);
        Ok(Self {
            client,
            endpoint,
            access_token,
        })
    }
}

#[async_trait]
impl TextGenerator for VertexProvider {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: options.into(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Vertex AI responded with status code: {} - {}", status, body);
            return Err(LlmError::ResponseError(format!(
                "Vertex AI responded with status code: {} - {}",
                status, body
            )));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        let text = first_candidate_text(parsed)
            .ok_or_else(|| LlmError::ResponseError("No candidates in response".to_string()))?;
        debug!("Raw response from Vertex AI: {}", text);
        Ok(text)
    }
}

fn first_candidate_text(response: GenerateContentResponse) -> Option<String> {
    let parts = response.candidates.into_iter().next()?.content?.parts;
    let text: String = parts.into_iter().filter_map(|p| p.text).collect();
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    #[test]
    fn request_uses_generation_config() {
        let options = GenerationOptions::sql();
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: "hello" }],
            }],
            generation_config: (&options).into(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(body["generationConfig"]["topK"], 40);
    }

    #[test]
    fn empty_candidates_yield_nothing() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(first_candidate_text(response).is_none());
    }

    #[tokio::test]
    async fn generates_against_endpoint() {
        let app = Router::new().route(
            "/projects/proj/locations/us-central1/publishers/google/models/gemini-1.5-flash:generateContent",
            post(|Json(body): Json<Value>| async move {
                let temperature = body["generationConfig"]["temperature"].as_f64().unwrap_or_default();
                Json(json!({"candidates": [{"content": {"parts": [
                    {"text": format!("SELECT {:.1}", temperature)}
                ]}}]}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = LlmConfig {
            project_id: Some("proj".to_string()),
            access_token: Some("token".to_string()),
            api_url: Some(format!("http://{}", addr)),
            ..LlmConfig::default()
        };
        let provider = VertexProvider::new(&config).unwrap();
        let text = provider.generate("q", &GenerationOptions::summary()).await.unwrap();
        assert_eq!(text, "SELECT 0.3");
    }
}
