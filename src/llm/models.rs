use serde::{Deserialize, Serialize};

/// Sampling knobs passed to every backend on each call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl GenerationOptions {
    /// Near-deterministic settings for SQL generation.
    pub fn sql() -> Self {
        Self {
            max_output_tokens: 1024,
            temperature: 0.1,
            top_p: 0.8,
            top_k: 40,
        }
    }

    /// Slightly looser settings for the natural-language summary.
    pub fn summary() -> Self {
        Self {
            max_output_tokens: 512,
            temperature: 0.3,
            top_p: 0.8,
            top_k: 40,
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::sql()
    }
}
