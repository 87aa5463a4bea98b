use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Caller-facing knobs for a single generation call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Model identifier, opaque to this crate (e.g. "llama3", "mistral").
    pub model: String,
    /// Maximum number of tokens the model may produce.
    pub max_tokens: u32,
    pub temperature: f32,
    /// Wall-clock budget for the whole HTTP call.
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            max_tokens: 1500,
            temperature: 0.3,
            timeout: Duration::from_secs(120),
        }
    }
}

impl GenerateOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// --- Wire types for POST /api/generate ---

#[derive(Debug, Serialize)]
pub(crate) struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: ModelOptions,
}

#[derive(Debug, Serialize)]
pub(crate) struct ModelOptions {
    pub num_predict: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    pub response: String,
}
