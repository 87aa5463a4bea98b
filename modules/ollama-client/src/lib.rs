pub mod error;
pub mod types;
pub mod util;

pub use error::{OllamaError, Result};
pub use types::GenerateOptions;

use tracing::debug;

use types::{GenerateRequest, GenerateResponse, ModelOptions};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Thin client for a local Ollama-compatible generation endpoint.
/// Sends one prompt, returns the raw completion text. No retries, no
/// interpretation of the output; both belong to the caller.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_OLLAMA_URL.to_string(),
        }
    }

    /// Read the endpoint from `OLLAMA_URL`, falling back to localhost.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        Self::new().with_base_url(&base_url)
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a prompt and return the raw completion text.
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &options.model,
            prompt,
            stream: false,
            options: ModelOptions {
                num_predict: options.max_tokens,
                temperature: options.temperature,
            },
        };

        debug!(model = %options.model, prompt_bytes = prompt.len(), "Ollama generate request");

        let response = self
            .http
            .post(&url)
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OllamaError::Timeout(options.timeout)
                } else {
                    OllamaError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OllamaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::Body(e.to_string()))?;
        Ok(body.response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}
