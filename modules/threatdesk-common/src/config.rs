use std::env;

/// Application configuration loaded from environment variables.
/// Everything has a local-development default; the CLI can override the
/// model per run.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL.
    pub database_url: String,
    /// Base URL of the local Ollama endpoint.
    pub ollama_url: String,
    /// Default model identifier, overridable with --model.
    pub model: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("THREATDESK_DB")
                .unwrap_or_else(|_| "sqlite://threatdesk.db?mode=rwc".to_string()),
            ollama_url: env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: env::var("THREATDESK_MODEL").unwrap_or_else(|_| "llama3".to_string()),
        }
    }
}
