use async_trait::async_trait;

use ollama_client::{GenerateOptions, OllamaClient};

/// Seam over the text-generation service. Production uses the Ollama
/// client; tests substitute scripted implementations.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions)
        -> ollama_client::Result<String>;
    fn name(&self) -> &str;
}

#[async_trait]
impl Reasoner for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> ollama_client::Result<String> {
        OllamaClient::generate(self, prompt, options).await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
