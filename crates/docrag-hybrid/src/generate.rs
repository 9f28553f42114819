//! Answer generators: Ollama chat over HTTP, or no generation at all.
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use docrag_core::config::LlmSettings;
use docrag_core::error::{Error, Result};
use docrag_core::traits::{GenerationRequest, Generator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorBackend {
    Ollama,
    None,
}

impl FromStr for GeneratorBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "none" | "" => Ok(Self::None),
            other => Err(Error::InvalidConfig(format!("unknown llm backend '{other}'"))),
        }
    }
}

/// Resolved once at startup.
pub fn build_generator(settings: &LlmSettings) -> Result<Arc<dyn Generator>> {
    Ok(match settings.backend.parse::<GeneratorBackend>()? {
        GeneratorBackend::Ollama => Arc::new(OllamaGenerator::new(settings)?),
        GeneratorBackend::None => Arc::new(NoneGenerator),
    })
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaGenerator {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Generation(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: request.system_prompt.clone() },
                ChatMessage { role: "user", content: format!("context:\n{}\n\n[Task]: {}", request.context, request.query) },
            ],
            stream: false,
            options: ChatOptions { temperature: request.temperature, num_predict: request.max_tokens },
        };
        debug!(model = %self.model, context_chars = request.context.len(), "ollama chat request");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("ollama unreachable: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(%status, "ollama chat failed");
            return Err(Error::Generation(format!("ollama returned {status}: {}", detail.trim())));
        }
        let parsed: ChatResponse = resp.json().await.map_err(|e| Error::Generation(format!("invalid ollama response: {e}")))?;
        Ok(parsed.message.content.trim().to_string())
    }
}

/// Retrieval-only mode: the answer is the assembled context itself.
pub struct NoneGenerator;

#[async_trait]
impl Generator for NoneGenerator {
    fn name(&self) -> &str {
        "none"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if request.context.is_empty() {
            return Ok("No relevant sources found.".to_string());
        }
        Ok(request.context.clone())
    }
}
