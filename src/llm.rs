//! Language-model providers.
//!
//! [`create_generator`] maps `[llm].provider` to a [`Generator`]:
//!
//! | Config Value | Endpoint |
//! |-------------|----------|
//! | `"disabled"` | none; commands that need generation fail with `MissingCapability` |
//! | `"openai"` | `POST {url}/chat/completions` (OpenAI or any compatible server) |
//! | `"ollama"` | `POST {url}/api/chat` |
//! | `"custom"` | `POST {url}` with a `{"chat": {"messages": ...}}` body |
//!
//! All HTTP providers retry 429 and 5xx responses with exponential backoff.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use litreview_core::error::Error;
use litreview_core::llm::{ChatMessage, GenerationParams, Generator};

use crate::config::LlmConfig;
use crate::http;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

type CoreResult<T> = litreview_core::Result<T>;

fn api_key(config: &LlmConfig, default_env: &str) -> Option<String> {
    let var = config.api_key_env.as_deref().unwrap_or(default_env);
    std::env::var(var).ok().filter(|k| !k.is_empty())
}

// ============ OpenAI-compatible ============

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

pub struct OpenAiGenerator {
    model: String,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    client: Client,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        let base_url = config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string());
        let api_key = api_key(config, "OPENAI_API_KEY");
        if api_key.is_none() && base_url == OPENAI_URL {
            bail!(
                "{} environment variable not set",
                config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
            );
        }
        Ok(Self {
            model,
            base_url,
            api_key,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> CoreResult<String> {
        let start = Instant::now();
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let json = http::send_json("OpenAI", self.max_retries, || {
            let builder = self.client.post(&url).json(&request);
            match &self.api_key {
                Some(key) => builder.bearer_auth(key),
                None => builder,
            }
        })
        .await
        .map_err(|e| Error::generation(None, e))?;

        let content = parse_completion(json)?;
        debug!(
            model = %self.model,
            response_len = content.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );
        Ok(content)
    }
}

fn parse_completion(json: serde_json::Value) -> CoreResult<String> {
    let response: CompletionResponse = serde_json::from_value(json)
        .map_err(|e| Error::generation(None, format!("Invalid chat completion response: {e}")))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| Error::generation(None, "chat completion returned no choices"))
}

// ============ Ollama ============

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

pub struct OllamaGenerator {
    model: String,
    url: String,
    max_retries: u32,
    client: Client,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for Ollama provider"))?;
        Ok(Self {
            model,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> CoreResult<String> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
                top_p: params.top_p,
                num_predict: params.max_tokens,
            },
        };
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let json = http::send_json("Ollama", self.max_retries, || {
            self.client.post(&url).json(&request)
        })
        .await
        .map_err(|e| Error::generation(None, format!("{e} (is Ollama running at {}?)", self.url)))?;

        let response: OllamaChatResponse = serde_json::from_value(json)
            .map_err(|e| Error::generation(None, format!("Invalid Ollama chat response: {e}")))?;
        Ok(response.message.content)
    }
}

// ============ Custom endpoint ============

#[derive(Serialize)]
struct CustomRequest<'a> {
    chat: CustomChat<'a>,
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct CustomChat<'a> {
    messages: &'a [ChatMessage],
}

/// Self-hosted endpoint taking the whole chat plus sampling parameters.
///
/// The key from `api_key_env` (default `API_KEY`) is sent verbatim in the
/// `Authorization` header.
pub struct CustomGenerator {
    url: String,
    api_key: Option<String>,
    max_retries: u32,
    client: Client,
}

impl CustomGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.url required for custom provider"))?;
        Ok(Self {
            url,
            api_key: api_key(config, "API_KEY"),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for CustomGenerator {
    fn model_name(&self) -> &str {
        "custom"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> CoreResult<String> {
        let request = CustomRequest {
            chat: CustomChat { messages },
            max_new_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        };
        let json = http::send_json("Endpoint", self.max_retries, || {
            let builder = self.client.post(&self.url).json(&request);
            match &self.api_key {
                Some(key) => builder.header("Authorization", key),
                None => builder,
            }
        })
        .await
        .map_err(|e| Error::generation(None, e))?;

        Ok(custom_answer(json))
    }
}

/// The endpoint answers with a JSON string; anything else is kept as raw JSON text.
fn custom_answer(json: serde_json::Value) -> String {
    match json {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Build the configured generator, or `None` when `provider = "disabled"`.
pub fn create_generator(config: &LlmConfig) -> Result<Option<Arc<dyn Generator>>> {
    let generator: Arc<dyn Generator> = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "openai" => Arc::new(OpenAiGenerator::new(config)?),
        "ollama" => Arc::new(OllamaGenerator::new(config)?),
        "custom" => Arc::new(CustomGenerator::new(config)?),
        other => bail!("Unknown llm provider: {}", other),
    };
    Ok(Some(generator))
}
