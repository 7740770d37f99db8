//! OpenAI-compatible `EmbedClient`/`LLMClient`, plus a generic HTTP `RerankerClient`, all built on
//! the same batched-call/retry-on-429-or-5xx/fail-fast-on-other-4xx shape.
//!
//! These are reference implementations, not the only ones the `LLMClient`/`EmbedClient` traits can
//! have — the core never imports this module itself; only `main.rs` does, behind the `adapters`
//! feature.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::{EmbeddingConfig, LlmConfig, RerankerConfig};
use crate::embedding::EmbedClient;
use crate::error::LlmError;
use crate::llm::{CompletionRequest, LLMClient, ResponseSchema};
use crate::reranker::RerankerClient;

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(5))
}

fn classify_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Embeds via `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbedClient {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIEmbedClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, LlmError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| LlmError::Unavailable("embedding.model is required for the openai provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| LlmError::Unavailable("embedding.dims is required for the openai provider".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Unavailable("OPENAI_API_KEY not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        Ok(Self { model, dims, batch_size: config.batch_size, max_retries: config.max_retries, api_key, client })
    }
}

#[async_trait]
impl EmbedClient for OpenAIEmbedClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

impl OpenAIEmbedClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = json!({ "model": self.model, "input": texts });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value =
                            response.json().await.map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                        return parse_embeddings(&json);
                    }
                    if classify_status(status) {
                        last_err = Some(LlmError::Unavailable(format!("openai embeddings returned {status}")));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    return Err(LlmError::InvalidResponse(format!("openai embeddings {status}: {text}")));
                }
                Err(e) => {
                    last_err = Some(LlmError::Unavailable(e.to_string()));
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or(LlmError::Timeout))
    }
}

fn parse_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, LlmError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| LlmError::InvalidResponse("missing data array".into()))?;

    data.iter()
        .map(|item| {
            let arr = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| LlmError::InvalidResponse("missing embedding array".into()))?;
            Ok(arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        })
        .collect()
}

/// Completes via `POST /v1/chat/completions`, requesting JSON-mode output when a schema was
/// passed. Requires `OPENAI_API_KEY`.
pub struct OpenAILLMClient {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAILLMClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let model = config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Unavailable("OPENAI_API_KEY not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        Ok(Self { model, api_key, client })
    }
}

#[async_trait]
impl LLMClient for OpenAILLMClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if matches!(request.schema, Some(ResponseSchema::StringList) | Some(ResponseSchema::TripleList)) {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let send = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(request.deadline, send)
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            return Err(LlmError::Unavailable(format!("openai chat completions returned {status}")));
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".into()))
    }
}

/// Cross-encoder reranking over a generic `POST {endpoint}` returning `{"scores": [f32, ...]}`, one
/// score per input doc in request order. `RerankerConfig::provider` carries the endpoint URL.
pub struct HttpRerankerClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRerankerClient {
    pub fn new(config: &RerankerConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        Ok(Self { endpoint: config.provider.clone(), client })
    }
}

#[async_trait]
impl RerankerClient for HttpRerankerClient {
    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, LlmError> {
        let body = json!({ "query": query, "documents": docs });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Unavailable(format!("reranker returned {}", response.status())));
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        json.get("scores")
            .and_then(|s| s.as_array())
            .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
            .ok_or_else(|| LlmError::InvalidResponse("missing scores array".into()))
    }
}
