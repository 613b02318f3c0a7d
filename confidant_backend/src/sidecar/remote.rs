//! Remote collaborators of the remote assessors: text embeddings and one-line
//! summaries. Callers impose their own timeouts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SidecarConfig;
use crate::llm_client::{ChatMessage, LlmClient};

const SUMMARY_INSTRUCTION: &str =
    "Summarize the key themes and advice given in this conversation window in one sentence.";

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// OpenAI-compatible `POST {base}/embeddings` client.
pub struct EmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    /// `None` when no embeddings endpoint is configured.
    pub fn from_config(config: &SidecarConfig) -> Option<Self> {
        let url = config.embedding_api_url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self::new(
            url,
            config.embedding_model.clone(),
            config.embedding_api_key.clone(),
        ))
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await.context("Failed to send embedding request")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error {}: {}", status, body);
        }

        let value: Value = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        parse_embedding(&value)
    }
}

fn parse_embedding(value: &Value) -> Result<Vec<f32>> {
    let vector: Vec<f32> = value["data"]
        .as_array()
        .and_then(|data| data.first())
        .and_then(|item| item["embedding"].as_array())
        .context("Embedding response has no data[0].embedding")?
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    if vector.is_empty() {
        anyhow::bail!("Embedding response contained an empty vector");
    }
    Ok(vector)
}

#[async_trait]
impl Summarizer for LlmClient {
    async fn summarize(&self, text: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(SUMMARY_INSTRUCTION),
            ChatMessage::user(text),
        ];
        let summary = self.generate(&messages, 0.0, 64).await?;
        Ok(summary.trim().to_string())
    }
}
