//! OpenAI-compatible chat-completion client.
//!
//! Speaks `/chat/completions` with function tools. The conversation loop only
//! depends on the [`CompletionBackend`] trait so tests can script responses.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::tools::ToolDef;

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    /// Assistant turn that only requests tool invocations.
    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<LlmToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: text,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Tool call as returned by the LLM (OpenAI format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: LlmFunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmFunctionCall {
    pub name: String,
    pub arguments: String, // JSON string
}

/// One model response: visible text, requested tool invocations, and whether
/// the model considers its turn finished.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<LlmToolCall>,
    pub terminal: bool,
}

impl Completion {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
            terminal: true,
        }
    }

    pub fn with_tool_calls(calls: Vec<LlmToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
            terminal: false,
        }
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolDef],
    ) -> Result<Completion>;
}

#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model,
            temperature: 0.7,
            max_tokens: 1000,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        )
        .with_sampling(config.temperature, config.max_tokens)
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Same endpoint and credentials, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        let mut client = self.clone();
        client.model = model.into();
        client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Plain text completion with explicit sampling parameters.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = self.post_chat(body).await?;
        let message = first_message(&response)?;
        let content = message["content"]
            .as_str()
            .map(|text| split_visible_and_thinking(text).0)
            .unwrap_or_default();

        Ok(content)
    }

    async fn post_chat(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/chat/completions", self.api_url);

        let mut req = self.client.post(&url).json(&body);

        // Add API key header if provided (not needed for local models)
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        // Check for HTTP errors and include response body for debugging
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse LLM response")
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolDef],
    ) -> Result<Completion> {
        let mut outbound = Vec::with_capacity(messages.len() + 1);
        outbound.push(ChatMessage::system(system));
        outbound.extend_from_slice(messages);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": outbound,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        // Only include tools if we have any
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let response = self.post_chat(body).await?;
        parse_completion(&response)
    }
}

fn first_message(response: &serde_json::Value) -> Result<&serde_json::Value> {
    response["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .map(|choice| &choice["message"])
        .context("Empty choices in LLM response")
}

fn parse_completion(response: &serde_json::Value) -> Result<Completion> {
    let choice = response["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .context("Empty choices in LLM response")?;
    let message = &choice["message"];

    let text = message["content"]
        .as_str()
        .map(|raw| split_visible_and_thinking(raw).0)
        .filter(|visible| !visible.is_empty());

    let tool_calls: Vec<LlmToolCall> = match message.get("tool_calls") {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone())
            .context("Malformed tool_calls in LLM response")?,
        _ => Vec::new(),
    };

    let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop");
    let terminal = tool_calls.is_empty() && finish_reason != "tool_calls";

    Ok(Completion {
        text,
        tool_calls,
        terminal,
    })
}

/// Separates `<think>`/`<thinking>` blocks from the user-visible reply.
fn split_visible_and_thinking(input: &str) -> (String, Vec<String>) {
    fn extract_tag(text: String, open_tag: &str, close_tag: &str) -> (String, Vec<String>) {
        let mut rest = text;
        let mut thoughts = Vec::new();

        while let Some(start) = rest.find(open_tag) {
            let content_start = start + open_tag.len();
            let (thought_end, remove_end) = match rest[content_start..].find(close_tag) {
                Some(rel_end) => {
                    let end = content_start + rel_end;
                    (end, end + close_tag.len())
                }
                None => (rest.len(), rest.len()),
            };
            let thought = rest[content_start..thought_end].trim();
            if !thought.is_empty() {
                thoughts.push(thought.to_string());
            }
            rest.replace_range(start..remove_end, "");
        }

        (rest, thoughts)
    }

    let (without_thinking_tag, mut thoughts) =
        extract_tag(input.to_string(), "<thinking>", "</thinking>");
    let (visible, mut more) = extract_tag(without_thinking_tag, "<think>", "</think>");
    thoughts.append(&mut more);

    (visible.trim().to_string(), thoughts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_message_omits_tool_fields() {
        let json = serde_json::to_value(ChatMessage::user("Hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Hello");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let json = serde_json::to_value(ChatMessage::tool_result("call_7", "{}")).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_7");
    }

    #[test]
    fn parses_tool_call_response_as_non_terminal() {
        let response = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "adjust_modifier",
                            "arguments": "{\"modifier\":\"warmth\",\"adjustment\":1}"
                        }
                    }]
                }
            }]
        });

        let completion = parse_completion(&response).unwrap();
        assert!(!completion.terminal);
        assert!(completion.text.is_none());
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].function.name, "adjust_modifier");
    }

    #[test]
    fn parses_final_text_and_strips_thinking() {
        let response = json!({
            "choices": [{
                "finish_reason": "stop",
                "message": {
                    "role": "assistant",
                    "content": "<think>she sounds tired</think>\nThat sounds like a long week."
                }
            }]
        });

        let completion = parse_completion(&response).unwrap();
        assert!(completion.terminal);
        assert_eq!(
            completion.text.as_deref(),
            Some("That sounds like a long week.")
        );
    }

    #[test]
    fn empty_choices_is_an_error() {
        assert!(parse_completion(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn strips_both_think_tag_variants() {
        let (visible, thoughts) =
            split_visible_and_thinking("<thinking>plan</thinking>\n<think>detail</think>\nDone");
        assert_eq!(visible, "Done");
        assert_eq!(thoughts, vec!["plan", "detail"]);
    }
}
