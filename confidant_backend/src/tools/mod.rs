//! Capabilities the companion can invoke on itself during a turn.
//!
//! Each tool declares a static JSON Schema for its parameters, enabling LLM
//! function-calling. Tools are registered in a thread-safe ToolRegistry that
//! generates OpenAI-format function definitions for the LLM.

pub mod goals;
pub mod modifiers;
pub mod relationships;
pub mod safety;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Category of tool, used for logging and policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolCategory {
    /// Relationship notes
    Memory,
    /// User goal tracking
    Goals,
    /// The companion's own personality modifiers
    SelfModification,
}

/// The result of executing a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolOutput {
    /// Successful structured output
    Json(serde_json::Value),
    /// Tool execution failed; the model sees the message and may retry
    Error(String),
}

impl ToolOutput {
    /// Convert to a string representation suitable for feeding back to the LLM
    pub fn to_llm_string(&self) -> String {
        match self {
            ToolOutput::Json(v) => serde_json::to_string(v).unwrap_or_else(|_| v.to_string()),
            ToolOutput::Error(e) => serde_json::json!({ "success": false, "error": e }).to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutput::Json(_))
    }
}

/// Context passed to tools during execution
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub conversation_id: String,
    /// Last few history messages, newest last, for tools that infer from context
    pub recent_messages: Vec<String>,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Self::default()
        }
    }

    pub fn with_recent_messages(mut self, messages: Vec<String>) -> Self {
        self.recent_messages = messages;
        self
    }
}

/// A capability the model can call during its turn.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in function-calling (e.g., "adjust_modifier")
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    ///
    /// This is used directly in OpenAI-format function definitions.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    ///
    /// Invalid parameters are reported as `ToolOutput::Error`; `Err` is for
    /// failures the model cannot fix, such as I/O.
    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Category for grouping in logs
    fn category(&self) -> ToolCategory;
}

/// OpenAI-format function definition for LLM function-calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// OpenAI-format tool definition (wraps FunctionDef)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

/// A tool call with parsed arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a tool call, ready to feed back to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub name: String,
    pub output: ToolOutput,
}

/// Thread-safe registry of tools available to the companion.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::debug!(
            "Registered tool: {} (category: {:?})",
            name,
            tool.category()
        );
        self.tools.write().await.insert(name, tool);
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Tool definitions sorted by name so prompts are stable.
    pub async fn tool_definitions(&self) -> Vec<ToolDef> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDef> = tools
            .values()
            .map(|tool| ToolDef {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool call whose arguments are already parsed.
    pub async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext) -> ToolCallResult {
        let output = self.run(call, ctx).await;
        ToolCallResult {
            name: call.name.clone(),
            output,
        }
    }

    /// Execute a call as it arrived from the model, arguments still a JSON
    /// string. Unparseable payloads come back as an error quoting the raw text.
    pub async fn execute_raw(
        &self,
        name: &str,
        raw_arguments: &str,
        ctx: &ToolContext,
    ) -> ToolCallResult {
        let trimmed = raw_arguments.trim();
        let parsed = if trimmed.is_empty() {
            Ok(serde_json::json!({}))
        } else {
            serde_json::from_str::<serde_json::Value>(trimmed)
        };

        match parsed {
            Ok(arguments) => {
                let call = ToolCall {
                    name: name.to_string(),
                    arguments,
                };
                self.execute_call(&call, ctx).await
            }
            Err(e) => {
                tracing::warn!("Malformed arguments for tool '{}': {} (raw: {})", name, e, raw_arguments);
                ToolCallResult {
                    name: name.to_string(),
                    output: ToolOutput::Error(format!(
                        "Arguments are not valid JSON ({}). Raw payload: {}",
                        e, raw_arguments
                    )),
                }
            }
        }
    }

    async fn run(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(tool) = self.get(&call.name).await else {
            return ToolOutput::Error(format!("Unknown tool: {}", call.name));
        };

        if !call.arguments.is_object() {
            return ToolOutput::Error("Arguments must be a JSON object".to_string());
        }

        if let safety::SafetyVerdict::Block(reason) = safety::validate_input(&call.arguments) {
            tracing::warn!("Rejected input for tool '{}': {}", call.name, reason);
            return ToolOutput::Error(format!("Input validation failed: {}", reason));
        }

        match tool.execute(call.arguments.clone(), ctx).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Tool '{}' failed: {:#}", call.name, e);
                ToolOutput::Error(format!("Tool execution failed: {}", e))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
