//! The conversation loop: one companion, one conversation id, turn by turn.
//!
//! Each turn rebuilds the system prompt from the live modifier values and any
//! standing sidecar warning, lets the model call tools for a bounded number of
//! rounds, commits the exchange to history, and hands the final reply to the
//! sidecar for evaluation.

pub mod prompt;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::AgentConfig;
use crate::goals::GoalLedger;
use crate::llm_client::{ChatMessage, CompletionBackend, LlmClient};
use crate::persona::traits::{Modifier, TraitStore};
use crate::persona::{Persona, PersonaLibrary};
use crate::relationships::RelationshipMemory;
use crate::sidecar::remote::{EmbeddingClient, Embedder, Summarizer};
use crate::sidecar::{ConversationWarning, CycleOutcome, SidecarCoordinator};
use crate::tools::goals::TrackUserGoalTool;
use crate::tools::modifiers::{AdjustModifierTool, SetModifierTool};
use crate::tools::relationships::{AddRelationshipNoteTool, GetRelationshipNotesTool};
use crate::tools::{ToolContext, ToolRegistry};

/// History messages handed to tools that infer from recent context.
const TOOL_CONTEXT_MESSAGES: usize = 3;

const EMPTY_REPLY_FALLBACK: &str =
    "I received the information but encountered an issue generating a response. Could you please try again?";

/// Things worth surfacing to a UI or debug log while a turn runs.
#[derive(Debug, Clone)]
pub enum CompanionEvent {
    ToolCalled {
        name: String,
        success: bool,
    },
    ModifierChanged {
        modifier: String,
        old: i32,
        new: i32,
        is_large_change: bool,
    },
    SidecarWarning(ConversationWarning),
    Error(String),
}

pub struct Companion {
    conversation_id: String,
    persona: Persona,
    traits: Arc<RwLock<TraitStore>>,
    relationships: Arc<RelationshipMemory>,
    goals: Arc<RwLock<GoalLedger>>,
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn CompletionBackend>,
    sidecar: Arc<SidecarCoordinator>,
    history: Vec<ChatMessage>,
    max_tool_rounds: usize,
    events: Option<flume::Sender<CompanionEvent>>,
}

impl Companion {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn relationships(&self) -> &RelationshipMemory {
        &self.relationships
    }

    pub fn goals(&self) -> Arc<RwLock<GoalLedger>> {
        self.goals.clone()
    }

    pub fn sidecar(&self) -> &SidecarCoordinator {
        &self.sidecar
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub async fn modifiers(&self) -> Vec<(Modifier, i32)> {
        self.traits.read().await.values()
    }

    /// The system prompt the next turn would be sent with.
    pub async fn system_prompt(&self) -> String {
        let warning = self.sidecar.active_warning(&self.conversation_id).await;
        let traits = self.traits.read().await;
        prompt::build_system_prompt(&self.persona, &traits, warning.as_ref())
    }

    pub async fn metrics_summary(&self) -> String {
        let goals = self.goals.read().await;
        self.sidecar
            .metrics_summary(&self.conversation_id, &goals)
            .await
    }

    /// Forget the conversation so far. The sidecar window goes with it; a
    /// standing warning does not.
    pub async fn clear_history(&mut self) {
        self.history.clear();
        self.sidecar.reset_window(&self.conversation_id).await;
        tracing::info!("Cleared history for conversation {}", self.conversation_id);
    }

    /// End the conversation. Sidecar state for it is dropped.
    pub async fn close(self) {
        self.sidecar.end_conversation(&self.conversation_id).await;
        tracing::info!("Closed conversation {}", self.conversation_id);
    }

    /// Run one user turn. Never fails: upstream errors come back as an
    /// apology and leave the history untouched.
    pub async fn send_message(&mut self, user_message: &str) -> String {
        let (reply, turn) = match self.run_turn(user_message).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Turn failed: {:#}", e);
                self.emit(CompanionEvent::Error(format!("{:#}", e)));
                return format!(
                    "Error communicating with {}: {}",
                    self.persona.name(),
                    e
                );
            }
        };

        self.history.extend(turn);
        self.history.push(ChatMessage::assistant(reply.clone()));

        match self.sidecar.record_turn(&self.conversation_id, &reply).await {
            CycleOutcome::Warned(warning) => self.emit(CompanionEvent::SidecarWarning(warning)),
            CycleOutcome::Passed { cleared: true } => {
                tracing::debug!("Standing warning cleared after a clean cycle")
            }
            _ => {}
        }

        reply
    }

    /// Returns the final reply plus the messages to append to history
    /// (user message, tool requests, tool results), excluding the reply.
    async fn run_turn(&self, user_message: &str) -> Result<(String, Vec<ChatMessage>)> {
        let system = self.system_prompt().await;

        let mut turn = vec![ChatMessage::user(user_message)];
        let ctx = ToolContext::new(self.conversation_id.clone())
            .with_recent_messages(recent_texts(&self.history, &turn));
        let tool_defs = self.registry.tool_definitions().await;

        let mut partial = String::new();
        let mut round = 0;
        loop {
            let mut messages = self.history.clone();
            messages.extend(turn.iter().cloned());

            tracing::debug!("Completion round {}", round + 1);
            let completion = self
                .backend
                .complete(&system, &messages, &tool_defs)
                .await
                .context("Completion request failed")?;

            let text = completion
                .text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            if completion.tool_calls.is_empty() {
                let reply = text
                    .or_else(|| (!partial.is_empty()).then(|| partial.clone()))
                    .unwrap_or_else(|| EMPTY_REPLY_FALLBACK.to_string());
                tracing::debug!("Turn finished after {} round(s)", round + 1);
                return Ok((reply, turn));
            }

            if let Some(text) = &text {
                if !partial.is_empty() {
                    partial.push(' ');
                }
                partial.push_str(text);
            }

            if round >= self.max_tool_rounds {
                tracing::warn!(
                    "Tool-call limit ({}) reached; replying with partial text",
                    self.max_tool_rounds
                );
                let reply = if partial.is_empty() {
                    EMPTY_REPLY_FALLBACK.to_string()
                } else {
                    partial
                };
                return Ok((reply, turn));
            }
            round += 1;

            let calls = completion.tool_calls;
            turn.push(ChatMessage::assistant_tool_calls(text, calls.clone()));
            for call in &calls {
                tracing::debug!("Tool called: {} {}", call.function.name, call.function.arguments);
                let result = self
                    .registry
                    .execute_raw(&call.function.name, &call.function.arguments, &ctx)
                    .await;
                self.emit(CompanionEvent::ToolCalled {
                    name: result.name.clone(),
                    success: result.output.is_success(),
                });
                turn.push(ChatMessage::tool_result(
                    call.id.clone(),
                    result.output.to_llm_string(),
                ));
            }
        }
    }

    fn emit(&self, event: CompanionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Text of the last few user/assistant messages, oldest first.
fn recent_texts(history: &[ChatMessage], turn: &[ChatMessage]) -> Vec<String> {
    let mut texts: Vec<String> = history
        .iter()
        .chain(turn)
        .filter(|m| m.role == "user" || m.role == "assistant")
        .filter_map(|m| m.content.clone())
        .collect();
    let skip = texts.len().saturating_sub(TOOL_CONTEXT_MESSAGES);
    texts.drain(..skip);
    texts
}

/// Wires persona, stores, tools, and sidecar together from an [`AgentConfig`].
pub struct CompanionBuilder {
    config: AgentConfig,
    persona_dir: Option<PathBuf>,
    backend: Option<Arc<dyn CompletionBackend>>,
    embedder: Option<Arc<dyn Embedder>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    events: Option<flume::Sender<CompanionEvent>>,
}

impl CompanionBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            persona_dir: None,
            backend: None,
            embedder: None,
            summarizer: None,
            events: None,
        }
    }

    /// Use this persona directory instead of resolving `config.persona`.
    pub fn with_persona_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persona_dir = Some(dir.into());
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_events(mut self, events: flume::Sender<CompanionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn build(self) -> Result<Companion> {
        let config = self.config;

        let persona = match self.persona_dir {
            Some(dir) => Persona::load(&dir)?,
            None => {
                let library = PersonaLibrary::new(config.personas_dir());
                if library.list()?.is_empty() {
                    library.ensure_default(&config.persona)?;
                }
                library.resolve(&config.persona)?
            }
        };
        let traits = Arc::new(RwLock::new(persona.load_traits()?));

        let relationships = Arc::new(RelationshipMemory::new(config.relationships_dir())?);
        let goals = if config.goals.persist {
            GoalLedger::with_persistence(config.goals_path())?
        } else {
            GoalLedger::new()
        };
        let goals = Arc::new(RwLock::new(goals));

        let client = LlmClient::from_config(&config);
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(client.clone()) as Arc<dyn CompletionBackend>);
        let embedder = self.embedder.or_else(|| {
            EmbeddingClient::from_config(&config.sidecar).map(|c| Arc::new(c) as Arc<dyn Embedder>)
        });
        let summarizer = self.summarizer.or_else(|| {
            let client = match &config.sidecar.summarize_model {
                Some(model) => client.with_model(model.clone()),
                None => client,
            };
            Some(Arc::new(client) as Arc<dyn Summarizer>)
        });

        let sidecar = Arc::new(SidecarCoordinator::from_config(
            config.sidecar.clone(),
            goals.clone(),
            embedder,
            summarizer,
        ));

        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Arc::new(AddRelationshipNoteTool::new(relationships.clone())))
            .await;
        registry
            .register(Arc::new(GetRelationshipNotesTool::new(relationships.clone())))
            .await;
        registry
            .register(Arc::new(TrackUserGoalTool::new(goals.clone())))
            .await;
        registry
            .register(Arc::new(AdjustModifierTool::new(
                traits.clone(),
                self.events.clone(),
            )))
            .await;
        registry
            .register(Arc::new(SetModifierTool::new(
                traits.clone(),
                self.events.clone(),
            )))
            .await;

        let conversation_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            "Companion '{}' ready (conversation {}, assessors: {})",
            persona.name(),
            conversation_id,
            sidecar.assessor_names().join(", ")
        );

        Ok(Companion {
            conversation_id,
            persona,
            traits,
            relationships,
            goals,
            registry,
            backend,
            sidecar,
            history: Vec::new(),
            max_tool_rounds: config.max_tool_rounds,
            events: self.events,
        })
    }
}
