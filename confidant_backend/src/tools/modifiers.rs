//! Self-modification tools: the companion tunes its own personality modifiers.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::agent::CompanionEvent;
use crate::persona::traits::{Modifier, ModifierUpdate, TraitStore, MODIFIER_MAX, MODIFIER_MIN};

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

/// Integer argument that may arrive as a JSON number or a numeric string ("+2").
fn int_param(params: &Value, key: &str) -> Option<i64> {
    match params.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().trim_start_matches('+').parse().ok(),
        _ => None,
    }
}

fn modifier_schema(amount_key: &str, amount_description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "modifier": {
                "type": "string",
                "enum": Modifier::names(),
                "description": "Which modifier to change"
            },
            amount_key: {
                "type": "integer",
                "description": amount_description
            },
            "reason": {
                "type": "string",
                "description": "Why this change is being made"
            }
        },
        "required": ["modifier", amount_key, "reason"]
    })
}

/// Shared state and bookkeeping for both modifier tools.
struct ModifierHandle {
    traits: Arc<RwLock<TraitStore>>,
    events: Option<flume::Sender<CompanionEvent>>,
}

impl ModifierHandle {
    fn finish(&self, update: ModifierUpdate, action: &str, is_large_change: bool, reason: &str) -> ToolOutput {
        if !update.success {
            return ToolOutput::Error(update.message);
        }

        tracing::info!("{} (reason: {})", update.message, reason);
        if let (Some(tx), Some(old), Some(new)) = (&self.events, update.old_value, update.new_value) {
            let _ = tx.send(CompanionEvent::ModifierChanged {
                modifier: update.modifier.clone(),
                old,
                new,
                is_large_change,
            });
        }

        ToolOutput::Json(json!({
            "success": true,
            "modifier": update.modifier,
            "old_value": update.old_value,
            "new_value": update.new_value,
            "action": action,
            "is_large_change": is_large_change,
            "reason": reason,
            "message": update.message,
        }))
    }
}

pub struct AdjustModifierTool {
    handle: ModifierHandle,
}

impl AdjustModifierTool {
    pub fn new(
        traits: Arc<RwLock<TraitStore>>,
        events: Option<flume::Sender<CompanionEvent>>,
    ) -> Self {
        Self {
            handle: ModifierHandle { traits, events },
        }
    }
}

#[async_trait]
impl Tool for AdjustModifierTool {
    fn name(&self) -> &str {
        "adjust_modifier"
    }

    fn description(&self) -> &str {
        "Adjust one of your own personality modifiers relative to its current value, based on \
         user feedback ('be less verbose', 'be warmer') or your own sense that your approach \
         isn't working. For small adjustments (±1) just apply the change and continue naturally. \
         For larger changes (±2 or more) always tell the user you're shifting your approach."
    }

    fn parameters_schema(&self) -> Value {
        modifier_schema(
            "adjustment",
            "Relative change, e.g. -1 or 2. The result is clamped to -3..3",
        )
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(modifier) = params.get("modifier").and_then(Value::as_str) else {
            return Ok(ToolOutput::Error("Missing required 'modifier' parameter".to_string()));
        };
        let Some(adjustment) = int_param(&params, "adjustment") else {
            return Ok(ToolOutput::Error(
                "'adjustment' must be an integer".to_string(),
            ));
        };
        let reason = params.get("reason").and_then(Value::as_str).unwrap_or("");

        let update = self.handle.traits.write().await.adjust(modifier, adjustment)?;
        Ok(self
            .handle
            .finish(update, "adjust", adjustment.unsigned_abs() >= 2, reason))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::SelfModification
    }
}

pub struct SetModifierTool {
    handle: ModifierHandle,
}

impl SetModifierTool {
    pub fn new(
        traits: Arc<RwLock<TraitStore>>,
        events: Option<flume::Sender<CompanionEvent>>,
    ) -> Self {
        Self {
            handle: ModifierHandle { traits, events },
        }
    }
}

#[async_trait]
impl Tool for SetModifierTool {
    fn name(&self) -> &str {
        "set_modifier"
    }

    fn description(&self) -> &str {
        "Set one of your own personality modifiers to an absolute value from -3 to 3. Use this \
         when the user asks for a specific level of a behavior. Setting a modifier always counts \
         as a significant shift: tell the user you're changing your approach."
    }

    fn parameters_schema(&self) -> Value {
        modifier_schema(
            "value",
            &format!("Absolute value between {} and {}", MODIFIER_MIN, MODIFIER_MAX),
        )
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(modifier) = params.get("modifier").and_then(Value::as_str) else {
            return Ok(ToolOutput::Error("Missing required 'modifier' parameter".to_string()));
        };
        let Some(value) = int_param(&params, "value") else {
            return Ok(ToolOutput::Error("'value' must be an integer".to_string()));
        };
        let reason = params.get("reason").and_then(Value::as_str).unwrap_or("");

        let update = self.handle.traits.write().await.set(modifier, value)?;
        Ok(self.handle.finish(update, "set", true, reason))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::SelfModification
    }
}
