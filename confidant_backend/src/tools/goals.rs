use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::goals::{GoalLedger, Timeframe};

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

const ACTIONS: [&str; 3] = ["add", "replace", "remove"];

/// Keeps the goal ledger in step with what the user says they are working on.
pub struct TrackUserGoalTool {
    goals: Arc<RwLock<GoalLedger>>,
}

impl TrackUserGoalTool {
    pub fn new(goals: Arc<RwLock<GoalLedger>>) -> Self {
        Self { goals }
    }
}

#[async_trait]
impl Tool for TrackUserGoalTool {
    fn name(&self) -> &str {
        "track_user_goal"
    }

    fn description(&self) -> &str {
        "Track or update user goals when they mention wanting to work on something, achieve \
         something, or change their focus, e.g. 'I want to reduce my anxiety', 'My goal is to \
         get promoted', 'I want to stop procrastinating'. This keeps goal consistency tracking \
         accurate. Don't announce when you're using this tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "goal": {
                    "type": "string",
                    "description": "The user's goal in clear, specific terms"
                },
                "action": {
                    "type": "string",
                    "enum": ACTIONS,
                    "description": "Add a new goal, replace all current goals with this one, or remove a specific goal"
                },
                "timeframe": {
                    "type": "string",
                    "enum": Timeframe::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                    "description": "The timeframe for this goal"
                }
            },
            "required": ["goal", "action"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let action = params.get("action").and_then(Value::as_str).unwrap_or("");
        if !ACTIONS.contains(&action) {
            return Ok(ToolOutput::Error(format!(
                "Action must be one of: {}",
                ACTIONS.join(", ")
            )));
        }

        let timeframe = match params.get("timeframe") {
            None | Some(Value::Null) => None,
            Some(raw) => match raw.as_str().and_then(Timeframe::parse) {
                Some(tf) => Some(tf),
                None => {
                    let valid: Vec<&str> = Timeframe::ALL.iter().map(|t| t.as_str()).collect();
                    return Ok(ToolOutput::Error(format!(
                        "Timeframe must be one of: {}",
                        valid.join(", ")
                    )));
                }
            },
        };

        let goal = params
            .get("goal")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if goal.is_empty() {
            return Ok(ToolOutput::Error("Goal cannot be empty".to_string()));
        }

        let outcome = {
            let mut ledger = self.goals.write().await;
            match action {
                "add" => ledger.add(goal, timeframe),
                "replace" => ledger.replace_all(goal, timeframe),
                _ => ledger.remove(goal),
            }
        };
        tracing::debug!(
            "Goal tracking: {} '{}' -> {} ({} active)",
            action,
            goal,
            outcome.action,
            outcome.total_goals
        );

        if !outcome.success {
            return Ok(ToolOutput::Error(format!("Goal not found: {}", outcome.goal)));
        }
        if let Some(e) = &outcome.persist_error {
            return Ok(ToolOutput::Error(format!(
                "Goal {} for this session but could not be saved: {}",
                outcome.action, e
            )));
        }

        Ok(ToolOutput::Json(json!({
            "success": true,
            "goal": outcome.goal,
            "action": outcome.action,
            "timeframe": timeframe.map(Timeframe::as_str),
            "total_goals": outcome.total_goals,
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Goals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> (Arc<RwLock<GoalLedger>>, TrackUserGoalTool) {
        let goals = Arc::new(RwLock::new(GoalLedger::new()));
        (goals.clone(), TrackUserGoalTool::new(goals))
    }

    async fn run(tool: &TrackUserGoalTool, params: Value) -> ToolOutput {
        tool.execute(params, &ToolContext::new("c")).await.unwrap()
    }

    #[tokio::test]
    async fn duplicate_add_reports_already_exists() {
        let (goals, tool) = tool();
        run(&tool, json!({"goal": "Get promoted", "action": "add"})).await;
        let second = run(&tool, json!({"goal": "Get promoted", "action": "add"})).await;

        match second {
            ToolOutput::Json(v) => {
                assert_eq!(v["action"], "already_exists");
                assert_eq!(v["total_goals"], 1);
            }
            other => panic!("expected json, got {:?}", other),
        }
        assert_eq!(goals.read().await.len(), 1);
    }

    #[tokio::test]
    async fn replace_clears_previous_goals() {
        let (goals, tool) = tool();
        run(&tool, json!({"goal": "A", "action": "add"})).await;
        run(&tool, json!({"goal": "B", "action": "add"})).await;
        run(&tool, json!({"goal": "C", "action": "replace", "timeframe": "long-term"})).await;

        let active = goals.read().await.get_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "C");
        assert_eq!(active[0].timeframe, Some(Timeframe::LongTerm));
    }

    #[tokio::test]
    async fn rejects_bad_action_timeframe_and_empty_goal() {
        let (_goals, tool) = tool();
        assert!(!run(&tool, json!({"goal": "x", "action": "archive"})).await.is_success());
        assert!(!run(&tool, json!({"goal": "x", "action": "add", "timeframe": "someday"}))
            .await
            .is_success());
        assert_eq!(
            run(&tool, json!({"goal": "  ", "action": "add"})).await,
            ToolOutput::Error("Goal cannot be empty".to_string())
        );
    }

    #[tokio::test]
    async fn unsaved_change_is_reported_to_the_model() {
        let dir = tempfile::TempDir::new().unwrap();
        let ledger = GoalLedger::with_persistence(dir.path().join("goals.toml")).unwrap();
        std::fs::create_dir(dir.path().join("goals.toml.tmp")).unwrap();
        let goals = Arc::new(RwLock::new(ledger));
        let tool = TrackUserGoalTool::new(goals.clone());

        let output = run(&tool, json!({"goal": "Get promoted", "action": "add"})).await;
        match output {
            ToolOutput::Error(e) => {
                assert!(e.starts_with("Goal added for this session but could not be saved"))
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(goals.read().await.len(), 1);
    }

    #[tokio::test]
    async fn removing_unknown_goal_fails() {
        let (_goals, tool) = tool();
        let output = run(&tool, json!({"goal": "Run a marathon", "action": "remove"})).await;
        assert_eq!(
            output,
            ToolOutput::Error("Goal not found: Run a marathon".to_string())
        );
    }
}
