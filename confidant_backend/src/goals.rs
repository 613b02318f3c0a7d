//! Active user goals for the session, plus the embedding cache the
//! goal-consistency assessor reads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::storage::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Timeframe {
    ShortTerm,
    MediumTerm,
    LongTerm,
    Ongoing,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Timeframe::ShortTerm,
        Timeframe::MediumTerm,
        Timeframe::LongTerm,
        Timeframe::Ongoing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::ShortTerm => "short-term",
            Timeframe::MediumTerm => "medium-term",
            Timeframe::LongTerm => "long-term",
            Timeframe::Ongoing => "ongoing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalAction {
    Added,
    AlreadyExists,
    Replaced,
    Removed,
    NotFound,
}

impl fmt::Display for GoalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GoalAction::Added => "added",
            GoalAction::AlreadyExists => "already_exists",
            GoalAction::Replaced => "replaced",
            GoalAction::Removed => "removed",
            GoalAction::NotFound => "not_found",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalOutcome {
    pub success: bool,
    pub action: GoalAction,
    pub goal: String,
    pub total_goals: usize,
    /// Set when the change applies to this session but `goals.toml` could not be written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GoalFile {
    #[serde(default)]
    goals: Vec<Goal>,
}

#[derive(Debug, Default)]
pub struct GoalLedger {
    goals: Vec<Goal>,
    cache: HashMap<String, Option<Vec<f32>>>,
    store_path: Option<PathBuf>,
}

impl GoalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger backed by `goals.toml`; existing goals are loaded immediately.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut ledger = Self {
            store_path: Some(path.clone()),
            ..Self::default()
        };

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read goals from {:?}", path))?;
            let file: GoalFile = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse goals in {:?}", path))?;
            for goal in file.goals {
                if !ledger.contains(&goal.text) {
                    ledger.cache.insert(goal.text.clone(), None);
                    ledger.goals.push(goal);
                }
            }
            tracing::info!("Loaded {} goal(s) from {:?}", ledger.goals.len(), path);
        }

        Ok(ledger)
    }

    fn contains(&self, text: &str) -> bool {
        self.goals.iter().any(|g| g.text == text)
    }

    pub fn add(&mut self, goal: &str, timeframe: Option<Timeframe>) -> GoalOutcome {
        let text = goal.trim().to_string();
        if self.contains(&text) {
            return self.outcome(true, GoalAction::AlreadyExists, text);
        }

        self.cache.entry(text.clone()).or_insert(None);
        self.goals.push(Goal {
            text: text.clone(),
            timeframe,
        });
        tracing::debug!("Added goal '{}' (timeframe: {:?})", text, timeframe);
        self.persisted(GoalAction::Added, text)
    }

    pub fn replace_all(&mut self, goal: &str, timeframe: Option<Timeframe>) -> GoalOutcome {
        let text = goal.trim().to_string();
        self.goals.clear();
        self.cache.clear();
        self.cache.insert(text.clone(), None);
        self.goals.push(Goal {
            text: text.clone(),
            timeframe,
        });
        tracing::debug!("Replaced all goals with '{}'", text);
        self.persisted(GoalAction::Replaced, text)
    }

    pub fn remove(&mut self, goal: &str) -> GoalOutcome {
        let text = goal.trim().to_string();
        let before = self.goals.len();
        self.goals.retain(|g| g.text != text);
        if self.goals.len() == before {
            return self.outcome(false, GoalAction::NotFound, text);
        }

        self.cache.remove(&text);
        self.persisted(GoalAction::Removed, text)
    }

    /// Copy of the active goals in insertion order.
    pub fn get_active(&self) -> Vec<Goal> {
        self.goals.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    /// Goal texts currently tracked by the embedding cache.
    pub fn cache_keys(&self) -> Vec<String> {
        self.goals
            .iter()
            .filter(|g| self.cache.contains_key(&g.text))
            .map(|g| g.text.clone())
            .collect()
    }

    pub fn cached_embedding(&self, goal: &str) -> Option<&[f32]> {
        self.cache.get(goal).and_then(|v| v.as_deref())
    }

    /// Store an embedding; ignored if the goal was removed in the meantime.
    pub fn cache_embedding(&mut self, goal: &str, embedding: Vec<f32>) {
        if let Some(slot) = self.cache.get_mut(goal) {
            *slot = Some(embedding);
        }
    }

    /// One-line summary for debug output.
    pub fn summary(&self) -> String {
        let Some(first) = self.goals.first() else {
            return "Goals: none set".to_string();
        };

        let preview = if first.text.chars().count() > 30 {
            format!("{}...", first.text.chars().take(30).collect::<String>())
        } else {
            first.text.clone()
        };

        match self.goals.len() {
            1 => format!("Goals: '{}'", preview),
            n => format!("Goals: '{}' +{} more", preview, n - 1),
        }
    }

    fn outcome(&self, success: bool, action: GoalAction, goal: String) -> GoalOutcome {
        GoalOutcome {
            success,
            action,
            goal,
            total_goals: self.goals.len(),
            persist_error: None,
        }
    }

    /// Successful outcome for a mutation, after writing the ledger out.
    fn persisted(&self, action: GoalAction, goal: String) -> GoalOutcome {
        let mut outcome = self.outcome(true, action, goal);
        if let Err(e) = self.persist() {
            tracing::warn!("Failed to persist goals: {:#}", e);
            outcome.persist_error = Some(format!("{:#}", e));
        }
        outcome
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };

        let file = GoalFile {
            goals: self.goals.clone(),
        };
        let contents = toml::to_string_pretty(&file).context("Failed to serialize goals")?;
        write_atomic(path, &contents).with_context(|| format!("Failed to write goals to {:?}", path))
    }
}
