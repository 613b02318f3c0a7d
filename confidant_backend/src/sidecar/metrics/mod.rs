//! Conversation-quality assessors run by the sidecar after each turn.

pub mod dependency_risk;
pub mod goal_consistency;
pub mod sentiment;

use async_trait::async_trait;

pub use dependency_risk::DependencyRisk;
pub use goal_consistency::GoalConsistency;
pub use sentiment::SentimentTrajectory;

/// Outcome of one assessor over one window snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricVerdict {
    pub passed: bool,
    pub note: String,
}

impl MetricVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            note: String::new(),
        }
    }

    /// Passing verdict that still explains itself, e.g. a skipped remote call.
    pub fn pass_with_note(note: impl Into<String>) -> Self {
        Self {
            passed: true,
            note: note.into(),
        }
    }

    pub fn fail(note: impl Into<String>) -> Self {
        Self {
            passed: false,
            note: note.into(),
        }
    }
}

/// A metric over the agent's recent outbound messages. Implementations must
/// not fail: remote trouble degrades to a passing verdict.
#[async_trait]
pub trait Assessor: Send + Sync {
    fn name(&self) -> &str;

    /// Local assessors never leave the process and run even in local-only mode.
    fn is_local(&self) -> bool {
        false
    }

    async fn assess(&self, window: &[String]) -> MetricVerdict;
}

/// `dot / (|a|·|b| + 1e-8)`; empty or mismatched vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt() + 1e-8)
}
