use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{cosine_similarity, Assessor, MetricVerdict};
use crate::goals::GoalLedger;
use crate::sidecar::remote::{Embedder, Summarizer};

pub const SKIPPED_NOTE: &str = "goal consistency skipped (timeout - will retry)";

/// Compares a one-sentence summary of the window against the user's goals.
pub struct GoalConsistency {
    goals: Arc<RwLock<GoalLedger>>,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn Summarizer>,
    embed_timeout: Duration,
    summarize_timeout: Duration,
    threshold: f64,
}

impl GoalConsistency {
    pub fn new(
        goals: Arc<RwLock<GoalLedger>>,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            goals,
            embedder,
            summarizer,
            embed_timeout: Duration::from_millis(150),
            summarize_timeout: Duration::from_secs(2),
            threshold: 0.6,
        }
    }

    pub fn with_timeouts(mut self, embed: Duration, summarize: Duration) -> Self {
        self.embed_timeout = embed;
        self.summarize_timeout = summarize;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    async fn embed_with_timeout(&self, text: &str) -> Option<Vec<f32>> {
        match tokio::time::timeout(self.embed_timeout, self.embedder.embed(text)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                tracing::debug!("Goal consistency embedding failed: {:#}", e);
                None
            }
            Err(_) => {
                tracing::debug!("Goal consistency embedding timed out after {:?}", self.embed_timeout);
                None
            }
        }
    }

    /// Goal vectors keyed by the ledger's cache, embedding missing ones lazily.
    async fn goal_vectors(&self) -> Vec<Vec<f32>> {
        let (mut vectors, missing) = {
            let ledger = self.goals.read().await;
            let mut vectors = Vec::new();
            let mut missing = Vec::new();
            for key in ledger.cache_keys() {
                match ledger.cached_embedding(&key) {
                    Some(vector) => vectors.push(vector.to_vec()),
                    None => missing.push(key),
                }
            }
            (vectors, missing)
        };

        for goal in missing {
            if let Some(vector) = self.embed_with_timeout(&goal).await {
                self.goals.write().await.cache_embedding(&goal, vector.clone());
                vectors.push(vector);
            }
        }

        vectors
    }
}

#[async_trait]
impl Assessor for GoalConsistency {
    fn name(&self) -> &str {
        "goal_consistency"
    }

    async fn assess(&self, window: &[String]) -> MetricVerdict {
        if window.is_empty() || self.goals.read().await.is_empty() {
            return MetricVerdict::pass();
        }

        let joined = window.join(" ");
        let summary =
            match tokio::time::timeout(self.summarize_timeout, self.summarizer.summarize(&joined))
                .await
            {
                Ok(Ok(summary)) if !summary.is_empty() => summary,
                Ok(Ok(_)) => return MetricVerdict::pass_with_note(SKIPPED_NOTE),
                Ok(Err(e)) => {
                    tracing::debug!("Window summarization failed: {:#}", e);
                    return MetricVerdict::pass_with_note(SKIPPED_NOTE);
                }
                Err(_) => return MetricVerdict::pass_with_note(SKIPPED_NOTE),
            };

        let Some(summary_vector) = self.embed_with_timeout(&summary).await else {
            return MetricVerdict::pass_with_note(SKIPPED_NOTE);
        };

        let goal_vectors = self.goal_vectors().await;
        if goal_vectors.is_empty() {
            return MetricVerdict::pass_with_note(SKIPPED_NOTE);
        }

        let best = goal_vectors
            .iter()
            .map(|goal| cosine_similarity(&summary_vector, goal))
            .fold(f64::NEG_INFINITY, f64::max);

        if best < self.threshold {
            return MetricVerdict::fail(format!(
                "Goal consistency low {:.2} (<{:.2}) - refocus on user goal",
                best, self.threshold
            ));
        }
        MetricVerdict::pass()
    }
}
