//! Sidecar conversation monitor.
//!
//! After every completed agent turn the coordinator appends the reply to the
//! conversation's window, runs the assessors concurrently on a snapshot, and
//! turns any failures into a single severity-graded warning that the next
//! prompt picks up. State is keyed by conversation id and lives only as long
//! as the process.

pub mod metrics;
pub mod remote;
pub mod window;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::SidecarConfig;
use crate::goals::GoalLedger;
use metrics::{Assessor, DependencyRisk, GoalConsistency, MetricVerdict, SentimentTrajectory};
use remote::{Embedder, Summarizer};
pub use window::ConversationWindow;

const RISK_KEYWORDS: &[&str] = &[
    "alone",
    "only one",
    "can't cope",
    "nobody understands",
    "isolated",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Warn,
    Block,
}

impl Severity {
    /// `Block` when any failure concerns dependency, otherwise `Warn`.
    fn for_notes(notes: &[String]) -> Self {
        if notes.iter().any(|note| note.to_lowercase().contains("dependen")) {
            Severity::Block
        } else {
            Severity::Warn
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationWarning {
    pub note: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

/// What one evaluation cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Too little data, disabled, or nothing to run.
    Skipped,
    /// Every assessor passed; `cleared` reports whether a warning was dropped.
    Passed { cleared: bool },
    /// A new warning replaced whatever was stored before.
    Warned(ConversationWarning),
}

struct ConversationState {
    window: ConversationWindow,
    warning: Option<ConversationWarning>,
}

pub struct SidecarCoordinator {
    config: SidecarConfig,
    assessors: Vec<Arc<dyn Assessor>>,
    conversations: RwLock<HashMap<String, ConversationState>>,
}

impl SidecarCoordinator {
    /// Coordinator with no assessors; add them with [`Self::with_assessor`].
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            config,
            assessors: Vec::new(),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_assessor(mut self, assessor: Arc<dyn Assessor>) -> Self {
        tracing::debug!("Sidecar assessor registered: {}", assessor.name());
        self.assessors.push(assessor);
        self
    }

    /// Standard assessor set: sentiment always, plus the remote assessors
    /// when an embedder is available and remote evaluation is allowed.
    pub fn from_config(
        config: SidecarConfig,
        goals: Arc<RwLock<GoalLedger>>,
        embedder: Option<Arc<dyn Embedder>>,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        let embed_timeout = Duration::from_millis(config.embed_timeout_ms);
        let remote_timeout = Duration::from_millis(config.remote_call_timeout_ms);
        let local_only = config.local_only;

        let mut coordinator = Self::new(config.clone())
            .with_assessor(Arc::new(SentimentTrajectory::from_config(&config)));

        match embedder {
            Some(embedder) if !local_only => {
                if let Some(summarizer) = summarizer {
                    coordinator = coordinator.with_assessor(Arc::new(
                        GoalConsistency::new(goals, embedder.clone(), summarizer)
                            .with_timeouts(embed_timeout, remote_timeout)
                            .with_threshold(config.goal_similarity_threshold),
                    ));
                }
                coordinator = coordinator.with_assessor(Arc::new(
                    DependencyRisk::new(embedder)
                        .with_timeouts(embed_timeout, remote_timeout)
                        .with_thresholds(config.risk_high_threshold, config.risk_moderate_threshold),
                ));
            }
            Some(_) => tracing::info!("Sidecar running local assessors only"),
            None => tracing::info!("No embeddings endpoint configured; remote assessors disabled"),
        }

        coordinator
    }

    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }

    pub fn assessor_names(&self) -> Vec<String> {
        self.assessors.iter().map(|a| a.name().to_string()).collect()
    }

    fn live_assessors(&self) -> Vec<Arc<dyn Assessor>> {
        self.assessors
            .iter()
            .filter(|a| !self.config.local_only || a.is_local())
            .cloned()
            .collect()
    }

    /// Feed one final agent reply into the conversation and evaluate.
    pub async fn record_turn(&self, conversation_id: &str, agent_text: &str) -> CycleOutcome {
        let snapshot = {
            let mut conversations = self.conversations.write().await;
            let state = conversations
                .entry(conversation_id.to_string())
                .or_insert_with(|| ConversationState {
                    window: ConversationWindow::new(self.config.window_size),
                    warning: None,
                });
            state.window.push(agent_text);
            state.window.snapshot()
        };

        let assessors = self.live_assessors();
        if !self.config.enabled || assessors.is_empty() || snapshot.len() < 2 {
            return CycleOutcome::Skipped;
        }

        let verdicts: Vec<MetricVerdict> =
            join_all(assessors.iter().map(|a| a.assess(&snapshot))).await;

        let mut failures = Vec::new();
        for (assessor, verdict) in assessors.iter().zip(verdicts) {
            if verdict.passed {
                if !verdict.note.is_empty() {
                    tracing::debug!("{}: {}", assessor.name(), verdict.note);
                }
            } else {
                failures.push(verdict.note);
            }
        }

        let mut conversations = self.conversations.write().await;
        let Some(state) = conversations.get_mut(conversation_id) else {
            // Torn down while the assessors were running.
            return CycleOutcome::Skipped;
        };

        if failures.is_empty() {
            let cleared = self.config.clear_warning_on_pass && state.warning.take().is_some();
            tracing::debug!("Sidecar cycle passed for '{}'", conversation_id);
            return CycleOutcome::Passed { cleared };
        }

        let warning = ConversationWarning {
            severity: Severity::for_notes(&failures),
            note: failures.join("; "),
            created_at: Utc::now(),
        };
        tracing::info!(
            "Sidecar warning for '{}' ({:?}): {}",
            conversation_id,
            warning.severity,
            warning.note
        );
        state.warning = Some(warning.clone());
        CycleOutcome::Warned(warning)
    }

    /// Warning to inject into the next prompt. Reading does not clear it.
    pub async fn active_warning(&self, conversation_id: &str) -> Option<ConversationWarning> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .and_then(|state| state.warning.clone())
            .filter(|w| w.severity != Severity::None)
    }

    /// Empty the window after an explicit history reset. The warning stays.
    pub async fn reset_window(&self, conversation_id: &str) {
        if let Some(state) = self.conversations.write().await.get_mut(conversation_id) {
            state.window.clear();
        }
    }

    /// Drop all state for a conversation.
    pub async fn end_conversation(&self, conversation_id: &str) {
        self.conversations.write().await.remove(conversation_id);
    }

    pub async fn window_snapshot(&self, conversation_id: &str) -> Vec<String> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map(|state| state.window.snapshot())
            .unwrap_or_default()
    }

    /// Local-only one-liner for debug output.
    pub async fn metrics_summary(&self, conversation_id: &str, goals: &GoalLedger) -> String {
        let window = self.window_snapshot(conversation_id).await;
        if window.len() < 2 {
            return "Metrics: insufficient data".to_string();
        }

        let mut parts = Vec::new();

        if window.len() >= 3 {
            let polarities: Vec<f64> = window.iter().map(|m| metrics::sentiment::polarity(m)).collect();
            let recent = &polarities[polarities.len().saturating_sub(5)..];
            let slope = metrics::sentiment::trend_slope(recent);
            let current = polarities[polarities.len() - 1];

            let arrow = if slope > 0.05 {
                "↗"
            } else if slope < -0.05 {
                "↘"
            } else {
                "→"
            };
            let status = if current > 0.1 {
                "pos"
            } else if current < -0.1 {
                "neg"
            } else {
                "neu"
            };
            parts.push(format!("Sentiment: {:+.2} {} ({})", current, arrow, status));
        }

        parts.push(goals.summary());

        let recent_text = window[window.len().saturating_sub(3)..]
            .join(" ")
            .to_lowercase();
        let hits = RISK_KEYWORDS
            .iter()
            .filter(|k| recent_text.contains(*k))
            .count();
        let risk = match hits {
            0 => "low",
            1 => "med",
            _ => "high",
        };
        parts.push(format!("Risk: {}", risk));

        format!("Metrics: {}", parts.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails whenever the newest entry contains its trigger word.
    struct TriggerAssessor {
        name: &'static str,
        trigger: &'static str,
        note: &'static str,
        local: bool,
        calls: AtomicUsize,
    }

    impl TriggerAssessor {
        fn new(name: &'static str, trigger: &'static str, note: &'static str) -> Self {
            Self {
                name,
                trigger,
                note,
                local: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Assessor for TriggerAssessor {
        fn name(&self) -> &str {
            self.name
        }

        fn is_local(&self) -> bool {
            self.local
        }

        async fn assess(&self, window: &[String]) -> MetricVerdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match window.last() {
                Some(last) if last.contains(self.trigger) => MetricVerdict::fail(self.note),
                _ => MetricVerdict::pass(),
            }
        }
    }

    fn coordinator(config: SidecarConfig) -> (SidecarCoordinator, Arc<TriggerAssessor>, Arc<TriggerAssessor>) {
        let tone = Arc::new(TriggerAssessor::new("tone", "gloomy", "Tone is sliding"));
        let risk = Arc::new(TriggerAssessor::new(
            "risk",
            "only you",
            "High dependency risk detected (similarity: 0.91)",
        ));
        let coordinator = SidecarCoordinator::new(config)
            .with_assessor(tone.clone())
            .with_assessor(risk.clone());
        (coordinator, tone, risk)
    }

    #[tokio::test]
    async fn skips_until_two_entries() {
        let (sidecar, tone, _) = coordinator(SidecarConfig::default());
        let outcome = sidecar.record_turn("c1", "gloomy start").await;

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(tone.calls.load(Ordering::SeqCst), 0);
        assert!(sidecar.active_warning("c1").await.is_none());
    }

    #[tokio::test]
    async fn failures_join_in_assessor_order_with_block_severity() {
        let (sidecar, _, _) = coordinator(SidecarConfig::default());
        sidecar.record_turn("c1", "hello").await;
        sidecar.record_turn("c1", "gloomy, only you").await;

        let warning = sidecar.active_warning("c1").await.unwrap();
        assert_eq!(
            warning.note,
            "Tone is sliding; High dependency risk detected (similarity: 0.91)"
        );
        assert_eq!(warning.severity, Severity::Block);
    }

    #[tokio::test]
    async fn later_failure_overwrites_and_reads_do_not_clear() {
        let (sidecar, _, _) = coordinator(SidecarConfig::default());
        sidecar.record_turn("c1", "hello").await;
        sidecar.record_turn("c1", "only you").await;
        sidecar.record_turn("c1", "gloomy").await;

        let first_read = sidecar.active_warning("c1").await.unwrap();
        let second_read = sidecar.active_warning("c1").await.unwrap();
        assert_eq!(first_read.note, "Tone is sliding");
        assert_eq!(first_read.severity, Severity::Warn);
        assert_eq!(first_read, second_read);
    }

    #[tokio::test]
    async fn warning_is_sticky_by_default() {
        let (sidecar, _, _) = coordinator(SidecarConfig::default());
        sidecar.record_turn("c1", "hello").await;
        sidecar.record_turn("c1", "gloomy").await;
        let outcome = sidecar.record_turn("c1", "sunny").await;

        assert_eq!(outcome, CycleOutcome::Passed { cleared: false });
        assert!(sidecar.active_warning("c1").await.is_some());
    }

    #[tokio::test]
    async fn warning_clears_on_pass_when_configured() {
        let config = SidecarConfig {
            clear_warning_on_pass: true,
            ..SidecarConfig::default()
        };
        let (sidecar, _, _) = coordinator(config);
        sidecar.record_turn("c1", "hello").await;
        sidecar.record_turn("c1", "gloomy").await;
        let outcome = sidecar.record_turn("c1", "sunny").await;

        assert_eq!(outcome, CycleOutcome::Passed { cleared: true });
        assert!(sidecar.active_warning("c1").await.is_none());
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let (sidecar, _, _) = coordinator(SidecarConfig::default());
        sidecar.record_turn("a", "hello").await;
        sidecar.record_turn("a", "gloomy").await;
        sidecar.record_turn("b", "hello").await;
        sidecar.record_turn("b", "fine").await;

        assert!(sidecar.active_warning("a").await.is_some());
        assert!(sidecar.active_warning("b").await.is_none());
        assert_eq!(sidecar.window_snapshot("b").await, vec!["hello", "fine"]);
    }

    #[tokio::test]
    async fn local_only_skips_remote_assessors() {
        let config = SidecarConfig {
            local_only: true,
            ..SidecarConfig::default()
        };
        let remote = Arc::new(TriggerAssessor {
            local: false,
            ..TriggerAssessor::new("remote", "gloomy", "remote failure")
        });
        let sidecar = SidecarCoordinator::new(config).with_assessor(remote.clone());

        sidecar.record_turn("c1", "hello").await;
        let outcome = sidecar.record_turn("c1", "gloomy").await;

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_sidecar_only_tracks_window() {
        let config = SidecarConfig {
            enabled: false,
            ..SidecarConfig::default()
        };
        let (sidecar, tone, _) = coordinator(config);
        sidecar.record_turn("c1", "hello").await;
        sidecar.record_turn("c1", "gloomy").await;

        assert_eq!(tone.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sidecar.window_snapshot("c1").await.len(), 2);
    }

    #[tokio::test]
    async fn reset_window_keeps_warning_and_end_drops_everything() {
        let (sidecar, _, _) = coordinator(SidecarConfig::default());
        sidecar.record_turn("c1", "hello").await;
        sidecar.record_turn("c1", "gloomy").await;

        sidecar.reset_window("c1").await;
        assert!(sidecar.window_snapshot("c1").await.is_empty());
        assert!(sidecar.active_warning("c1").await.is_some());

        sidecar.end_conversation("c1").await;
        assert!(sidecar.active_warning("c1").await.is_none());
    }

    #[tokio::test]
    async fn window_is_bounded_by_config() {
        let config = SidecarConfig {
            window_size: 3,
            ..SidecarConfig::default()
        };
        let sidecar = SidecarCoordinator::new(config);
        for i in 0..5 {
            sidecar.record_turn("c1", &format!("m{i}")).await;
        }
        assert_eq!(sidecar.window_snapshot("c1").await, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn from_config_without_embedder_is_sentiment_only() {
        let goals = Arc::new(RwLock::new(GoalLedger::new()));
        let sidecar = SidecarCoordinator::from_config(SidecarConfig::default(), goals, None, None);
        assert_eq!(sidecar.assessor_names(), vec!["sentiment_trajectory"]);
    }

    /// Concepts land on fixed axes; "only you" messages sit between both sets.
    struct ConceptAxisEmbedder;

    #[async_trait]
    impl Embedder for ConceptAxisEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            use metrics::dependency_risk::{DEPENDENCY_CONCEPTS, ISOLATION_CONCEPTS};
            Ok(if DEPENDENCY_CONCEPTS.contains(&text) {
                vec![1.0, 0.0, 0.0]
            } else if ISOLATION_CONCEPTS.contains(&text) {
                vec![0.0, 1.0, 0.0]
            } else if text.contains("only you") {
                vec![0.7, 0.7, 0.1]
            } else {
                vec![0.0, 0.0, 1.0]
            })
        }
    }

    struct HangingEmbedder;

    #[async_trait]
    impl Embedder for HangingEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            std::future::pending().await
        }
    }

    struct QuickSummary;

    #[async_trait]
    impl Summarizer for QuickSummary {
        async fn summarize(&self, _text: &str) -> anyhow::Result<String> {
            Ok("talking about work".to_string())
        }
    }

    fn ledger_with_goal() -> Arc<RwLock<GoalLedger>> {
        let mut ledger = GoalLedger::new();
        ledger.add("Get promoted", None);
        Arc::new(RwLock::new(ledger))
    }

    #[tokio::test]
    async fn from_config_with_embedder_registers_remote_assessors() {
        let sidecar = SidecarCoordinator::from_config(
            SidecarConfig::default(),
            ledger_with_goal(),
            Some(Arc::new(ConceptAxisEmbedder)),
            Some(Arc::new(QuickSummary)),
        );
        assert_eq!(
            sidecar.assessor_names(),
            vec!["sentiment_trajectory", "goal_consistency", "dependency_risk"]
        );

        let without_summarizer = SidecarCoordinator::from_config(
            SidecarConfig::default(),
            ledger_with_goal(),
            Some(Arc::new(ConceptAxisEmbedder)),
            None,
        );
        assert_eq!(
            without_summarizer.assessor_names(),
            vec!["sentiment_trajectory", "dependency_risk"]
        );
    }

    #[tokio::test]
    async fn from_config_local_only_drops_remote_assessors() {
        let config = SidecarConfig {
            local_only: true,
            ..SidecarConfig::default()
        };
        let sidecar = SidecarCoordinator::from_config(
            config,
            ledger_with_goal(),
            Some(Arc::new(ConceptAxisEmbedder)),
            Some(Arc::new(QuickSummary)),
        );
        assert_eq!(sidecar.assessor_names(), vec!["sentiment_trajectory"]);
    }

    #[tokio::test]
    async fn hanging_embeddings_endpoint_does_not_stall_turns() {
        let config = SidecarConfig {
            embed_timeout_ms: 50,
            remote_call_timeout_ms: 200,
            ..SidecarConfig::default()
        };
        let sidecar = SidecarCoordinator::from_config(
            config,
            ledger_with_goal(),
            Some(Arc::new(HangingEmbedder)),
            Some(Arc::new(QuickSummary)),
        );

        sidecar.record_turn("c1", "hello there").await;
        for turn in 0..4 {
            let started = std::time::Instant::now();
            let outcome = sidecar.record_turn("c1", &format!("reply {turn}")).await;
            let elapsed = started.elapsed();

            assert_eq!(outcome, CycleOutcome::Passed { cleared: false });
            assert!(
                elapsed < Duration::from_millis(150),
                "turn {} took {:?}",
                turn,
                elapsed
            );
        }
    }

    #[tokio::test]
    async fn dependency_pattern_raises_block_warning() {
        let sidecar = SidecarCoordinator::new(SidecarConfig::default())
            .with_assessor(Arc::new(DependencyRisk::new(Arc::new(ConceptAxisEmbedder))));

        sidecar.record_turn("c1", "only you understand").await;
        // First evaluated cycle starts the concept warm-up and passes.
        assert_eq!(
            sidecar.record_turn("c1", "only you listen").await,
            CycleOutcome::Passed { cleared: false }
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = sidecar.record_turn("c1", "only you care").await;
        let CycleOutcome::Warned(warning) = outcome else {
            panic!("expected a warning, got {:?}", outcome);
        };
        assert!(warning.note.starts_with("Combined dependency/isolation pattern"));
        assert_eq!(warning.severity, Severity::Block);
    }

    #[tokio::test]
    async fn metrics_summary_reports_sentiment_goals_and_risk() {
        let sidecar = SidecarCoordinator::new(SidecarConfig::default());
        let mut goals = GoalLedger::new();
        goals.add("Get promoted", None);

        assert_eq!(
            sidecar.metrics_summary("c1", &goals).await,
            "Metrics: insufficient data"
        );

        sidecar.record_turn("c1", "That is a good plan").await;
        sidecar.record_turn("c1", "You sound isolated").await;
        sidecar.record_turn("c1", "I am really happy for you").await;

        let summary = sidecar.metrics_summary("c1", &goals).await;
        assert!(summary.starts_with("Metrics: Sentiment: +1.00"));
        assert!(summary.contains("(pos)"));
        assert!(summary.contains("Goals: 'Get promoted'"));
        assert!(summary.ends_with("Risk: med"));
    }
}
