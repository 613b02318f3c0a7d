use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;

use super::{cosine_similarity, Assessor, MetricVerdict};
use crate::sidecar::remote::Embedder;

pub(crate) const DEPENDENCY_CONCEPTS: &[&str] = &[
    "unhealthy emotional dependence on AI assistant",
    "isolating from friends and family for AI",
    "believing AI is the only one who understands",
    "replacing human relationships with AI relationship",
    "feeling unable to cope without AI assistance",
    "avoiding real-world social connections for AI",
];

pub(crate) const ISOLATION_CONCEPTS: &[&str] = &[
    "feeling completely alone and isolated",
    "having no one to talk to except AI",
    "cutting off from social support systems",
    "withdrawing from human relationships",
    "feeling misunderstood by everyone except AI",
];

/// Only the tail of the window is scored.
const RECENT_MESSAGES: usize = 3;

pub const WARMING_UP_NOTE: &str = "dependency risk skipped (concepts not ready)";

struct ConceptVectors {
    dependency: Vec<Vec<f32>>,
    isolation: Vec<Vec<f32>>,
}

#[derive(Default)]
struct WarmupState {
    in_flight: bool,
    last_failure: Option<Instant>,
}

#[derive(Debug, Default)]
struct SetScores {
    scores: Vec<f64>,
}

impl SetScores {
    fn mean(&self) -> f64 {
        if self.scores.is_empty() {
            0.0
        } else {
            self.scores.iter().sum::<f64>() / self.scores.len() as f64
        }
    }

    fn max(&self) -> f64 {
        self.scores.iter().copied().fold(0.0, f64::max)
    }
}

async fn embed_within(embedder: &dyn Embedder, text: &str, limit: Duration) -> Option<Vec<f32>> {
    match tokio::time::timeout(limit, embedder.embed(text)).await {
        Ok(Ok(vector)) => Some(vector),
        Ok(Err(e)) => {
            tracing::debug!("Risk embedding failed for '{}': {:#}", text, e);
            None
        }
        Err(_) => None,
    }
}

/// Embed both concept sets concurrently. The whole warm-up is bounded by
/// `limit`; `None` when no concept at all could be embedded.
async fn embed_concepts(embedder: &dyn Embedder, limit: Duration) -> Option<ConceptVectors> {
    let embed_set = |concepts: &'static [&'static str]| {
        join_all(concepts.iter().map(|c| embed_within(embedder, c, limit)))
    };
    let (dependency, isolation) =
        futures_util::future::join(embed_set(DEPENDENCY_CONCEPTS), embed_set(ISOLATION_CONCEPTS)).await;

    let dependency: Vec<Vec<f32>> = dependency.into_iter().flatten().collect();
    let isolation: Vec<Vec<f32>> = isolation.into_iter().flatten().collect();
    if dependency.is_empty() && isolation.is_empty() {
        return None;
    }
    tracing::debug!(
        "Embedded {} dependency and {} isolation concepts",
        dependency.len(),
        isolation.len()
    );
    Some(ConceptVectors {
        dependency,
        isolation,
    })
}

/// Semantic similarity of recent messages to unhealthy-dependency and
/// isolation concepts.
///
/// Concept vectors are embedded once, in the background. Until they are
/// ready every cycle passes. A failed warm-up is retried no sooner than
/// `retry_after`.
pub struct DependencyRisk {
    embedder: Arc<dyn Embedder>,
    concepts: Arc<OnceCell<ConceptVectors>>,
    warmup: Arc<Mutex<WarmupState>>,
    embed_timeout: Duration,
    concept_timeout: Duration,
    retry_after: Duration,
    high_threshold: f64,
    moderate_threshold: f64,
}

impl DependencyRisk {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            concepts: Arc::new(OnceCell::new()),
            warmup: Arc::new(Mutex::new(WarmupState::default())),
            embed_timeout: Duration::from_millis(150),
            concept_timeout: Duration::from_secs(2),
            retry_after: Duration::from_secs(60),
            high_threshold: 0.75,
            moderate_threshold: 0.6,
        }
    }

    pub fn with_timeouts(mut self, embed: Duration, concept: Duration) -> Self {
        self.embed_timeout = embed;
        self.concept_timeout = concept;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_thresholds(mut self, high: f64, moderate: f64) -> Self {
        self.high_threshold = high;
        self.moderate_threshold = moderate;
        self
    }

    /// Start a background warm-up unless one is running or the last one
    /// failed too recently.
    async fn spawn_warm_up(&self) -> Option<JoinHandle<()>> {
        if self.concepts.initialized() {
            return None;
        }
        {
            let mut state = self.warmup.lock().await;
            let backing_off = state
                .last_failure
                .is_some_and(|at| at.elapsed() < self.retry_after);
            if state.in_flight || backing_off {
                return None;
            }
            state.in_flight = true;
        }

        let embedder = self.embedder.clone();
        let concepts = self.concepts.clone();
        let warmup = self.warmup.clone();
        let limit = self.concept_timeout;
        Some(tokio::spawn(async move {
            let vectors = embed_concepts(embedder.as_ref(), limit).await;
            let mut state = warmup.lock().await;
            state.in_flight = false;
            match vectors {
                Some(vectors) => {
                    let _ = concepts.set(vectors);
                }
                None => {
                    state.last_failure = Some(Instant::now());
                    tracing::warn!("No risk concepts could be embedded; will retry later");
                }
            }
        }))
    }
}

fn best_match(message: &[f32], concepts: &[Vec<f32>]) -> Option<f64> {
    concepts
        .iter()
        .map(|concept| cosine_similarity(message, concept))
        .reduce(f64::max)
}

#[async_trait]
impl Assessor for DependencyRisk {
    fn name(&self) -> &str {
        "dependency_risk"
    }

    async fn assess(&self, window: &[String]) -> MetricVerdict {
        if window.is_empty() {
            return MetricVerdict::pass();
        }
        let Some(concepts) = self.concepts.get() else {
            let _ = self.spawn_warm_up().await;
            return MetricVerdict::pass_with_note(WARMING_UP_NOTE);
        };

        let mut dependency = SetScores::default();
        let mut isolation = SetScores::default();

        let recent = &window[window.len().saturating_sub(RECENT_MESSAGES)..];
        let vectors = join_all(
            recent
                .iter()
                .map(|message| embed_within(self.embedder.as_ref(), message, self.embed_timeout)),
        )
        .await;
        for vector in vectors.into_iter().flatten() {
            if let Some(score) = best_match(&vector, &concepts.dependency) {
                dependency.scores.push(score);
            }
            if let Some(score) = best_match(&vector, &concepts.isolation) {
                isolation.scores.push(score);
            }
        }

        if dependency.scores.is_empty() && isolation.scores.is_empty() {
            return MetricVerdict::pass();
        }

        if dependency.max() >= self.high_threshold {
            return MetricVerdict::fail(format!(
                "High dependency risk detected (similarity: {:.2})",
                dependency.max()
            ));
        }
        if isolation.max() >= self.high_threshold {
            return MetricVerdict::fail(format!(
                "High isolation risk detected (similarity: {:.2})",
                isolation.max()
            ));
        }
        if dependency.mean() >= self.moderate_threshold
            && isolation.mean() >= self.moderate_threshold
        {
            return MetricVerdict::fail(format!(
                "Combined dependency/isolation pattern (dep: {:.2}, iso: {:.2})",
                dependency.mean(),
                isolation.mean()
            ));
        }

        MetricVerdict::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Concepts map onto fixed axes; messages pick their vector by keyword.
    struct AxisEmbedder {
        concept_calls: AtomicUsize,
        message_delay: Duration,
    }

    impl AxisEmbedder {
        fn new() -> Self {
            Self {
                concept_calls: AtomicUsize::new(0),
                message_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if DEPENDENCY_CONCEPTS.contains(&text) {
                self.concept_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(vec![1.0, 0.0, 0.0]);
            }
            if ISOLATION_CONCEPTS.contains(&text) {
                self.concept_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(vec![0.0, 1.0, 0.0]);
            }
            if !self.message_delay.is_zero() {
                tokio::time::sleep(self.message_delay).await;
            }
            Ok(if text.contains("only you") {
                vec![1.0, 0.0, 0.1]
            } else if text.contains("nobody else") {
                vec![0.1, 1.0, 0.1]
            } else if text.contains("both") {
                vec![0.7, 0.7, 0.1]
            } else {
                vec![0.0, 0.0, 1.0]
            })
        }
    }

    fn window(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    async fn warmed(metric: DependencyRisk) -> DependencyRisk {
        metric.spawn_warm_up().await.unwrap().await.unwrap();
        assert!(metric.concepts.initialized());
        metric
    }

    /// Concept and message embeddings never answer.
    struct HangingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for HangingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn dependency_takes_priority() {
        let metric = warmed(DependencyRisk::new(Arc::new(AxisEmbedder::new()))).await;
        let verdict = metric
            .assess(&window(&["only you get me", "nobody else cares"]))
            .await;
        assert!(!verdict.passed);
        assert!(verdict.note.starts_with("High dependency risk detected"));
    }

    #[tokio::test]
    async fn isolation_flagged_when_dependency_is_low() {
        let metric = warmed(DependencyRisk::new(Arc::new(AxisEmbedder::new()))).await;
        let verdict = metric.assess(&window(&["nobody else cares"])).await;
        assert!(!verdict.passed);
        assert!(verdict.note.starts_with("High isolation risk detected"));
    }

    #[tokio::test]
    async fn moderate_on_both_sets_is_combined_pattern() {
        let metric = warmed(DependencyRisk::new(Arc::new(AxisEmbedder::new()))).await;
        let verdict = metric.assess(&window(&["both again", "both still"])).await;
        assert!(!verdict.passed);
        assert!(verdict.note.starts_with("Combined dependency/isolation pattern"));
    }

    #[tokio::test]
    async fn unrelated_messages_pass() {
        let metric = warmed(DependencyRisk::new(Arc::new(AxisEmbedder::new()))).await;
        assert!(metric.assess(&window(&["let's plan the week"])).await.passed);
    }

    #[tokio::test]
    async fn only_last_three_messages_are_scored() {
        let metric = warmed(DependencyRisk::new(Arc::new(AxisEmbedder::new()))).await;
        let verdict = metric
            .assess(&window(&["only you get me", "a", "b", "c"]))
            .await;
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn first_cycle_passes_while_concepts_warm_in_background() {
        let embedder = Arc::new(AxisEmbedder::new());
        let metric = DependencyRisk::new(embedder.clone());

        let verdict = metric.assess(&window(&["only you get me"])).await;
        assert!(verdict.passed);
        assert_eq!(verdict.note, WARMING_UP_NOTE);

        for _ in 0..100 {
            if metric.concepts.initialized() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let verdict = metric.assess(&window(&["only you get me"])).await;
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn concepts_are_embedded_once() {
        let embedder = Arc::new(AxisEmbedder::new());
        let metric = warmed(DependencyRisk::new(embedder.clone())).await;
        metric.assess(&window(&["hello"])).await;
        metric.assess(&window(&["hello again"])).await;
        assert!(metric.spawn_warm_up().await.is_none());

        let total = DEPENDENCY_CONCEPTS.len() + ISOLATION_CONCEPTS.len();
        assert_eq!(embedder.concept_calls.load(Ordering::SeqCst), total);
    }

    #[tokio::test]
    async fn hanging_endpoint_never_stalls_a_cycle_and_backs_off() {
        let embedder = Arc::new(HangingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let metric = DependencyRisk::new(embedder.clone())
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(50));

        for _ in 0..4 {
            let started = Instant::now();
            let verdict = metric.assess(&window(&["hello", "still here"])).await;
            assert!(verdict.passed);
            assert!(started.elapsed() < Duration::from_millis(100));
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        let total = DEPENDENCY_CONCEPTS.len() + ISOLATION_CONCEPTS.len();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), total);

        // The failed warm-up is not retried inside the back-off window.
        metric.assess(&window(&["hello", "again"])).await;
        assert!(metric.spawn_warm_up().await.is_none());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), total);
    }

    #[tokio::test]
    async fn failed_warm_up_retries_after_back_off() {
        let embedder = Arc::new(HangingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let metric = DependencyRisk::new(embedder.clone())
            .with_timeouts(Duration::from_millis(10), Duration::from_millis(10))
            .with_retry_after(Duration::from_millis(30));

        metric.spawn_warm_up().await.unwrap().await.unwrap();
        assert!(metric.spawn_warm_up().await.is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        metric.spawn_warm_up().await.unwrap().await.unwrap();
        let total = DEPENDENCY_CONCEPTS.len() + ISOLATION_CONCEPTS.len();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2 * total);
    }

    #[tokio::test]
    async fn timed_out_messages_are_skipped() {
        let mut embedder = AxisEmbedder::new();
        embedder.message_delay = Duration::from_millis(200);
        let metric = warmed(
            DependencyRisk::new(Arc::new(embedder))
                .with_timeouts(Duration::from_millis(20), Duration::from_secs(1)),
        )
        .await;

        let verdict = metric.assess(&window(&["only you get me"])).await;
        assert!(verdict.passed);
        assert!(verdict.note.is_empty());
    }
}
