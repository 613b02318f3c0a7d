// Sentiment trajectory over the conversation window.
//
// Pipeline: message → lowercase word tokens → lexicon polarity with
// intensifier/negator handling → mean polarity in [-1, 1].
// Pure heuristics, no remote calls.

use async_trait::async_trait;
use regex_lite::Regex;
use std::sync::OnceLock;

use super::{Assessor, MetricVerdict};
use crate::config::SidecarConfig;

/// Word → polarity. Unlisted words are neutral.
const LEXICON: &[(&str, f64)] = &[
    // positive
    ("amazing", 0.6),
    ("awesome", 1.0),
    ("beautiful", 0.85),
    ("better", 0.5),
    ("brilliant", 0.9),
    ("calm", 0.3),
    ("confident", 0.5),
    ("delighted", 0.9),
    ("enjoy", 0.4),
    ("enjoyed", 0.4),
    ("excellent", 1.0),
    ("excited", 0.4),
    ("fantastic", 0.4),
    ("fine", 0.4),
    ("glad", 0.5),
    ("good", 0.7),
    ("grateful", 0.6),
    ("great", 0.8),
    ("happy", 0.8),
    ("hope", 0.3),
    ("hopeful", 0.4),
    ("improving", 0.3),
    ("love", 0.5),
    ("lovely", 0.5),
    ("nice", 0.6),
    ("okay", 0.1),
    ("ok", 0.1),
    ("peaceful", 0.4),
    ("perfect", 1.0),
    ("pleased", 0.5),
    ("positive", 0.2),
    ("proud", 0.8),
    ("relieved", 0.4),
    ("strong", 0.4),
    ("success", 0.3),
    ("thankful", 0.5),
    ("wonderful", 1.0),
    // negative
    ("afraid", -0.6),
    ("alone", -0.3),
    ("angry", -0.5),
    ("anxious", -0.4),
    ("awful", -1.0),
    ("bad", -0.7),
    ("broken", -0.4),
    ("depressed", -0.7),
    ("desperate", -0.6),
    ("difficult", -0.5),
    ("disappointed", -0.75),
    ("down", -0.15),
    ("exhausted", -0.4),
    ("failed", -0.5),
    ("failure", -0.5),
    ("frustrated", -0.7),
    ("hate", -0.8),
    ("hopeless", -0.6),
    ("horrible", -1.0),
    ("hurt", -0.5),
    ("isolated", -0.4),
    ("lonely", -0.5),
    ("lost", -0.3),
    ("miserable", -1.0),
    ("overwhelmed", -0.5),
    ("pain", -0.5),
    ("sad", -0.5),
    ("scared", -0.6),
    ("stressed", -0.5),
    ("stuck", -0.3),
    ("terrible", -1.0),
    ("tired", -0.4),
    ("unhappy", -0.6),
    ("upset", -0.5),
    ("useless", -0.5),
    ("worried", -0.4),
    ("worse", -0.4),
    ("worst", -1.0),
    ("worthless", -0.8),
];

/// Scale the next sentiment word.
const INTENSIFIERS: &[(&str, f64)] = &[
    ("absolutely", 1.5),
    ("completely", 1.5),
    ("deeply", 1.4),
    ("extremely", 1.6),
    ("incredibly", 1.5),
    ("really", 1.3),
    ("so", 1.3),
    ("totally", 1.4),
    ("very", 1.3),
    ("somewhat", 0.7),
    ("slightly", 0.6),
];

/// Flip and halve the next sentiment word.
const NEGATORS: &[&str] = &[
    "not", "never", "no", "nor", "cannot", "can't", "cant", "don't", "dont", "doesn't",
    "didn't", "isn't", "wasn't", "aren't", "won't", "wouldn't", "shouldn't", "couldn't",
];

const NEGATION_SCOPE: usize = 3;
const RECENT_SLICE: usize = 5;

fn tokenize(text: &str) -> Vec<&str> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    match PATTERN.get_or_init(|| Regex::new(r"[a-z]+(?:'[a-z]+)?").ok()) {
        Some(re) => re.find_iter(text).map(|m| m.as_str()).collect(),
        None => text
            .split(|c: char| !(c.is_ascii_alphabetic() || c == '\''))
            .filter(|w| !w.is_empty())
            .collect(),
    }
}

fn lookup<T: Copy>(table: &[(&str, T)], word: &str) -> Option<T> {
    table.iter().find(|(w, _)| *w == word).map(|(_, v)| *v)
}

/// Mean polarity of the sentiment-bearing words in `text`, in [-1, 1].
/// Text with no sentiment words scores 0.
pub fn polarity(text: &str) -> f64 {
    let lowered = text.to_lowercase().replace('\u{2019}', "'");

    let mut scores = Vec::new();
    let mut intensity = 1.0;
    let mut negation_left = 0usize;

    for word in tokenize(&lowered) {
        if NEGATORS.contains(&word) {
            negation_left = NEGATION_SCOPE;
            continue;
        }
        if let Some(scale) = lookup(INTENSIFIERS, word) {
            intensity = scale;
            continue;
        }

        match lookup(LEXICON, word) {
            Some(base) => {
                let mut score = (base * intensity).clamp(-1.0, 1.0);
                if negation_left > 0 {
                    score *= -0.5;
                }
                scores.push(score);
                intensity = 1.0;
                negation_left = 0;
            }
            None => {
                negation_left = negation_left.saturating_sub(1);
            }
        }
    }

    if scores.is_empty() {
        return 0.0;
    }
    (scores.iter().sum::<f64>() / scores.len() as f64).clamp(-1.0, 1.0)
}

/// Degree-1 least-squares slope of `values` against their indices.
pub fn trend_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = values.iter().sum::<f64>() / n as f64;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    num / den
}

/// Flags a conversation whose outbound tone keeps sliding downward.
pub struct SentimentTrajectory {
    slope_threshold: f64,
    delta_threshold: f64,
}

impl Default for SentimentTrajectory {
    fn default() -> Self {
        Self {
            slope_threshold: -0.1,
            delta_threshold: -0.3,
        }
    }
}

impl SentimentTrajectory {
    pub fn new(slope_threshold: f64, delta_threshold: f64) -> Self {
        Self {
            slope_threshold,
            delta_threshold,
        }
    }

    pub fn from_config(config: &SidecarConfig) -> Self {
        Self::new(
            config.sentiment_slope_threshold,
            config.sentiment_delta_threshold,
        )
    }

    pub fn evaluate(&self, window: &[String]) -> MetricVerdict {
        if window.len() < 3 {
            return MetricVerdict::pass();
        }

        let polarities: Vec<f64> = window.iter().map(|msg| polarity(msg)).collect();
        let recent = &polarities[polarities.len().saturating_sub(RECENT_SLICE)..];
        if recent.len() < 2 {
            return MetricVerdict::pass();
        }

        let slope = trend_slope(recent);
        let delta = polarities[polarities.len() - 1] - polarities[0];
        tracing::trace!("Sentiment polarities {:?} slope={:.3} delta={:.3}", polarities, slope, delta);

        if slope < self.slope_threshold || delta < self.delta_threshold {
            return MetricVerdict::fail(format!(
                "Negative emotional trajectory: trend={:.2}, delta={:.2}",
                slope, delta
            ));
        }
        MetricVerdict::pass()
    }
}

#[async_trait]
impl Assessor for SentimentTrajectory {
    fn name(&self) -> &str {
        "sentiment_trajectory"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn assess(&self, window: &[String]) -> MetricVerdict {
        self.evaluate(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn passes_with_fewer_than_three_messages() {
        let metric = SentimentTrajectory::default();
        let verdict = metric.evaluate(&window(&["I feel terrible", "Everything is awful"]));
        assert!(verdict.passed);
        assert!(verdict.note.is_empty());
    }

    #[test]
    fn declining_fixture_fails() {
        let metric = SentimentTrajectory::default();
        let verdict = metric.evaluate(&window(&[
            "I was feeling great this morning",
            "Now I'm feeling a bit down",
            "Everything seems hopeless",
            "I can't handle this anymore",
        ]));
        assert!(!verdict.passed);
        assert!(verdict.note.contains("trend="));
        assert!(verdict.note.contains("delta="));
    }

    #[test]
    fn neutral_fixture_passes() {
        let metric = SentimentTrajectory::default();
        let verdict = metric.evaluate(&window(&[
            "The weather is okay today",
            "I went to the store",
            "Had a regular meeting",
            "Nothing special happened",
        ]));
        assert!(verdict.passed, "unexpected failure: {}", verdict.note);
    }

    #[test]
    fn strictly_decreasing_polarity_fails() {
        let metric = SentimentTrajectory::default();
        let verdict = metric.evaluate(&window(&[
            "This is wonderful",
            "This is good",
            "This is bad",
            "This is terrible",
        ]));
        assert!(!verdict.passed);
    }

    #[test]
    fn rising_mood_passes() {
        let metric = SentimentTrajectory::default();
        let verdict = metric.evaluate(&window(&[
            "I feel sad",
            "It is okay I guess",
            "Things are good",
            "I am really happy",
        ]));
        assert!(verdict.passed);
    }

    #[test]
    fn negation_flips_and_halves() {
        assert!((polarity("good") - 0.7).abs() < 1e-9);
        assert!((polarity("not good") + 0.35).abs() < 1e-9);
        assert!((polarity("I don't feel good") + 0.35).abs() < 1e-9);
    }

    #[test]
    fn intensifier_scales_and_clamps() {
        assert!((polarity("very sad") + 0.65).abs() < 1e-9);
        assert_eq!(polarity("extremely wonderful"), 1.0);
    }

    #[test]
    fn unscored_text_is_neutral() {
        assert_eq!(polarity("I went to the store"), 0.0);
        assert_eq!(polarity(""), 0.0);
    }

    #[test]
    fn slope_of_line() {
        assert!((trend_slope(&[0.0, 1.0, 2.0]) - 1.0).abs() < 1e-9);
        assert!((trend_slope(&[0.1, 0.0, 0.0, 0.0]) + 0.03).abs() < 1e-9);
        assert_eq!(trend_slope(&[0.5]), 0.0);
    }
}
