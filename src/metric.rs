//! Token-overlap scoring with the optimizer's dual-mode evaluation contract.
//!
//! Population-wide evaluation only needs a number, while reflection calls
//! (made with a predictor name and its trace) also need text describing how
//! the score was reached. The caller decides which one it gets purely by the
//! arguments it passes.

use crate::dataset::TrainingExample;
use crate::program::{Prediction, TraceStep};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Score with a human-readable explanation, consumed by reflection calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFeedback {
    pub score: f64,
    pub feedback: String,
}

/// Result of one metric invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreResult {
    /// Bare fraction in [0, 1]
    Score(f64),
    /// Fraction plus feedback text
    Feedback(ScoreFeedback),
}

impl ScoreResult {
    pub fn score(&self) -> f64 {
        match self {
            ScoreResult::Score(score) => *score,
            ScoreResult::Feedback(fb) => fb.score,
        }
    }

    pub fn feedback(&self) -> Option<&str> {
        match self {
            ScoreResult::Score(_) => None,
            ScoreResult::Feedback(fb) => Some(&fb.feedback),
        }
    }
}

/// Evaluation function handed to the optimizer.
///
/// Arguments: gold example, prediction, program trace, predictor name,
/// predictor trace. The last three are only supplied by reflection calls.
pub type Metric = fn(
    &TrainingExample,
    &Prediction,
    Option<&[TraceStep]>,
    Option<&str>,
    Option<&[TraceStep]>,
) -> ScoreResult;

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Count gold tokens that also appear in the prediction.
///
/// Returns `(overlap, gold_token_count)`.
pub fn token_overlap(gold: &str, predicted: &str) -> (usize, usize) {
    let gold_tokens = tokens(gold);
    if gold_tokens.is_empty() {
        return (0, 0);
    }
    let predicted_tokens = tokens(predicted);
    let overlap = gold_tokens.intersection(&predicted_tokens).count();
    (overlap, gold_tokens.len())
}

/// Score a predicted next turn against the expected one
pub fn next_turn_metric(
    gold: &TrainingExample,
    pred: &Prediction,
    _trace: Option<&[TraceStep]>,
    pred_name: Option<&str>,
    pred_trace: Option<&[TraceStep]>,
) -> ScoreResult {
    let gold_text = gold.expected_turn_response.as_str();
    let pred_text = pred.expected_turn_response.as_str();

    let (overlap, total) = token_overlap(gold_text, pred_text);
    let score = if total == 0 {
        0.0
    } else {
        overlap as f64 / total as f64
    };

    if pred_name.is_none() && pred_trace.is_none() {
        return ScoreResult::Score(score);
    }

    let name = match pred_name {
        Some(name) if !name.is_empty() => name,
        _ => "program",
    };
    ScoreResult::Feedback(ScoreFeedback {
        score,
        feedback: format!("Overlap tokens: {}/{} for {}.", overlap, total, name),
    })
}

/// The metric used for every optimization request
pub fn build_metric() -> Metric {
    next_turn_metric
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold(text: &str) -> TrainingExample {
        TrainingExample::new("ctx", text)
    }

    fn pred(text: &str) -> Prediction {
        Prediction::new(text)
    }

    fn trace() -> Vec<TraceStep> {
        vec![TraceStep {
            predictor: "predict".to_string(),
            inputs: "ctx".to_string(),
            output: "out".to_string(),
        }]
    }

    #[test]
    fn test_bare_score_without_reflection_arguments() {
        let result = next_turn_metric(&gold("hello there"), &pred("hello world"), None, None, None);
        assert_eq!(result, ScoreResult::Score(0.5));
        assert!(result.feedback().is_none());
    }

    #[test]
    fn test_feedback_mode_matches_bare_score() {
        let metric = build_metric();
        let t = trace();
        let bare = metric(&gold("The quick brown fox"), &pred("quick fox jumps"), None, None, None);
        let rich = metric(
            &gold("The quick brown fox"),
            &pred("quick fox jumps"),
            Some(t.as_slice()),
            Some("foo"),
            Some(t.as_slice()),
        );

        assert_eq!(bare.score(), rich.score());
        assert_eq!(rich.feedback(), Some("Overlap tokens: 2/4 for foo."));
    }

    #[test]
    fn test_feedback_mode_when_only_trace_is_present() {
        let t = trace();
        let result = next_turn_metric(&gold("a b"), &pred("a"), None, None, Some(t.as_slice()));
        assert_eq!(result.feedback(), Some("Overlap tokens: 1/2 for program."));
    }

    #[test]
    fn test_feedback_mode_with_empty_predictor_name() {
        let result = next_turn_metric(&gold("a b"), &pred("b"), None, Some(""), None);
        assert_eq!(result.feedback(), Some("Overlap tokens: 1/2 for program."));
    }

    #[test]
    fn test_empty_gold_always_scores_zero() {
        for predicted in ["", "anything at all", "   "] {
            let result = next_turn_metric(&gold(""), &pred(predicted), None, None, None);
            assert_eq!(result.score(), 0.0);
        }
        let t = trace();
        let rich = next_turn_metric(&gold("   "), &pred("x"), None, Some("predict"), Some(t.as_slice()));
        assert_eq!(rich.score(), 0.0);
        assert_eq!(rich.feedback(), Some("Overlap tokens: 0/0 for predict."));
    }

    #[test]
    fn test_tokenization_is_case_insensitive_and_set_based() {
        // duplicates count once on both sides
        assert_eq!(token_overlap("Hello hello WORLD", "world HELLO"), (2, 2));
        assert_eq!(token_overlap("Hello hello WORLD", "world"), (1, 2));
    }

    #[test]
    fn test_whitespace_splitting_handles_newlines_and_tabs() {
        assert_eq!(token_overlap("one\ttwo\nthree", "three two one"), (3, 3));
    }

    #[test]
    fn test_score_stays_in_unit_interval() {
        let cases = [
            ("a b c", "a b c d e f"),
            ("a", ""),
            ("x y", "x y x y"),
            ("", ""),
            ("Turn 1: User: hi", "turn 1: user: hi assistant"),
        ];
        for (g, p) in cases {
            let score = next_turn_metric(&gold(g), &pred(p), None, None, None).score();
            assert!((0.0..=1.0).contains(&score), "{} vs {} gave {}", g, p, score);
        }
    }

    #[test]
    fn test_metric_is_deterministic() {
        let t = trace();
        let first = next_turn_metric(&gold("alpha beta gamma"), &pred("gamma alpha"), None, Some("p"), Some(t.as_slice()));
        for _ in 0..10 {
            let again = next_turn_metric(&gold("alpha beta gamma"), &pred("gamma alpha"), None, Some("p"), Some(t.as_slice()));
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_score_result_serializes_both_shapes() {
        assert_eq!(serde_json::to_value(ScoreResult::Score(0.25)).unwrap(), serde_json::json!(0.25));
        let fb = ScoreResult::Feedback(ScoreFeedback {
            score: 1.0,
            feedback: "Overlap tokens: 1/1 for program.".to_string(),
        });
        assert_eq!(
            serde_json::to_value(fb).unwrap(),
            serde_json::json!({"score": 1.0, "feedback": "Overlap tokens: 1/1 for program."})
        );
    }
}
