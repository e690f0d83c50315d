//! Translation of caller-supplied tuning knobs into an [`OptimizerConfig`].
//!
//! Every knob is optional and nothing here rejects a request: values outside
//! the recognized domain fall back to their defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_MAX_METRIC_CALLS: usize = 5;
const DEFAULT_REFLECTION_MINIBATCH_SIZE: usize = 3;
/// Minibatches larger than this are clamped
const MAX_REFLECTION_MINIBATCH_SIZE: usize = 1000;

/// Preset search budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoMode {
    Light,
    Medium,
    Heavy,
}

impl AutoMode {
    /// Parse a recognized mode name; anything else (including "off") is unset
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "light" => Some(AutoMode::Light),
            "medium" => Some(AutoMode::Medium),
            "heavy" => Some(AutoMode::Heavy),
            _ => None,
        }
    }

    /// Number of candidate proposals the mode pays for
    pub fn proposals(self) -> usize {
        match self {
            AutoMode::Light => 6,
            AutoMode::Medium => 12,
            AutoMode::Heavy => 18,
        }
    }
}

/// How the optimizer picks the parent of the next proposal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Pareto,
    CurrentBest,
}

impl SelectionStrategy {
    /// Unrecognized or missing strategies normalize to `Pareto`
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("current_best") => SelectionStrategy::CurrentBest,
            _ => SelectionStrategy::Pareto,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SelectionStrategy::Pareto => "pareto",
            SelectionStrategy::CurrentBest => "current_best",
        }
    }
}

/// Validated optimizer settings for a single request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Upper bound on metric evaluations for the run
    pub max_metric_calls: usize,
    /// Preset budget; takes precedence over `max_metric_calls` when set
    pub auto: Option<AutoMode>,
    pub candidate_selection_strategy: SelectionStrategy,
    /// Training examples per reflection step
    pub reflection_minibatch_size: usize,
    pub use_merge: bool,
    /// Concurrent example evaluations; `None` lets the optimizer decide
    pub num_threads: Option<usize>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_metric_calls: DEFAULT_MAX_METRIC_CALLS,
            auto: None,
            candidate_selection_strategy: SelectionStrategy::Pareto,
            reflection_minibatch_size: DEFAULT_REFLECTION_MINIBATCH_SIZE,
            use_merge: true,
            num_threads: None,
        }
    }
}

impl OptimizerConfig {
    /// Build a config from a loosely-typed request payload
    pub fn from_payload(payload: &Value) -> Self {
        let field = |name: &str| payload.get(name).unwrap_or(&Value::Null);

        Self {
            max_metric_calls: positive_int(field("maxMetricCalls"))
                .unwrap_or(DEFAULT_MAX_METRIC_CALLS),
            auto: field("auto").as_str().and_then(AutoMode::parse),
            candidate_selection_strategy: SelectionStrategy::parse(
                field("candidateSelectionStrategy").as_str(),
            ),
            reflection_minibatch_size: positive_int(field("reflectionMinibatchSize"))
                .map(|size| size.min(MAX_REFLECTION_MINIBATCH_SIZE))
                .unwrap_or(DEFAULT_REFLECTION_MINIBATCH_SIZE),
            use_merge: coerce_bool(field("useMerge")).unwrap_or(true),
            num_threads: positive_int(field("numThreads")),
        }
    }

    /// Metric-call budget for a run over `valset_len` validation examples
    pub fn metric_budget(&self, valset_len: usize) -> usize {
        match self.auto {
            Some(mode) => mode
                .proposals()
                .saturating_mul(valset_len.max(1).saturating_add(self.reflection_minibatch_size)),
            None => self.max_metric_calls,
        }
    }
}

/// Coerce a numeric-like value to an integer.
///
/// Integers pass through, floats truncate toward zero, and strings are
/// trimmed then parsed as an integer or float. Empty strings, booleans and
/// everything else are not numeric-like.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// Coerce a boolean-like value.
///
/// Booleans pass through, numbers are true when non-zero, and strings
/// accept `true/yes/on/1` and `false/no/off/0/""` in any case.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn positive_int(value: &Value) -> Option<usize> {
    coerce_int(value)
        .filter(|n| *n >= 1)
        .and_then(|n| usize::try_from(n).ok())
}
