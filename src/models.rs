use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Signature state as reported by an optimizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureState {
    pub instructions: Option<String>,
    pub docstring: Option<String>,
}

/// A predictor (or candidate program) as reported by an optimizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorState {
    pub instruction: Option<String>,
    pub instructions: Option<String>,
    pub signature: Option<SignatureState>,
}

impl PredictorState {
    /// Predictor whose signature carries `instructions`
    pub fn with_signature_instructions(instructions: impl Into<String>) -> Self {
        Self {
            signature: Some(SignatureState {
                instructions: Some(instructions.into()),
                docstring: None,
            }),
            ..Self::default()
        }
    }
}

/// Per-run bookkeeping reported alongside the compiled program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailedResults {
    /// Every candidate considered, in discovery order
    pub candidates: Vec<PredictorState>,
    /// Parent index of each candidate (`None` for the seed)
    pub parents: Vec<Option<usize>>,
    /// Mean validation score of each candidate
    pub val_aggregate_scores: Option<Vec<f64>>,
    /// Per-example validation scores of each candidate
    pub val_subscores: Vec<Vec<f64>>,
    /// Index of the best candidate; may be absent or out of range
    pub best_idx: Option<i64>,
    pub best_candidate: Option<PredictorState>,
    pub total_metric_calls: Option<usize>,
}

/// Optimizer output.
///
/// Where the optimized instruction lives depends on the optimizer, so every
/// field is optional and unknown fields are ignored when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompiledResult {
    pub instruction: Option<String>,
    pub instructions: Option<String>,
    pub predict: Option<PredictorState>,
    pub predictor: Option<PredictorState>,
    pub signature: Option<SignatureState>,
    pub detailed_results: Option<DetailedResults>,
}

/// Optimized program returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedProgram {
    pub best_score: f64,
    pub instruction: Option<String>,
    /// Always empty: no demonstrations are selected
    pub demos: Vec<Value>,
    /// Caller-supplied example records, verbatim
    pub examples: Vec<Value>,
    pub optimizer_type: String,
    /// Wall-clock milliseconds spent in the optimizer and extraction
    pub optimization_time: u64,
    pub total_rounds: Option<u32>,
    pub converged: Option<bool>,
    pub stats: Option<Vec<f64>>,
}

/// Body of a successful `/optimize` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub best_score: f64,
    pub optimized_program: OptimizedProgram,
    pub stats: Option<Vec<f64>>,
}
