//! Best-effort recovery of the optimized instruction and score from a
//! [`CompiledResult`].
//!
//! The instruction is searched for with an ordered list of rules; the first
//! rule yielding non-blank text wins.

use crate::models::{CompiledResult, PredictorState, SignatureState};

type Rule = fn(&CompiledResult) -> Option<String>;

/// Search order, highest priority first
const RULES: [Rule; 5] = [
    direct_fields,
    predict_child,
    predictor_child,
    compiled_signature,
    best_candidate,
];

/// First non-blank candidate, trimmed
fn first_text(candidates: &[Option<&String>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

fn signature_text(signature: Option<&SignatureState>) -> Option<String> {
    let signature = signature?;
    first_text(&[signature.instructions.as_ref(), signature.docstring.as_ref()])
}

fn holder_text(holder: Option<&PredictorState>) -> Option<String> {
    let holder = holder?;
    first_text(&[holder.instruction.as_ref(), holder.instructions.as_ref()])
        .or_else(|| signature_text(holder.signature.as_ref()))
}

fn direct_fields(compiled: &CompiledResult) -> Option<String> {
    first_text(&[compiled.instruction.as_ref(), compiled.instructions.as_ref()])
}

fn predict_child(compiled: &CompiledResult) -> Option<String> {
    holder_text(compiled.predict.as_ref())
}

fn predictor_child(compiled: &CompiledResult) -> Option<String> {
    holder_text(compiled.predictor.as_ref())
}

fn compiled_signature(compiled: &CompiledResult) -> Option<String> {
    signature_text(compiled.signature.as_ref())
}

fn best_candidate(compiled: &CompiledResult) -> Option<String> {
    let details = compiled.detailed_results.as_ref()?;
    holder_text(details.best_candidate.as_ref())
}

/// Locate the optimized instruction, or `None` when no location holds text
pub fn extract_instruction(compiled: &CompiledResult) -> Option<String> {
    RULES.iter().find_map(|rule| rule(compiled))
}

/// Aggregate validation score of the best candidate.
///
/// `None` unless both the score list and the index are reported and the
/// index points inside the list.
pub fn best_score(compiled: &CompiledResult) -> Option<f64> {
    let details = compiled.detailed_results.as_ref()?;
    let scores = details.val_aggregate_scores.as_ref()?;
    let idx = details.best_idx?;

    let score = usize::try_from(idx).ok().and_then(|i| scores.get(i)).copied();
    if score.is_none() {
        tracing::debug!(
            best_idx = idx,
            candidates = scores.len(),
            "best candidate index outside reported scores"
        );
    }
    score
}
