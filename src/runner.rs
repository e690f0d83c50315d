use crate::dataset::build_example_set;
use crate::extract::{best_score, extract_instruction};
use crate::metric::build_metric;
use crate::models::{CompiledResult, OptimizeResponse, OptimizedProgram};
use crate::optimizer::{OPTIMIZER_TYPE, Optimizer};
use crate::program::Predict;
use crate::store::RunStore;
use crate::tuning::OptimizerConfig;
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Orchestrates one optimization request from payload to response
pub struct Runner {
    optimizer: Arc<dyn Optimizer>,
    store: Option<RunStore>,
}

impl Runner {
    /// Create a new runner around an optimizer
    pub fn new(optimizer: Arc<dyn Optimizer>, store: Option<RunStore>) -> Self {
        Self { optimizer, store }
    }

    /// Run an optimization for a loosely-typed `/optimize` payload
    pub async fn optimize(&self, payload: &Value) -> Result<OptimizeResponse> {
        let records = example_records(payload);
        let trainset = build_example_set(&records);
        let config = OptimizerConfig::from_payload(payload);
        tracing::info!(
            examples = trainset.len(),
            max_metric_calls = config.max_metric_calls,
            auto = ?config.auto,
            "optimization requested"
        );

        let program = Predict::default();
        let metric = build_metric();

        let start = Instant::now();
        let compiled = self
            .optimizer
            .compile(&program, metric, &trainset, &trainset, &config)
            .await
            .context("Optimizer run failed")?;
        let response = assemble_response(&compiled, records, start.elapsed());

        tracing::info!(
            best_score = response.best_score,
            found_instruction = response.optimized_program.instruction.is_some(),
            optimization_time_ms = response.optimized_program.optimization_time,
            "optimization finished"
        );

        if let Some(store) = &self.store {
            if let Err(err) = store.archive(&response).await {
                tracing::warn!(error = %format!("{:#}", err), "failed to archive optimization run");
            }
        }

        Ok(response)
    }
}

/// Caller example records; anything but an array counts as no examples
fn example_records(payload: &Value) -> Vec<Value> {
    match payload.get("examples") {
        Some(Value::Array(records)) => records.clone(),
        None | Some(Value::Null) => Vec::new(),
        Some(other) => {
            tracing::warn!(kind = json_kind(other), "ignoring non-array examples field");
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Package an optimizer result into the caller-facing response.
///
/// `elapsed` covers the optimizer run and is extended here to include
/// instruction extraction.
pub fn assemble_response(
    compiled: &CompiledResult,
    examples: Vec<Value>,
    elapsed: Duration,
) -> OptimizeResponse {
    let extraction_start = Instant::now();
    let best = best_score(compiled).unwrap_or(0.0);
    let instruction = extract_instruction(compiled);
    let stats = compiled
        .detailed_results
        .as_ref()
        .and_then(|details| details.val_aggregate_scores.clone());
    let optimization_time = (elapsed + extraction_start.elapsed()).as_millis() as u64;

    OptimizeResponse {
        best_score: best,
        optimized_program: OptimizedProgram {
            best_score: best,
            instruction,
            demos: Vec::new(),
            examples,
            optimizer_type: OPTIMIZER_TYPE.to_string(),
            optimization_time,
            total_rounds: None,
            converged: None,
            stats: stats.clone(),
        },
        stats,
    }
}
