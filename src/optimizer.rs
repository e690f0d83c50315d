//! Reflective, pareto-guided instruction search.
//!
//! The orchestration layer only depends on the [`Optimizer`] trait; the
//! bundled [`ReflectiveOptimizer`] proposes new instructions by asking a
//! reflection model to rewrite the current one from metric feedback, and
//! keeps a child only when it beats its parent on the same minibatch.

use crate::dataset::{INPUT_FIELD, LABEL_FIELD, TrainingExample};
use crate::lm::LanguageModel;
use crate::metric::Metric;
use crate::models::{CompiledResult, DetailedResults, PredictorState, SignatureState};
use crate::program::{Prediction, Predict};
use crate::tuning::{OptimizerConfig, SelectionStrategy};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;

/// Identifier reported to callers as `optimizerType`
pub const OPTIMIZER_TYPE: &str = "GEPA";

/// Merge attempts allowed per run
const MAX_MERGE_INVOCATIONS: usize = 5;

const FORMAT_FAILURE_FEEDBACK: &str =
    "The response was empty or could not be parsed as the expected output field.";

/// Search engine that tunes a program's instructions
#[async_trait]
pub trait Optimizer: Send + Sync {
    /// Run the search and return the compiled program description
    async fn compile(
        &self,
        program: &Predict,
        metric: Metric,
        trainset: &[TrainingExample],
        valset: &[TrainingExample],
        config: &OptimizerConfig,
    ) -> Result<CompiledResult>;
}

/// Outcome of running a candidate on one example
#[derive(Debug, Clone)]
struct Rollout {
    prediction: Prediction,
    score: f64,
    feedback: Option<String>,
}

#[derive(Debug, Clone)]
struct Candidate {
    instructions: String,
    parent: Option<usize>,
    val_scores: Vec<f64>,
}

impl Candidate {
    fn aggregate(&self) -> f64 {
        if self.val_scores.is_empty() {
            0.0
        } else {
            self.val_scores.iter().sum::<f64>() / self.val_scores.len() as f64
        }
    }
}

/// Mutable search state for one run
struct SearchState {
    candidates: Vec<Candidate>,
    metric_calls: usize,
    cursor: usize,
    merges: usize,
}

impl SearchState {
    fn best_index(&self) -> usize {
        let mut best = 0;
        for (i, candidate) in self.candidates.iter().enumerate() {
            if candidate.aggregate() > self.candidates[best].aggregate() {
                best = i;
            }
        }
        best
    }

    /// Candidates that score highest on at least one validation example,
    /// ordered by number of such wins (descending) then index.
    fn pareto_front(&self) -> Vec<usize> {
        let examples = self
            .candidates
            .iter()
            .map(|c| c.val_scores.len())
            .max()
            .unwrap_or(0);
        if examples == 0 {
            return (0..self.candidates.len()).collect();
        }

        let mut wins = vec![0usize; self.candidates.len()];
        for example in 0..examples {
            let top = self
                .candidates
                .iter()
                .filter_map(|c| c.val_scores.get(example))
                .fold(f64::NEG_INFINITY, |acc, s| acc.max(*s));
            for (i, candidate) in self.candidates.iter().enumerate() {
                if candidate.val_scores.get(example) == Some(&top) {
                    wins[i] += 1;
                }
            }
        }

        let mut front: Vec<usize> = (0..self.candidates.len()).filter(|i| wins[*i] > 0).collect();
        front.sort_by(|a, b| wins[*b].cmp(&wins[*a]).then(a.cmp(b)));
        front
    }

    fn select_parent(&self, strategy: SelectionStrategy, iteration: usize) -> usize {
        match strategy {
            SelectionStrategy::CurrentBest => self.best_index(),
            SelectionStrategy::Pareto => {
                let front = self.pareto_front();
                front[iteration % front.len()]
            }
        }
    }

    /// Next `size` training examples, wrapping around the trainset
    fn next_minibatch(&mut self, trainset: &[TrainingExample], size: usize) -> Vec<TrainingExample> {
        let size = size.min(trainset.len());
        let batch = (0..size)
            .map(|offset| trainset[(self.cursor + offset) % trainset.len()].clone())
            .collect();
        self.cursor = (self.cursor + size) % trainset.len();
        batch
    }

    fn into_compiled(self) -> CompiledResult {
        let best = self.best_index();
        let best_instructions = self.candidates[best].instructions.clone();

        let details = DetailedResults {
            candidates: self
                .candidates
                .iter()
                .map(|c| PredictorState::with_signature_instructions(c.instructions.clone()))
                .collect(),
            parents: self.candidates.iter().map(|c| c.parent).collect(),
            val_aggregate_scores: Some(self.candidates.iter().map(Candidate::aggregate).collect()),
            val_subscores: self.candidates.iter().map(|c| c.val_scores.clone()).collect(),
            best_idx: Some(best as i64),
            best_candidate: Some(PredictorState::with_signature_instructions(
                best_instructions.clone(),
            )),
            total_metric_calls: Some(self.metric_calls),
        };

        CompiledResult {
            signature: Some(SignatureState {
                instructions: Some(best_instructions),
                docstring: None,
            }),
            detailed_results: Some(details),
            ..CompiledResult::default()
        }
    }
}

/// Reflection-guided optimizer over a task model and a reflection model
pub struct ReflectiveOptimizer {
    task_lm: Arc<dyn LanguageModel>,
    reflection_lm: Arc<dyn LanguageModel>,
}

impl ReflectiveOptimizer {
    pub fn new(task_lm: Arc<dyn LanguageModel>, reflection_lm: Arc<dyn LanguageModel>) -> Self {
        Self {
            task_lm,
            reflection_lm,
        }
    }

    /// Run `program` over `examples`, at most `threads` at a time.
    ///
    /// With `capture_traces` the metric is called in feedback mode, naming
    /// the predictor and passing its trace.
    async fn evaluate(
        &self,
        program: &Predict,
        examples: &[TrainingExample],
        metric: Metric,
        capture_traces: bool,
        threads: usize,
    ) -> Result<Vec<Rollout>> {
        let lm = self.task_lm.as_ref();
        let rollouts: Vec<BoxFuture<'_, Result<Rollout>>> = examples
            .iter()
            .map(|example| {
                Box::pin(async move {
                    let (prediction, step) = program.forward(lm, example).await?;
                    let trace = [step];
                    let result = if capture_traces {
                        metric(
                            example,
                            &prediction,
                            Some(&trace[..]),
                            Some(program.name.as_str()),
                            Some(&trace[..]),
                        )
                    } else {
                        metric(example, &prediction, None, None, None)
                    };
                    Ok(Rollout {
                        prediction,
                        score: result.score(),
                        feedback: result.feedback().map(str::to_string),
                    })
                }) as BoxFuture<'_, Result<Rollout>>
            })
            .collect();

        stream::iter(rollouts)
            .buffered(threads.max(1))
            .try_collect()
            .await
    }

    async fn evaluate_on_valset(
        &self,
        state: &mut SearchState,
        program: &Predict,
        valset: &[TrainingExample],
        metric: Metric,
        threads: usize,
    ) -> Result<Vec<f64>> {
        let rollouts = self.evaluate(program, valset, metric, false, threads).await?;
        state.metric_calls += rollouts.len();
        Ok(rollouts.iter().map(|r| r.score).collect())
    }

    /// Ask the reflection model for an improved instruction
    async fn propose(
        &self,
        current: &str,
        minibatch: &[TrainingExample],
        rollouts: &[Rollout],
    ) -> Result<Option<String>> {
        let prompt = reflection_prompt(current, &reflective_records(minibatch, rollouts));
        let reply = self
            .reflection_lm
            .complete("You improve instructions for AI assistants.", &prompt)
            .await
            .context("Reflection call failed")?;
        Ok(extract_proposal(&reply))
    }

    /// Ask the reflection model to combine two strong instructions
    async fn propose_merge(&self, first: &str, second: &str) -> Result<Option<String>> {
        let prompt = format!(
            "Two instructions for the same assistant task each do best on different examples.\n\n\
             Instruction A:\n```\n{}\n```\n\nInstruction B:\n```\n{}\n```\n\n\
             Write a single instruction that keeps the strengths of both. \
             Provide the new instruction within ``` blocks.",
            first, second
        );
        let reply = self
            .reflection_lm
            .complete("You improve instructions for AI assistants.", &prompt)
            .await
            .context("Merge call failed")?;
        Ok(extract_proposal(&reply))
    }

    async fn try_merge(
        &self,
        state: &mut SearchState,
        program: &Predict,
        valset: &[TrainingExample],
        metric: Metric,
        threads: usize,
    ) -> Result<()> {
        let front = state.pareto_front();
        let mut distinct = front.iter().copied().filter(|i| {
            state.candidates[*i].instructions != state.candidates[front[0]].instructions
        });
        let (Some(&a), Some(b)) = (front.first(), distinct.next()) else {
            return Ok(());
        };
        state.merges += 1;

        let Some(merged) = self
            .propose_merge(&state.candidates[a].instructions, &state.candidates[b].instructions)
            .await?
        else {
            return Ok(());
        };

        let scores = self
            .evaluate_on_valset(state, &program.with_instructions(merged.clone()), valset, metric, threads)
            .await?;
        let candidate = Candidate {
            instructions: merged,
            parent: Some(a),
            val_scores: scores,
        };
        let threshold = state.candidates[a]
            .aggregate()
            .max(state.candidates[b].aggregate());
        if candidate.aggregate() >= threshold {
            tracing::debug!(
                parents = ?(a, b),
                score = candidate.aggregate(),
                "merged candidate accepted"
            );
            state.candidates.push(candidate);
        }
        Ok(())
    }
}

#[async_trait]
impl Optimizer for ReflectiveOptimizer {
    async fn compile(
        &self,
        program: &Predict,
        metric: Metric,
        trainset: &[TrainingExample],
        valset: &[TrainingExample],
        config: &OptimizerConfig,
    ) -> Result<CompiledResult> {
        let budget = config.metric_budget(valset.len());
        let threads = config.num_threads.unwrap_or(1);
        tracing::info!(
            budget,
            trainset = trainset.len(),
            valset = valset.len(),
            strategy = config.candidate_selection_strategy.as_str(),
            task_model = self.task_lm.model(),
            reflection_model = self.reflection_lm.model(),
            "starting instruction search"
        );

        let mut state = SearchState {
            candidates: Vec::new(),
            metric_calls: 0,
            cursor: 0,
            merges: 0,
        };
        let seed_scores = self
            .evaluate_on_valset(&mut state, program, valset, metric, threads)
            .await
            .context("Failed to evaluate seed program")?;
        state.candidates.push(Candidate {
            instructions: program.instructions().to_string(),
            parent: None,
            val_scores: seed_scores,
        });

        let mut iteration = 0;
        while state.metric_calls < budget && !trainset.is_empty() {
            let parent_idx =
                state.select_parent(config.candidate_selection_strategy, iteration);
            iteration += 1;
            let parent = program.with_instructions(state.candidates[parent_idx].instructions.clone());

            let minibatch = state.next_minibatch(trainset, config.reflection_minibatch_size);
            let parent_rollouts = self
                .evaluate(&parent, &minibatch, metric, true, threads)
                .await?;
            state.metric_calls += parent_rollouts.len();

            if parent_rollouts.iter().all(|r| r.score >= 1.0) {
                tracing::debug!(iteration, parent = parent_idx, "minibatch already perfect");
                continue;
            }

            let Some(proposal) = self
                .propose(parent.instructions(), &minibatch, &parent_rollouts)
                .await?
            else {
                tracing::debug!(iteration, "reflection produced no instruction");
                continue;
            };

            let child = program.with_instructions(proposal.clone());
            let child_rollouts = self
                .evaluate(&child, &minibatch, metric, false, threads)
                .await?;
            state.metric_calls += child_rollouts.len();

            let parent_sum: f64 = parent_rollouts.iter().map(|r| r.score).sum();
            let child_sum: f64 = child_rollouts.iter().map(|r| r.score).sum();
            if child_sum <= parent_sum {
                tracing::debug!(iteration, parent_sum, child_sum, "proposal rejected");
                continue;
            }

            let val_scores = self
                .evaluate_on_valset(&mut state, &child, valset, metric, threads)
                .await?;
            state.candidates.push(Candidate {
                instructions: proposal,
                parent: Some(parent_idx),
                val_scores,
            });
            tracing::debug!(
                iteration,
                candidate = state.candidates.len() - 1,
                score = state.candidates[state.candidates.len() - 1].aggregate(),
                "proposal accepted"
            );

            if config.use_merge && state.merges < MAX_MERGE_INVOCATIONS && state.metric_calls < budget {
                self.try_merge(&mut state, program, valset, metric, threads)
                    .await?;
            }
        }

        tracing::info!(
            candidates = state.candidates.len(),
            metric_calls = state.metric_calls,
            best_score = state.candidates[state.best_index()].aggregate(),
            "instruction search finished"
        );
        Ok(state.into_compiled())
    }
}

/// Render inputs, outputs and feedback for the reflection model
fn reflective_records(minibatch: &[TrainingExample], rollouts: &[Rollout]) -> String {
    minibatch
        .iter()
        .zip(rollouts)
        .enumerate()
        .map(|(i, (example, rollout))| {
            let mut feedback = rollout.feedback.clone().unwrap_or_default();
            if rollout.prediction.is_format_failure() {
                if !feedback.is_empty() {
                    feedback.push(' ');
                }
                feedback.push_str(FORMAT_FAILURE_FEEDBACK);
            }
            format!(
                "# Example {}\n## Inputs\n### {}\n{}\n\n## Generated Outputs\n### {}\n{}\n\n## Expected Output\n{}\n\n## Feedback\n{}",
                i + 1,
                INPUT_FIELD,
                example.conversation_context,
                LABEL_FIELD,
                rollout.prediction.expected_turn_response,
                example.expected_turn_response,
                feedback
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn reflection_prompt(current: &str, records: &str) -> String {
    format!(
        "I provided an assistant with the following instructions to perform a task for me:\n\
         ```\n{}\n```\n\n\
         The following are examples of different task inputs provided to the assistant \
         along with the assistant's response for each of them, and some feedback on how \
         the assistant's response could be better:\n\
         ```\n{}\n```\n\n\
         Your task is to write a new instruction for the assistant. Read the inputs carefully \
         and identify the input format and infer detailed task description about the task \
         I wish to solve with the assistant. Include any niche or domain specific factual \
         information that is useful for the task, and any generalizable strategy the \
         assistant could use. Provide the new instructions within ``` blocks.",
        current, records
    )
}

/// Pull the proposed instruction out of a reflection reply.
///
/// Text after the first fence wins, up to the next fence if there is one.
/// An alphanumeric word on the opening fence line is a language tag and is
/// dropped. A reply without fences is used as-is.
fn extract_proposal(reply: &str) -> Option<String> {
    let body = match reply.find("```") {
        Some(start) => {
            let rest = &reply[start + 3..];
            let inner = match rest.find("```") {
                Some(end) => &rest[..end],
                None => rest,
            };
            match inner.split_once('\n') {
                Some((tag, body)) if is_language_tag(tag.trim()) => body,
                _ => inner,
            }
        }
        None => reply,
    };
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

fn is_language_tag(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c.is_ascii_alphanumeric())
}
