use crate::dataset::{INPUT_FIELD, LABEL_FIELD, TrainingExample};
use crate::lm::LanguageModel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Seed instructions for the next-turn task
pub const NEXT_TURN_INSTRUCTIONS: &str = "Given the conversation so far, produce the next assistant message.\n\n\
Optimize for clear, helpful continuations that improve the chat trajectory.\n\
Learn from the ideal examples; mirror their structure, tone, and tool usage.";

/// Name under which the single predictor appears in traces and feedback
pub const PREDICTOR_NAME: &str = "predict";

/// One named field of a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub prefix: String,
    pub desc: String,
}

/// Task description: instructions plus the input and output fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub instructions: String,
    pub input: FieldSpec,
    pub output: FieldSpec,
}

impl Signature {
    /// The conversation-continuation signature
    pub fn next_turn() -> Self {
        Self {
            instructions: NEXT_TURN_INSTRUCTIONS.to_string(),
            input: FieldSpec {
                name: INPUT_FIELD.to_string(),
                prefix: "Conversation so far:".to_string(),
                desc: "The conversation so far (user and assistant turns)".to_string(),
            },
            output: FieldSpec {
                name: LABEL_FIELD.to_string(),
                prefix: "Next assistant message:".to_string(),
                desc: "The next assistant message that moves the conversation forward (including any tool usage)"
                    .to_string(),
            },
        }
    }

    pub fn with_instructions(&self, instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            ..self.clone()
        }
    }
}

/// Output of one program run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub expected_turn_response: String,
}

impl Prediction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            expected_turn_response: text.into(),
        }
    }

    /// True when the model produced nothing usable
    pub fn is_format_failure(&self) -> bool {
        self.expected_turn_response.trim().is_empty()
    }
}

/// One predictor invocation recorded while running a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub predictor: String,
    pub inputs: String,
    pub output: String,
}

/// Single-step program predicting the next assistant turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predict {
    pub name: String,
    pub signature: Signature,
}

impl Default for Predict {
    fn default() -> Self {
        Self::new(Signature::next_turn())
    }
}

impl Predict {
    pub fn new(signature: Signature) -> Self {
        Self {
            name: PREDICTOR_NAME.to_string(),
            signature,
        }
    }

    pub fn instructions(&self) -> &str {
        &self.signature.instructions
    }

    /// Copy of this program with different instructions
    pub fn with_instructions(&self, instructions: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            signature: self.signature.with_instructions(instructions),
        }
    }

    /// System message: instructions followed by the field layout
    pub fn render_system(&self) -> String {
        let sig = &self.signature;
        format!(
            "{}\n\nInput field `{}`: {}\nOutput field `{}`: {}\n\nReply with the value of `{}` only.",
            sig.instructions,
            sig.input.name,
            sig.input.desc,
            sig.output.name,
            sig.output.desc,
            sig.output.name
        )
    }

    /// User message for one example
    pub fn render_user(&self, example: &TrainingExample) -> String {
        format!(
            "{} {}\n\n{}",
            self.signature.input.prefix, example.conversation_context, self.signature.output.prefix
        )
    }

    /// Turn a raw completion into a prediction, dropping an echoed output prefix
    pub fn parse_output(&self, raw: &str) -> Prediction {
        let trimmed = raw.trim();
        let text = trimmed
            .strip_prefix(self.signature.output.prefix.as_str())
            .unwrap_or(trimmed);
        Prediction::new(text.trim())
    }

    /// Run the program on one example
    pub async fn forward(
        &self,
        lm: &dyn LanguageModel,
        example: &TrainingExample,
    ) -> Result<(Prediction, TraceStep)> {
        let raw = lm
            .complete(&self.render_system(), &self.render_user(example))
            .await
            .with_context(|| format!("Predictor {} failed", self.name))?;
        let prediction = self.parse_output(&raw);

        let step = TraceStep {
            predictor: self.name.clone(),
            inputs: example.conversation_context.clone(),
            output: prediction.expected_turn_response.clone(),
        };
        Ok((prediction, step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::testing::ScriptedModel;

    #[test]
    fn test_default_program_uses_seed_instructions() {
        let program = Predict::default();
        assert_eq!(program.name, "predict");
        assert_eq!(program.instructions(), NEXT_TURN_INSTRUCTIONS);
        assert_eq!(program.signature.input.name, "conversationContext");
        assert_eq!(program.signature.output.name, "expectedTurnResponse");
    }

    #[test]
    fn test_with_instructions_keeps_fields() {
        let program = Predict::default().with_instructions("Be brief.");
        assert_eq!(program.instructions(), "Be brief.");
        assert_eq!(program.signature.input, Signature::next_turn().input);
    }

    #[test]
    fn test_render_messages() {
        let program = Predict::default().with_instructions("Be brief.");
        let system = program.render_system();
        assert!(system.starts_with("Be brief."));
        assert!(system.contains("`expectedTurnResponse`"));

        let user = program.render_user(&TrainingExample::new("User: hi", "hello"));
        assert_eq!(user, "Conversation so far: User: hi\n\nNext assistant message:");
    }

    #[test]
    fn test_parse_output_strips_echoed_prefix() {
        let program = Predict::default();
        assert_eq!(
            program.parse_output("Next assistant message:  Hello there \n"),
            Prediction::new("Hello there")
        );
        assert_eq!(program.parse_output("Plain answer"), Prediction::new("Plain answer"));
        assert!(program.parse_output("   ").is_format_failure());
    }

    #[tokio::test]
    async fn test_forward_records_trace() {
        let lm = ScriptedModel::new(|_, _| "Next assistant message: hello there".to_string());
        let program = Predict::default();

        let (prediction, step) = program
            .forward(&lm, &TrainingExample::new("hi", "hello there"))
            .await
            .unwrap();

        assert_eq!(prediction, Prediction::new("hello there"));
        assert_eq!(step.predictor, "predict");
        assert_eq!(step.inputs, "hi");
        assert_eq!(step.output, "hello there");
        assert_eq!(lm.calls(), 1);
    }

    #[tokio::test]
    async fn test_forward_propagates_model_failure() {
        let lm = ScriptedModel::failing("upstream unavailable");
        let result = Predict::default()
            .forward(&lm, &TrainingExample::new("hi", "hello"))
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Predictor predict failed"));
    }
}
