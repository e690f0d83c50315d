use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Name of the field the optimizer feeds to the program
pub const INPUT_FIELD: &str = "conversationContext";
/// Name of the field the optimizer treats as the expected output
pub const LABEL_FIELD: &str = "expectedTurnResponse";

/// A labeled conversation used both for training and validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingExample {
    /// The conversation so far (optimizer input)
    pub conversation_context: String,
    /// The ideal next assistant turn (optimizer label)
    pub expected_turn_response: String,
}

impl TrainingExample {
    pub fn new(context: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            conversation_context: context.into(),
            expected_turn_response: expected.into(),
        }
    }

    /// Build an example from an arbitrary caller record.
    ///
    /// Missing or non-text fields become empty text, and a record that is not
    /// an object yields an example with both fields empty.
    pub fn from_record(record: &Value) -> Self {
        Self {
            conversation_context: text_field(record, INPUT_FIELD),
            expected_turn_response: text_field(record, LABEL_FIELD),
        }
    }
}

fn text_field(record: &Value, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(text)) => text.clone(),
        _ => String::new(),
    }
}

/// Convert caller records into training examples, preserving order and length
pub fn build_example_set(records: &[Value]) -> Vec<TrainingExample> {
    records.iter().map(TrainingExample::from_record).collect()
}

/// One question/answer exchange in a recorded chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub tool: Option<String>,
}

/// A recorded chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub pairs: Vec<Pair>,
}

/// Samples file contents, current (`samples`) or legacy (`good`/`bad`) layout
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SamplesFile {
    Current { samples: Vec<Session> },
    Legacy { good: Vec<Session>, bad: Vec<Session> },
}

impl SamplesFile {
    pub fn into_sessions(self) -> Vec<Session> {
        match self {
            SamplesFile::Current { samples } => samples,
            SamplesFile::Legacy { mut good, bad } => {
                good.extend(bad);
                good
            }
        }
    }
}

fn render_turn(number: usize, pair: &Pair) -> String {
    let tool = match &pair.tool {
        Some(tool) => format!(" [Tool: {}]", tool),
        None => String::new(),
    };
    format!(
        "Turn {}:\nUser: {}\nAssistant: {}{}",
        number, pair.question, pair.answer, tool
    )
}

/// Flatten recorded sessions into example records.
///
/// Every turn but the last becomes the context and the last turn is the
/// expected response. Sessions without any turns are skipped.
pub fn records_from_sessions(sessions: &[Session]) -> Vec<Value> {
    let mut records = Vec::new();

    for session in sessions {
        let Some((last, history)) = session.pairs.split_last() else {
            continue;
        };

        let context = history
            .iter()
            .enumerate()
            .map(|(index, pair)| render_turn(index + 1, pair))
            .collect::<Vec<_>>()
            .join("\n\n");
        let context = if context.is_empty() {
            "New conversation".to_string()
        } else {
            context
        };

        let tools_used: Vec<&str> = session
            .pairs
            .iter()
            .filter_map(|pair| pair.tool.as_deref())
            .collect();

        let mut record = json!({
            INPUT_FIELD: context,
            LABEL_FIELD: render_turn(history.len() + 1, last),
        });
        if !tools_used.is_empty() {
            record["toolsUsed"] = json!(tools_used);
        }
        records.push(record);
    }

    records
}

/// Turn the contents of an input file into an `/optimize` request body.
///
/// Samples files are flattened into `examples`; anything else is taken to be
/// a request body already.
pub fn request_from_json(value: Value) -> Result<Value> {
    let is_samples = value
        .as_object()
        .is_some_and(|map| map.contains_key("samples") || map.contains_key("good"));
    if !is_samples {
        return Ok(value);
    }

    let file: SamplesFile =
        serde_json::from_value(value).context("Failed to parse samples file")?;
    let records = records_from_sessions(&file.into_sessions());
    Ok(json!({ "examples": records }))
}
