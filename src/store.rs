use crate::dataset::build_example_set;
use crate::models::OptimizeResponse;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const LATEST_FILE: &str = "complete-optimization.json";
const PROMPT_FILE: &str = "prompt.md";

/// Instruction written to the prompt file when the run produced none
pub const FALLBACK_INSTRUCTION: &str =
    "You are an assistant. Answer questions helpfully and professionally.";

/// Archived record of one completed optimization run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRun {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub best_score: f64,
    pub instruction: Option<String>,
    pub optimizer_type: String,
    pub optimization_time: u64,
    pub result: OptimizeResponse,
}

impl StoredRun {
    pub fn new(response: &OptimizeResponse, timestamp: DateTime<Utc>) -> Self {
        let program = &response.optimized_program;
        Self {
            version: "2.0".to_string(),
            timestamp,
            best_score: program.best_score,
            instruction: program.instruction.clone(),
            optimizer_type: program.optimizer_type.clone(),
            optimization_time: program.optimization_time,
            result: response.clone(),
        }
    }
}

/// Render the system prompt for a run: the instruction (or a fallback),
/// followed by the selected demos or, without demos, the training examples
pub fn render_prompt(response: &OptimizeResponse) -> String {
    let program = &response.optimized_program;
    let mut prompt = match program.instruction.as_deref().map(str::trim) {
        Some(instruction) if !instruction.is_empty() => instruction.to_string(),
        _ => FALLBACK_INSTRUCTION.to_string(),
    };

    if !program.demos.is_empty() {
        let demos: Vec<String> = program
            .demos
            .iter()
            .enumerate()
            .map(|(i, demo)| {
                let json = serde_json::to_string_pretty(demo).unwrap_or_else(|_| demo.to_string());
                format!("Example {}:\n{}", i + 1, json)
            })
            .collect();
        prompt.push_str("\n\nOptimized Examples:\n");
        prompt.push_str(&demos.join("\n\n"));
    } else if !program.examples.is_empty() {
        let examples: Vec<String> = build_example_set(&program.examples)
            .iter()
            .enumerate()
            .map(|(i, ex)| {
                format!(
                    "Example {}:\n{}\n→ {}",
                    i + 1,
                    ex.conversation_context,
                    ex.expected_turn_response
                )
            })
            .collect();
        prompt.push_str("\n\nExamples:\n");
        prompt.push_str(&examples.join("\n\n"));
    }

    prompt
}

/// Writes completed runs below a root directory
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Save a run on the blocking pool; concurrent archives are written one at a time
    pub async fn archive(&self, response: &OptimizeResponse) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;
        let store = self.clone();
        let response = response.clone();
        tokio::task::spawn_blocking(move || store.save(&response))
            .await
            .context("Archive task panicked")?
    }

    /// Store a run as the latest result and prompt, and as a versioned copy.
    ///
    /// Returns the directory of the versioned copy.
    pub fn save(&self, response: &OptimizeResponse) -> Result<PathBuf> {
        let run = StoredRun::new(response, Utc::now());
        let json_content = self.serialize_run(&run)?;
        let prompt = render_prompt(response);

        self.ensure_directory_exists(&self.root)?;
        self.write_file(&self.root.join(PROMPT_FILE), &format!("{}\n", prompt.trim()))?;
        self.write_file(&self.root.join(LATEST_FILE), &json_content)?;

        let version_dir = self
            .root
            .join("versions")
            .join(run.timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string());
        self.ensure_directory_exists(&version_dir)?;
        self.write_file(&version_dir.join(PROMPT_FILE), &prompt)?;
        self.write_file(&version_dir.join(LATEST_FILE), &json_content)?;

        tracing::info!(path = %version_dir.display(), "optimization run archived");
        Ok(version_dir)
    }

    fn serialize_run(&self, run: &StoredRun) -> Result<String> {
        serde_json::to_string_pretty(run).context("Failed to serialize optimization run to JSON")
    }

    fn ensure_directory_exists(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptimizedProgram;
    use tempfile::tempdir;

    fn response(instruction: Option<&str>) -> OptimizeResponse {
        OptimizeResponse {
            best_score: 0.75,
            optimized_program: OptimizedProgram {
                best_score: 0.75,
                instruction: instruction.map(str::to_string),
                demos: vec![],
                examples: vec![serde_json::json!({"conversationContext": "hi", "expectedTurnResponse": "hello"})],
                optimizer_type: "GEPA".to_string(),
                optimization_time: 1500,
                total_rounds: None,
                converged: None,
                stats: Some(vec![0.5, 0.75]),
            },
            stats: Some(vec![0.5, 0.75]),
        }
    }

    #[test]
    fn test_save_writes_latest_and_versioned_copy() {
        let temp_dir = tempdir().unwrap();
        let store = RunStore::new(temp_dir.path());

        let version_dir = store.save(&response(Some("  Be helpful.  "))).unwrap();

        let latest = std::fs::read_to_string(temp_dir.path().join(LATEST_FILE)).unwrap();
        let stored: StoredRun = serde_json::from_str(&latest).unwrap();
        assert_eq!(stored.version, "2.0");
        assert_eq!(stored.best_score, 0.75);
        assert_eq!(stored.optimizer_type, "GEPA");
        assert_eq!(stored.optimization_time, 1500);
        assert_eq!(stored.result, response(Some("  Be helpful.  ")));

        assert!(version_dir.starts_with(temp_dir.path().join("versions")));
        assert!(version_dir.join(LATEST_FILE).exists());

        let expected = "Be helpful.\n\nExamples:\nExample 1:\nhi\n→ hello";
        let latest_prompt = std::fs::read_to_string(temp_dir.path().join(PROMPT_FILE)).unwrap();
        assert_eq!(latest_prompt, format!("{}\n", expected));
        let versioned_prompt = std::fs::read_to_string(version_dir.join(PROMPT_FILE)).unwrap();
        assert_eq!(versioned_prompt, expected);
    }

    #[test]
    fn test_save_without_instruction_writes_fallback_prompt() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().join("nested").join("runs");
        let store = RunStore::new(&root);

        let version_dir = store.save(&response(None)).unwrap();
        assert!(version_dir.join(LATEST_FILE).exists());

        let prompt = std::fs::read_to_string(root.join(PROMPT_FILE)).unwrap();
        assert!(prompt.starts_with(FALLBACK_INSTRUCTION));
        assert!(prompt.contains("\n\nExamples:\nExample 1:\nhi\n→ hello"));
        assert!(version_dir.join(PROMPT_FILE).exists());
    }

    #[test]
    fn test_render_prompt_variants() {
        let mut bare = response(Some("   "));
        bare.optimized_program.examples.clear();
        assert_eq!(render_prompt(&bare), FALLBACK_INSTRUCTION);

        let mut with_demos = response(Some("Be brief."));
        with_demos.optimized_program.demos = vec![serde_json::json!({"a": 1})];
        assert_eq!(
            render_prompt(&with_demos),
            "Be brief.\n\nOptimized Examples:\nExample 1:\n{\n  \"a\": 1\n}"
        );
    }

    #[tokio::test]
    async fn test_concurrent_archives_all_complete() {
        let temp_dir = tempdir().unwrap();
        let store = RunStore::new(temp_dir.path());

        let first = response(Some("first"));
        let second = response(Some("second"));
        let (a, b) = tokio::join!(store.archive(&first), store.archive(&second));
        a.unwrap();
        b.unwrap();

        let latest = std::fs::read_to_string(temp_dir.path().join(LATEST_FILE)).unwrap();
        let stored: StoredRun = serde_json::from_str(&latest).unwrap();
        assert!(matches!(stored.instruction.as_deref(), Some("first") | Some("second")));
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = RunStore::new(blocker.join("runs"));
        let err = store.save(&response(None)).unwrap_err();
        assert!(err.to_string().contains("Failed to create directory"));
    }
}
