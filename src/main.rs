use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dataset;
mod extract;
mod lm;
mod metric;
mod models;
mod optimizer;
mod output;
mod probe;
mod program;
mod runner;
mod server;
mod store;
mod tuning;

use crate::config::ServiceConfig;
use crate::lm::OpenAiModel;
use crate::optimizer::ReflectiveOptimizer;
use crate::output::OutputFormat;
use crate::runner::Runner;
use crate::store::RunStore;

/// Next-turn prompt optimizer - tune an assistant instruction from example conversations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file
    #[arg(short, long, env = "GEPA_SERVICE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "GEPA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "GEPA_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Run one optimization from a request body or samples file
    Optimize {
        /// JSON file holding an `/optimize` request body or recorded sessions
        input: PathBuf,

        /// Output format: plain or json
        #[arg(short, long, default_value = "plain")]
        output: OutputFormat,

        #[command(flatten)]
        tuning: TuningArgs,
    },
    /// Check the health of a running service
    Probe {
        #[arg(long, env = "OPTIMIZER_ENDPOINT", default_value = "http://localhost:8000")]
        endpoint: String,
    },
}

/// Tuning knobs; each one given replaces the value from the input file
#[derive(Args, Debug, Default)]
struct TuningArgs {
    #[arg(long)]
    max_metric_calls: Option<i64>,
    /// light, medium or heavy
    #[arg(long)]
    auto: Option<String>,
    /// pareto or current_best
    #[arg(long)]
    candidate_selection_strategy: Option<String>,
    #[arg(long)]
    reflection_minibatch_size: Option<i64>,
    #[arg(long)]
    use_merge: Option<bool>,
    #[arg(long)]
    num_threads: Option<i64>,
}

impl TuningArgs {
    fn apply(&self, payload: &mut Map<String, Value>) {
        let overrides = [
            ("maxMetricCalls", self.max_metric_calls.map(|v| json!(v))),
            ("auto", self.auto.as_ref().map(|v| json!(v))),
            (
                "candidateSelectionStrategy",
                self.candidate_selection_strategy.as_ref().map(|v| json!(v)),
            ),
            (
                "reflectionMinibatchSize",
                self.reflection_minibatch_size.map(|v| json!(v)),
            ),
            ("useMerge", self.use_merge.map(|v| json!(v))),
            ("numThreads", self.num_threads.map(|v| json!(v))),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                payload.insert(key.to_string(), value);
            }
        }
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_runner(config: &ServiceConfig) -> Runner {
    let task_lm = Arc::new(OpenAiModel::new(config, &config.model));
    let reflection_lm = Arc::new(OpenAiModel::new(config, &config.reflection_model));
    let store = config.storage_dir.as_ref().map(RunStore::new);
    Runner::new(Arc::new(ReflectiveOptimizer::new(task_lm, reflection_lm)), store)
}

/// Read an input file and turn it into a request body with CLI overrides applied
fn load_request(path: &Path, tuning: &TuningArgs) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON input: {}", path.display()))?;

    let mut payload = match dataset::request_from_json(value)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    tuning.apply(&mut payload);
    Ok(Value::Object(payload))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = ServiceConfig::load(cli.config.as_deref())?;
            let runner = Arc::new(build_runner(&config));
            server::serve(&config, runner).await?;
        }
        Command::Optimize {
            input,
            output,
            tuning,
        } => {
            let config = ServiceConfig::load(cli.config.as_deref())?;
            let payload = load_request(&input, &tuning)?;
            let response = build_runner(&config).optimize(&payload).await?;
            output::print_response(&response, output);
        }
        Command::Probe { endpoint } => {
            let client = probe::build_http_client()?;
            probe::check_health(&client, &endpoint).await?;
            println!("Service at {} is healthy", endpoint);
        }
    }

    Ok(())
}
