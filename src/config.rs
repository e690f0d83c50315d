use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Process-wide service configuration, built once at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Model that runs the program being optimized
    #[serde(default = "default_model")]
    pub model: String,
    /// Model that proposes new instructions
    #[serde(default = "default_reflection_model")]
    pub reflection_model: String,
    /// API credential; when absent the client falls back to `OPENAI_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
    /// OpenAI-compatible API endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Sampling temperature for both models (0.0 to 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional directory where completed runs are archived
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

fn default_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_reflection_model() -> String {
    "gpt-4.1-nano".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            reflection_model: default_reflection_model(),
            api_key: None,
            api_base: default_api_base(),
            temperature: default_temperature(),
            host: default_host(),
            port: default_port(),
            storage_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    /// Load the optional config file, then apply the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values found through `lookup` (normally the environment)
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY").or_else(|| non_empty("OPENAI_APIKEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = non_empty("GEPA_MODEL") {
            self.model = model;
        }
        if let Some(model) = non_empty("GEPA_REFLECTION_MODEL") {
            self.reflection_model = model;
        }
        if let Some(base) = non_empty("AI_PROVIDER_BASE_URL") {
            self.api_base = base;
        }
        if let Some(port) = non_empty("PORT") {
            self.port = port
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }
        if let Some(dir) = non_empty("GEPA_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }

        Ok(self)
    }

    /// Socket address the HTTP server binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
