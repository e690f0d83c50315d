use crate::config::ServiceConfig;
use anyhow::{Context, Result};
use async_openai::{Client, config::OpenAIConfig, types::CreateChatCompletionRequestArgs};
use async_trait::async_trait;

/// Text completion backend used by the program and the optimizer
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logging
    fn model(&self) -> &str;

    /// Complete a system + user message pair and return the reply text
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-compatible chat completion model
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiModel {
    /// Create a client for `model` using the process-wide credentials and endpoint
    pub fn new(config: &ServiceConfig, model: &str) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.api_base);
        if let Some(api_key) = &config.api_key {
            openai_config = openai_config.with_api_key(api_key);
        }

        Self {
            client: Client::with_config(openai_config),
            model: model.to_string(),
            temperature: config.temperature as f32,
        }
    }

    /// Build the chat completion request
    fn build_request(
        &self,
        system: &str,
        user: &str,
    ) -> Result<async_openai::types::CreateChatCompletionRequest> {
        let system_message = async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
            .content(system.to_string())
            .build()
            .context("Failed to build system message")?
            .into();

        let user_message = async_openai::types::ChatCompletionRequestUserMessageArgs::default()
            .content(user.to_string())
            .build()
            .context("Failed to build user message")?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([system_message, user_message])
            .temperature(self.temperature)
            .build()
            .context("Failed to build chat completion request")
    }

    /// Extract the reply text from the API response
    fn extract_content(response: async_openai::types::CreateChatCompletionResponse) -> String {
        match response.choices.first() {
            Some(choice) => match &choice.message.content {
                Some(content) => content.clone(),
                None => String::new(),
            },
            None => String::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = self.build_request(system, user)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .with_context(|| format!("Completion request to {} failed", self.model))?;

        Ok(Self::extract_content(response))
    }
}
