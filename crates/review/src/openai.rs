use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use reviewbot_core::config::OpenAiConfig;

use crate::model::LanguageModel;

pub struct OpenAi {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAi {
    pub fn new(config: &OpenAiConfig) -> Self {
        let mut client_config = OpenAIConfig::new().with_api_key(&config.api_key);
        if let Some(api_base) = &config.api_base {
            client_config = client_config.with_api_base(api_base);
        }
        Self { client: Client::with_config(client_config), model: config.model.clone() }
    }
}

#[async_trait]
impl LanguageModel for OpenAi {
    fn name(&self) -> &str { &self.model }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default().content(system).build()?.into(),
                ChatCompletionRequestUserMessageArgs::default().content(prompt).build()?.into(),
            ])
            .build()?;
        let start = std::time::Instant::now();
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .with_context(|| format!("Chat completion with {} failed", self.model))?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                "Completion from {} in {}ms ({} prompt tokens, {} completion tokens)",
                self.model,
                start.elapsed().as_millis(),
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Chat completion with {} returned no content", self.model))
    }
}
