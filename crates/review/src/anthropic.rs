use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reviewbot_core::config::AnthropicConfig;
use serde::{Deserialize, Serialize};

use crate::model::LanguageModel;

const API_VERSION: &str = "2023-06-01";

/// Claude through Anthropic's Messages API.
pub struct Anthropic {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl Anthropic {
    pub fn new(config: &AnthropicConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            url: format!("{}/v1/messages", config.api_base.as_str().trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[async_trait]
impl LanguageModel for Anthropic {
    fn name(&self) -> &str { &self.model }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: [Message { role: "user", content: prompt }],
        };
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Messages request to {} failed", self.model))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned {status}: {body}", self.model);
        }
        let response: MessagesResponse =
            response.json().await.context("Failed to parse Messages response")?;
        let text = response.content.into_iter().filter_map(|block| block.text).collect::<String>();
        if text.is_empty() {
            bail!("{} returned no content", self.model);
        }
        Ok(text)
    }
}
