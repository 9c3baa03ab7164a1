use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reviewbot_core::models::Provider;

/// A chat-style language model: one system instruction, one prompt, one text reply.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier shown in posted reviews.
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Models a snippet review can pick from. OpenAI is always configured.
#[derive(Clone)]
pub struct Providers {
    openai: Arc<dyn LanguageModel>,
    anthropic: Option<Arc<dyn LanguageModel>>,
}

impl Providers {
    pub fn new(openai: Arc<dyn LanguageModel>, anthropic: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { openai, anthropic }
    }

    pub fn get(&self, provider: Provider) -> Option<&Arc<dyn LanguageModel>> {
        match provider {
            Provider::OpenAi => Some(&self.openai),
            Provider::Anthropic => self.anthropic.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reviewbot_core::models::Provider;

    use super::{LanguageModel, Providers};
    use crate::testing::ScriptedModel;

    #[test]
    fn test_provider_lookup() {
        let openai: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::echo());
        let providers = Providers::new(openai.clone(), None);
        assert!(Arc::ptr_eq(providers.get(Provider::OpenAi).unwrap(), &openai));
        assert!(providers.get(Provider::Anthropic).is_none());

        let anthropic: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::echo());
        let providers = Providers::new(openai, Some(anthropic.clone()));
        assert!(Arc::ptr_eq(providers.get(Provider::Anthropic).unwrap(), &anthropic));
    }
}
