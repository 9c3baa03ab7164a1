use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::ReviewType;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub github: GitHubConfig,
    pub openai: OpenAiConfig,
    /// Optional second provider for snippet reviews.
    #[serde(default)]
    pub anthropic: Option<AnthropicConfig>,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Externally reachable base URL, used as the broker's delivery target.
    pub public_url: Url,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    pub app: GitHubAppConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubAppConfig {
    pub id: u64,
    pub webhook_secret: String,
    pub private_key: String,
}

impl GitHubAppConfig {
    /// PEM keys stored in environment-style config often carry literal `\n`.
    pub fn private_key_pem(&self) -> String { self.private_key.replace("\\n", "\n") }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_anthropic_url")]
    pub api_base: Url,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Qstash,
    Local,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub kind: BrokerKind,
    #[serde(default)]
    pub qstash: Option<QstashConfig>,
    pub current_signing_key: String,
    pub next_signing_key: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub local: LocalBrokerConfig,
}

/// Queue backing the in-process broker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalBrokerConfig {
    /// SQLite database holding jobs until they are delivered.
    pub jobs_url: String,
    /// Deliveries in flight at once.
    pub concurrency: usize,
}

impl Default for LocalBrokerConfig {
    fn default() -> Self { Self { jobs_url: "sqlite://jobs.db".to_string(), concurrency: 2 } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QstashConfig {
    #[serde(default = "default_qstash_url")]
    pub url: Url,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Character budget for a single chunk of diff text.
    pub max_diff_chars: usize,
    /// PRs with more changed files than this are skipped.
    pub max_files: usize,
    pub page_size: u8,
    pub summary_length: usize,
    pub review_type: ReviewType,
    /// Number of chunk reviews in flight at once. 1 keeps them sequential.
    pub chunk_concurrency: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_diff_chars: 12_000,
            max_files: 300,
            page_size: 100,
            summary_length: 300,
            review_type: ReviewType::General,
            chunk_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the signed-in user id, set by the upstream auth proxy.
    pub user_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self { Self { user_header: "x-user-id".to_string() } }
}

fn default_max_connections() -> u32 { 5 }

fn default_model() -> String { "gpt-4o".to_string() }

fn default_anthropic_model() -> String { "claude-sonnet-4-5-20250929".to_string() }

fn default_anthropic_url() -> Url {
    Url::parse("https://api.anthropic.com").expect("static URL is valid")
}

fn default_max_tokens() -> u32 { 4096 }

fn default_retries() -> u32 { 2 }

fn default_qstash_url() -> Url {
    Url::parse("https://qstash.upstash.io").expect("static URL is valid")
}
