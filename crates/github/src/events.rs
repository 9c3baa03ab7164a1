use reviewbot_core::{ReviewError, models::ReviewKey};
use serde::{Deserialize, de::DeserializeOwned};

/// A verified webhook, decoded into only the shapes the reviewer acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Installation(InstallationEvent),
    /// `pull_request` with action `opened` or `synchronize`.
    PullRequest(PullRequestEvent),
    /// Any other event or action; acknowledged without side effects.
    Ignored { kind: String, action: Option<String> },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    action: Option<String>,
}

impl WebhookEvent {
    pub fn parse(kind: &str, body: &[u8]) -> Result<Self, ReviewError> {
        let envelope: Envelope = decode(body)?;
        match (kind, envelope.action.as_deref()) {
            ("installation", _) => decode(body).map(Self::Installation),
            ("pull_request", Some("opened" | "synchronize")) => decode(body).map(Self::PullRequest),
            _ => Ok(Self::Ignored { kind: kind.to_string(), action: envelope.action }),
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ReviewError> {
    serde_json::from_slice(body).map_err(|e| ReviewError::Validation(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstallationEvent {
    pub action: InstallationAction,
    #[serde(default)]
    pub installation: Option<EventInstallation>,
}

impl InstallationEvent {
    pub fn installation_id(&self) -> Option<u64> {
        self.installation.as_ref().and_then(|i| i.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationAction {
    Created,
    Deleted,
    Suspend,
    Unsuspend,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventInstallation {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub account: Option<Account>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub login: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub pull_request: PullRequest,
    pub repository: Repository,
    #[serde(default)]
    pub installation: Option<InstallationRef>,
}

impl PullRequestEvent {
    pub fn key(&self) -> ReviewKey {
        ReviewKey {
            owner: self.repository.owner.login.clone(),
            repo: self.repository.name.clone(),
            pr_number: self.pull_request.number,
            head_sha: self.pull_request.head.sha.clone(),
        }
    }

    pub fn installation_id(&self) -> Option<u64> { self.installation.as_ref().map(|i| i.id) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Synchronize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub head: CommitRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InstallationRef {
    pub id: u64,
}
