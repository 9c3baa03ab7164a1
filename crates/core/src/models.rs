use std::{fmt, str::FromStr};

use anyhow::{Error, bail};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle of a single review attempt.
///
/// ```text
/// PENDING -> PROCESSING -> COMPLETED | FAILED | SKIPPED
/// ```
///
/// COMPLETED and SKIPPED are final. FAILED is terminal for the attempt, but a
/// broker redelivery of the same job may reclaim the row into PROCESSING, and a
/// concurrent duplicate delivery that finishes later overwrites it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 5] =
        [Self::Pending, Self::Processing, Self::Completed, Self::Failed, Self::Skipped];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Whether a job delivery may (re)claim a review in this state.
    pub fn is_claimable(self) -> bool { self.can_transition_to(Self::Processing) }

    pub fn can_transition_to(self, next: ReviewStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            // Duplicate deliveries reclaim, the last one to finish wins
            (Self::Processing | Self::Failed, next) => next != Self::Pending,
            _ => false,
        }
    }

    /// States a review may be in when it moves to `next`.
    pub fn sources(next: ReviewStatus) -> impl Iterator<Item = ReviewStatus> {
        Self::ALL.into_iter().filter(move |from| from.can_transition_to(next))
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ReviewStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::ALL.into_iter().find(|status| status.as_str() == s) {
            Some(status) => Ok(status),
            None => bail!("Unknown review status {s:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewType {
    #[default]
    General,
    Security,
    Performance,
    Bugs,
}

impl ReviewType {
    pub const ALL: [ReviewType; 4] = [Self::General, Self::Security, Self::Performance, Self::Bugs];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Bugs => "bugs",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::General => "General Code Review",
            Self::Security => "Security Review",
            Self::Performance => "Performance Review",
            Self::Bugs => "Bug Detection",
        }
    }
}

impl FromStr for ReviewType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::ALL.into_iter().find(|kind| kind.as_str() == s) {
            Some(kind) => Ok(kind),
            None => bail!("Unknown review type {s:?}"),
        }
    }
}

/// Model provider chosen per snippet review request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Self::OpenAi, Self::Anthropic];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::ALL.into_iter().find(|provider| provider.as_str() == s) {
            Some(provider) => Ok(provider),
            None => bail!("Unknown provider {s:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    #[default]
    User,
    Organization,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Organization => "Organization",
        }
    }

    /// Anything GitHub reports that is not an organization is treated as a user account.
    pub fn from_github(kind: Option<&str>) -> Self {
        match kind {
            Some("Organization") => Self::Organization,
            _ => Self::User,
        }
    }
}

/// A GitHub App installation bound to a local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub id: i64,
    pub installation_id: u64,
    pub user_id: Option<String>,
    pub account_login: String,
    pub account_type: AccountType,
    pub installed_at: OffsetDateTime,
    pub suspended_at: Option<OffsetDateTime>,
}

impl Installation {
    pub fn is_active(&self) -> bool { self.suspended_at.is_none() }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstallation {
    pub installation_id: u64,
    /// Set when the post-install callback claims the installation.
    pub user_id: Option<String>,
    /// Empty when the account metadata is unknown; an existing login is kept.
    pub account_login: String,
    pub account_type: AccountType,
}

/// Natural key of one reviewable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewKey {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub head_sha: String,
}

impl fmt::Display for ReviewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}@{}", self.owner, self.repo, self.pr_number, self.head_sha)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    /// Row id of the owning installation.
    pub installation_id: i64,
    pub key: ReviewKey,
    pub pr_title: String,
    pub pr_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub id: i64,
    pub installation_id: i64,
    pub key: ReviewKey,
    pub pr_title: String,
    pub pr_url: String,
    pub status: ReviewStatus,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub files_reviewed: u32,
    pub error_message: Option<String>,
    pub github_comment_id: Option<u64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Terminal result written back to a review after processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    Completed { content: String, summary: String, files_reviewed: u32, comment_id: u64 },
    Skipped { summary: String },
    Failed { message: String },
}

impl ReviewOutcome {
    pub fn status(&self) -> ReviewStatus {
        match self {
            Self::Completed { .. } => ReviewStatus::Completed,
            Self::Skipped { .. } => ReviewStatus::Skipped,
            Self::Failed { .. } => ReviewStatus::Failed,
        }
    }
}
