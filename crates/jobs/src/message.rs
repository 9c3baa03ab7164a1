use reviewbot_core::models::ReviewKey;
use serde::{Deserialize, Serialize};

/// Broker payload asking a worker to review one pull request commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewJob {
    pub review_id: i64,
    pub github_installation_id: u64,
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: u64,
    pub head_sha: String,
}

impl ReviewJob {
    pub fn new(review_id: i64, github_installation_id: u64, key: &ReviewKey) -> Self {
        Self {
            review_id,
            github_installation_id,
            repo_owner: key.owner.clone(),
            repo_name: key.repo.clone(),
            pr_number: key.pr_number,
            head_sha: key.head_sha.clone(),
        }
    }

    pub fn key(&self) -> ReviewKey {
        ReviewKey {
            owner: self.repo_owner.clone(),
            repo: self.repo_name.clone(),
            pr_number: self.pr_number,
            head_sha: self.head_sha.clone(),
        }
    }
}
