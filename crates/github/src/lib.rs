pub mod events;
pub mod files;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod webhook;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use moka::future::Cache;
use octocrab::{Octocrab, models::InstallationId};
use reviewbot_core::{config::GitHubConfig, models::ReviewKey};
use serde::{Deserialize, Serialize};

use crate::{events::Account, files::ChangedFile};

/// The slice of the GitHub API the reviewer depends on.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// One page of a pull request's changed files.
    async fn list_pull_request_files(
        &self,
        installation_id: u64,
        key: &ReviewKey,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<ChangedFile>>;

    /// Post a `COMMENT` review on the head commit. Returns the review id.
    async fn create_advisory_review(
        &self,
        installation_id: u64,
        key: &ReviewKey,
        body: &str,
    ) -> Result<u64>;

    async fn installation_account(&self, installation_id: u64) -> Result<Account>;
}

#[derive(Clone)]
pub struct GitHub {
    pub app_client: Octocrab,
    installations: Cache<u64, Octocrab>,
}

#[derive(Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    per_page: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

#[derive(Serialize)]
struct CreateReview<'a> {
    commit_id: &'a str,
    body: &'a str,
    event: &'static str,
}

#[derive(Deserialize)]
struct PostedReview {
    id: u64,
}

impl GitHub {
    pub async fn new(config: &GitHubConfig) -> Result<Arc<Self>> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(config.app.private_key_pem().as_bytes())
            .context("Invalid GitHub App private key")?;
        let app_client = Octocrab::builder()
            .app(config.app.id.into(), key)
            .build()
            .context("Failed to create GitHub client")?;
        let app = app_client.current().app().await.context("Failed to fetch current app")?;
        tracing::info!("Authenticated as GitHub App {} ({})", app.name, config.app.id);
        Ok(Arc::new(Self::with_client(app_client)))
    }

    pub fn with_client(app_client: Octocrab) -> Self {
        // Installation tokens expire after an hour; octocrab refreshes them per client
        let installations = Cache::builder()
            .max_capacity(1024)
            .time_to_idle(Duration::from_secs(60 * 60))
            .build();
        Self { app_client, installations }
    }

    /// Cached per-installation client. Concurrent first use builds a single client.
    pub async fn client_for_installation(&self, installation_id: u64) -> Result<Octocrab> {
        self.installations
            .try_get_with(installation_id, async {
                self.app_client.installation(InstallationId(installation_id))
            })
            .await
            .map_err(|e| anyhow!("Failed to create client for installation {installation_id}: {e}"))
    }
}

#[async_trait]
impl SourceControl for GitHub {
    async fn list_pull_request_files(
        &self,
        installation_id: u64,
        key: &ReviewKey,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<ChangedFile>> {
        let client = self.client_for_installation(installation_id).await?;
        let route = format!("/repos/{}/{}/pulls/{}/files", key.owner, key.repo, key.pr_number);
        client
            .get(&route, Some(&PageParams { per_page: Some(per_page), page: Some(page) }))
            .await
            .with_context(|| format!("Failed to list files for {key} (page {page})"))
    }

    async fn create_advisory_review(
        &self,
        installation_id: u64,
        key: &ReviewKey,
        body: &str,
    ) -> Result<u64> {
        let client = self.client_for_installation(installation_id).await?;
        let route = format!("/repos/{}/{}/pulls/{}/reviews", key.owner, key.repo, key.pr_number);
        // Never APPROVE or REQUEST_CHANGES; the bot must not block merges
        let review = CreateReview { commit_id: &key.head_sha, body, event: "COMMENT" };
        let posted: PostedReview = client
            .post(&route, Some(&review))
            .await
            .with_context(|| format!("Failed to post review for {key}"))?;
        Ok(posted.id)
    }

    async fn installation_account(&self, installation_id: u64) -> Result<Account> {
        let installation = self
            .app_client
            .apps()
            .installation(InstallationId(installation_id))
            .await
            .with_context(|| format!("Failed to fetch installation {installation_id}"))?;
        Ok(Account { login: installation.account.login, kind: Some(installation.account.r#type) })
    }
}
