//! In-memory [`SourceControl`] for tests in this and dependent crates.

use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use reviewbot_core::models::ReviewKey;

use crate::{SourceControl, events::Account, files::ChangedFile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedReview {
    pub installation_id: u64,
    pub key: ReviewKey,
    pub body: String,
}

/// Serves a fixed list of changed files and records everything posted.
#[derive(Default)]
pub struct FakeSourceControl {
    files: Vec<ChangedFile>,
    account: Option<Account>,
    fail_listing: bool,
    fail_posting: bool,
    pages: Mutex<Vec<u32>>,
    posted: Mutex<Vec<PostedReview>>,
    next_review_id: AtomicU64,
}

impl FakeSourceControl {
    pub fn with_files(files: Vec<ChangedFile>) -> Self {
        Self { files, next_review_id: AtomicU64::new(1000), ..Default::default() }
    }

    pub fn with_account(mut self, login: &str, kind: &str) -> Self {
        self.account = Some(Account { login: login.to_string(), kind: Some(kind.to_string()) });
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_posting(mut self) -> Self {
        self.fail_posting = true;
        self
    }

    pub fn pages_requested(&self) -> Vec<u32> { self.pages.lock().unwrap().clone() }

    pub fn posted(&self) -> Vec<PostedReview> { self.posted.lock().unwrap().clone() }

    /// Number of calls of any kind made against the API.
    pub fn calls(&self) -> usize {
        self.pages.lock().unwrap().len() + self.posted.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn list_pull_request_files(
        &self,
        _installation_id: u64,
        _key: &ReviewKey,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<ChangedFile>> {
        self.pages.lock().unwrap().push(page);
        if self.fail_listing {
            bail!("GitHub API rate limit exceeded");
        }
        let per_page = per_page as usize;
        let start = (page.saturating_sub(1) as usize).saturating_mul(per_page);
        Ok(self.files.iter().skip(start).take(per_page).cloned().collect())
    }

    async fn create_advisory_review(
        &self,
        installation_id: u64,
        key: &ReviewKey,
        body: &str,
    ) -> Result<u64> {
        if self.fail_posting {
            bail!("Resource not accessible by integration");
        }
        self.posted.lock().unwrap().push(PostedReview {
            installation_id,
            key: key.clone(),
            body: body.to_string(),
        });
        Ok(self.next_review_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn installation_account(&self, installation_id: u64) -> Result<Account> {
        match &self.account {
            Some(account) => Ok(account.clone()),
            None => bail!("installation {installation_id} not visible to app"),
        }
    }
}

pub fn changed_file(filename: &str) -> ChangedFile {
    ChangedFile {
        filename: filename.to_string(),
        status: "modified".to_string(),
        patch: Some(format!("@@ -1 +1 @@\n-old {filename}\n+new {filename}")),
    }
}

pub fn review_key() -> ReviewKey {
    ReviewKey {
        owner: "octo-org".to_string(),
        repo: "widgets".to_string(),
        pr_number: 7,
        head_sha: "abc123".to_string(),
    }
}
