use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use reviewbot_core::{config::ReviewConfig, models::ReviewKey};
use serde::Deserialize;

use crate::SourceControl;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub patch: Option<String>,
}

impl ChangedFile {
    /// Worth sending to the model: still present, has a textual patch, and is not
    /// a lockfile, minified bundle, binary asset or build output.
    pub fn is_reviewable(&self) -> bool {
        self.status != "removed"
            && self.patch.as_deref().is_some_and(|p| !p.is_empty())
            && !is_skipped_path(&self.filename)
    }
}

pub fn is_skipped_path(path: &str) -> bool {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX
        .get_or_init(|| {
            Regex::new(concat!(
                r"(?:package-lock\.json|yarn\.lock|pnpm-lock\.yaml|Cargo\.lock",
                r"|\.min\.(?:js|css)|\.svg|\.png|\.jpe?g|\.gif|\.ico|\.woff2?|\.ttf)$",
                r"|(?:dist|\.next|generated|target)/",
            ))
            .unwrap()
        })
        .is_match(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedFiles {
    /// More than `max_files` files changed; `count` is how many were seen before stopping.
    TooLarge { count: usize },
    Files(Vec<ChangedFile>),
}

/// List every changed file of a pull request, stopping early once the PR is too large.
pub async fn fetch_changed_files(
    source: &dyn SourceControl,
    installation_id: u64,
    key: &ReviewKey,
    config: &ReviewConfig,
) -> Result<FetchedFiles> {
    let per_page = config.page_size.max(1);
    let mut files = Vec::new();
    let mut page = 1u32;
    loop {
        let batch = source.list_pull_request_files(installation_id, key, page, per_page).await?;
        let len = batch.len();
        files.extend(batch);
        if files.len() > config.max_files {
            tracing::info!("{} has {}+ changed files, skipping", key, files.len());
            return Ok(FetchedFiles::TooLarge { count: files.len() });
        }
        if len < per_page as usize {
            break;
        }
        page += 1;
    }
    tracing::debug!("Fetched {} changed files for {} in {} page(s)", files.len(), key, page);
    Ok(FetchedFiles::Files(files))
}
