//! Model hub access: repository listings and snapshot downloads.

pub mod filter;

pub use filter::FileFilter;

use crate::downloader::{sha256_file, Downloader};
use crate::envconfig::EnvConfig;
use crate::error::PrepError;
use crate::progress::Bar;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REVISION: &str = "main";

#[derive(Debug, Clone, Deserialize)]
pub struct RepoInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub siblings: Vec<Sibling>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sibling {
    pub rfilename: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub lfs: Option<LfsInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LfsInfo {
    pub sha256: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl Sibling {
    pub fn expected_size(&self) -> Option<u64> {
        self.lfs.as_ref().and_then(|l| l.size).or(self.size)
    }

    pub fn sha256(&self) -> Option<&str> {
        self.lfs.as_ref().map(|l| l.sha256.as_str())
    }
}

impl RepoInfo {
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.siblings.iter().map(|s| s.rfilename.as_str())
    }
}

/// Files materialized by [`HubClient::snapshot`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub repo_id: String,
    pub revision: String,
    pub sha: Option<String>,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

pub struct HubClient {
    endpoint: String,
    downloader: Downloader,
    show_progress: bool,
}

impl HubClient {
    pub fn new(endpoint: impl Into<String>, downloader: Downloader) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            downloader,
            show_progress: true,
        }
    }

    pub fn from_config(config: &EnvConfig) -> Result<Self> {
        let downloader = Downloader::new(
            config.threads,
            config.chunk_size,
            Duration::from_secs(config.timeout),
        )?
        .with_token(config.token.clone());

        Ok(Self::new(config.endpoint.clone(), downloader))
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.show_progress = !quiet;
        self
    }

    pub fn api_url(&self, repo_id: &str, revision: &str) -> String {
        format!(
            "{}/api/models/{}/revision/{}?blobs=true",
            self.endpoint,
            repo_id,
            urlencoding::encode(revision)
        )
    }

    pub fn file_url(&self, repo_id: &str, revision: &str, path: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint,
            repo_id,
            urlencoding::encode(revision),
            path
        )
    }

    pub async fn repo_info(&self, repo_id: &str, revision: &str) -> Result<RepoInfo> {
        let url = self.api_url(repo_id, revision);
        tracing::debug!(%url, "fetching repository listing");

        let res = self
            .downloader
            .authorize(self.downloader.client().get(&url))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", url))?;

        if !res.status().is_success() {
            return Err(PrepError::HubStatus {
                url,
                status: res.status().as_u16(),
            }
            .into());
        }

        let info: RepoInfo = res
            .json()
            .await
            .with_context(|| format!("malformed repository listing for {}", repo_id))?;
        Ok(info)
    }

    /// Mirrors the repository files accepted by `filter` into `local_dir`.
    pub async fn snapshot(
        &self,
        repo_id: &str,
        revision: &str,
        local_dir: &Path,
        filter: &FileFilter,
    ) -> Result<Snapshot> {
        let info = self.repo_info(repo_id, revision).await?;
        self.download_files(repo_id, revision, &info, local_dir, filter)
            .await
    }

    /// Like [`HubClient::snapshot`] for a listing the caller already holds.
    pub async fn download_files(
        &self,
        repo_id: &str,
        revision: &str,
        info: &RepoInfo,
        local_dir: &Path,
        filter: &FileFilter,
    ) -> Result<Snapshot> {
        let selected: Vec<&Sibling> = info
            .siblings
            .iter()
            .filter(|s| filter.matches(&s.rfilename))
            .collect();

        tracing::info!(
            repo_id,
            revision,
            sha = info.sha.as_deref().unwrap_or("unknown"),
            files = selected.len(),
            dest = %local_dir.display(),
            "downloading snapshot"
        );

        tokio::fs::create_dir_all(local_dir)
            .await
            .with_context(|| format!("failed to create {}", local_dir.display()))?;

        // Pin downloads to the listed commit so files cannot come from two revisions.
        let pinned = info.sha.clone().unwrap_or_else(|| revision.to_string());
        let mut files = Vec::with_capacity(selected.len());

        for sibling in selected {
            let dest = local_path(local_dir, &sibling.rfilename)?;

            if is_up_to_date(&dest, sibling).await? {
                tracing::debug!(file = %sibling.rfilename, "already present, skipping");
                files.push(dest);
                continue;
            }

            let url = self.file_url(repo_id, &pinned, &sibling.rfilename);
            let bar = if self.show_progress {
                Bar::new(&sibling.rfilename, sibling.expected_size().unwrap_or(0))
            } else {
                Bar::hidden()
            };

            let written = self
                .downloader
                .download(&url, &dest, sibling.sha256(), sibling.expected_size(), bar.callback())
                .await
                .with_context(|| format!("failed to download {} from {}", sibling.rfilename, repo_id))?;
            bar.finish();

            tracing::debug!(file = %sibling.rfilename, bytes = written, "downloaded");
            files.push(dest);
        }

        Ok(Snapshot {
            repo_id: repo_id.to_string(),
            revision: revision.to_string(),
            sha: info.sha.clone(),
            dir: local_dir.to_path_buf(),
            files,
        })
    }
}

/// Joins a repository-relative path onto `root`, refusing anything that
/// would escape it.
pub fn local_path(root: &Path, rfilename: &str) -> Result<PathBuf> {
    let relative = Path::new(rfilename);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || rfilename.is_empty() {
        bail!("refusing unsafe repository path '{}'", rfilename);
    }
    Ok(root.join(relative))
}

async fn is_up_to_date(dest: &Path, sibling: &Sibling) -> Result<bool> {
    let meta = match tokio::fs::metadata(dest).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return Ok(false),
    };

    if let Some(size) = sibling.expected_size() {
        if meta.len() != size {
            return Ok(false);
        }
    }

    match sibling.sha256() {
        Some(expected) => Ok(sha256_file(dest).await? == expected.to_ascii_lowercase()),
        None => Ok(sibling.expected_size().is_some()),
    }
}
