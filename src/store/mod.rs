use crate::downloader::sha256_file_blocking;
use crate::error::PrepError;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

pub const MANIFEST_FILE: &str = "modelprep.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative to the model directory, `/`-separated.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
    pub repo_id: String,
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub transform: String,
    pub installed_at: DateTime<Utc>,
    pub files: Vec<FileEntry>,
}

/// Where a prepared directory came from.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub recipe: Option<String>,
    pub repo_id: String,
    pub revision: String,
    pub commit: Option<String>,
    pub transform: String,
}

impl Manifest {
    /// Hashes every file under `dir` except the manifest itself and partial
    /// downloads.
    pub fn build(dir: &Path, provenance: Provenance) -> Result<Self> {
        let mut paths = Vec::new();
        collect_files(dir, dir, &mut paths)?;
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for rel in paths {
            let full = dir.join(&rel);
            let size = std::fs::metadata(&full)?.len();
            files.push(FileEntry {
                path: rel,
                size,
                sha256: sha256_file_blocking(&full)?,
            });
        }

        Ok(Self {
            recipe: provenance.recipe,
            repo_id: provenance.repo_id,
            revision: provenance.revision,
            commit: provenance.commit,
            transform: provenance.transform,
            installed_at: Utc::now(),
            files,
        })
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).map_err(|e| {
            PrepError::Manifest {
                path,
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.files.iter().any(|f| f.path == rel)
    }
}

/// Records what a finished preparation wrote to `dir`.
pub fn install_manifest(dir: &Path, provenance: Provenance) -> Result<Manifest> {
    let manifest = Manifest::build(dir, provenance)?;
    manifest.write(dir)?;
    tracing::info!(
        dir = %dir.display(),
        files = manifest.files.len(),
        size = manifest.total_size(),
        "installed manifest"
    );
    Ok(manifest)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let kind = entry.file_type()?;
        let path = entry.path();
        if kind.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        // Symlinks are not followed.
        if !kind.is_file() {
            continue;
        }

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name == MANIFEST_FILE || name.ends_with(".part") {
            continue;
        }

        if let Ok(rel) = path.strip_prefix(root) {
            let rel: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(rel.join("/"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    pub missing: Vec<String>,
    pub changed: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.changed.is_empty()
    }
}

/// Recomputes sizes and digests of a prepared directory against its manifest.
pub fn verify(dir: &Path) -> Result<VerifyReport> {
    let manifest = Manifest::read(dir)?;
    let mut report = VerifyReport::default();

    for entry in &manifest.files {
        let full = dir.join(&entry.path);
        report.checked += 1;

        let meta = match std::fs::metadata(&full) {
            Ok(meta) if meta.is_file() => meta,
            _ => {
                report.missing.push(entry.path.clone());
                continue;
            }
        };

        if meta.len() != entry.size || sha256_file_blocking(&full)? != entry.sha256 {
            report.changed.push(entry.path.clone());
        }
    }

    tracing::debug!(dir = %dir.display(), checked = report.checked, ok = report.is_ok(), "verified");
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct InstalledModel {
    pub id: String,
    pub size: u64,
    pub installed_at: DateTime<Utc>,
    pub repo_id: String,
}

/// One directory per installed model under `models_dir`.
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(models_dir: P) -> Self {
        Self {
            models_dir: models_dir.as_ref().to_path_buf(),
        }
    }

    /// Directory for `id`, which must be a single plain path component.
    pub fn model_dir(&self, id: &str) -> Result<PathBuf> {
        let mut components = Path::new(id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.models_dir.join(id)),
            _ => bail!("invalid model id '{}'", id),
        }
    }

    pub fn is_installed(&self, id: &str) -> bool {
        self.model_path(id).is_some()
    }

    pub fn model_path(&self, id: &str) -> Option<PathBuf> {
        self.model_dir(id)
            .ok()
            .filter(|dir| dir.join(MANIFEST_FILE).is_file())
    }

    pub fn list(&self) -> Result<Vec<InstalledModel>> {
        let mut models = Vec::new();

        if !self.models_dir.exists() {
            return Ok(models);
        }

        for entry in std::fs::read_dir(&self.models_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };

            match Manifest::read(&path) {
                Ok(manifest) => models.push(InstalledModel {
                    id,
                    size: manifest.total_size(),
                    installed_at: manifest.installed_at,
                    repo_id: manifest.repo_id,
                }),
                Err(e) => tracing::debug!(dir = %path.display(), error = %e, "skipping directory without manifest"),
            }
        }

        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    /// Removes an installed model. Returns `false` when there was nothing to remove.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let dir = self.model_dir(id)?;
        if !dir.exists() {
            return Ok(false);
        }
        if !self.is_installed(id) {
            return Err(PrepError::NotInstalled(id.to_string()).into());
        }
        std::fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        tracing::info!(id, "removed model");
        Ok(true)
    }
}
