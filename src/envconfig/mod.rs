use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;
pub const DEFAULT_TIMEOUT: u64 = 600;

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub root: PathBuf,
    pub models_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub threads: usize,
    pub chunk_size: u64,
    pub timeout: u64,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let root = var("MODELPREP_ROOT")
            .map(|p| expand_home(&p))
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            endpoint: var("HF_ENDPOINT")
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            token: var("HF_TOKEN"),
            root,
            models_dir: var("MODELPREP_MODELS")
                .map(|p| expand_home(&p))
                .unwrap_or_else(default_models_dir),
            cache_dir: var("MODELPREP_CACHE")
                .map(|p| expand_home(&p))
                .unwrap_or_else(default_cache_dir),
            threads: var("MODELPREP_THREADS")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(DEFAULT_THREADS),
            chunk_size: var("MODELPREP_CHUNK_SIZE")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &u64| n > 0)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            timeout: var("MODELPREP_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT),
        }
    }

    pub fn with_root(mut self, root: Option<PathBuf>) -> Self {
        if let Some(root) = root {
            self.root = root;
        }
        self
    }

    /// Resolves a recipe or CLI output path against the configured root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

pub fn default_models_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".modelprep")
        .join("models")
}

/// Staging area for hub sources that are converted rather than mirrored.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("modelprep")
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
