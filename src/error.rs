use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepError {
    #[error("unknown recipe '{0}' (run `modelprep recipes` to list them)")]
    UnknownRecipe(String),

    #[error("hub request to {url} failed with status {status}")]
    HubStatus { url: String, status: u16 },

    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("no weights found in {0} (looked for model.safetensors, model.safetensors.index.json, pytorch_model.bin)")]
    NoWeights(PathBuf),

    #[error("renaming maps both '{first}' and '{second}' to '{target}'")]
    KeyCollision {
        first: String,
        second: String,
        target: String,
    },

    #[error("{artifact} is not published by {repo_id}; available: {available:?}")]
    MissingArtifact {
        repo_id: String,
        artifact: String,
        available: Vec<String>,
    },

    #[error("model '{0}' is not installed")]
    NotInstalled(String),

    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
}
