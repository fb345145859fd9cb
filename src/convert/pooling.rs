use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const POOLING_DIR: &str = "1_Pooling";
pub const MODULES_FILE: &str = "modules.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    /// Embedding of the first (`[CLS]`) token.
    Cls,
    Mean,
}

impl std::str::FromStr for PoolingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cls" => Ok(PoolingMode::Cls),
            "mean" => Ok(PoolingMode::Mean),
            other => anyhow::bail!("unknown pooling mode '{}' (expected cls or mean)", other),
        }
    }
}

/// sentence-transformers `1_Pooling/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingConfig {
    pub word_embedding_dimension: usize,
    pub pooling_mode_cls_token: bool,
    pub pooling_mode_mean_tokens: bool,
    pub pooling_mode_max_tokens: bool,
    pub pooling_mode_mean_sqrt_len_tokens: bool,
}

impl PoolingConfig {
    pub fn new(mode: PoolingMode, dimension: usize) -> Self {
        Self {
            word_embedding_dimension: dimension,
            pooling_mode_cls_token: mode == PoolingMode::Cls,
            pooling_mode_mean_tokens: mode == PoolingMode::Mean,
            pooling_mode_max_tokens: false,
            pooling_mode_mean_sqrt_len_tokens: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModuleEntry {
    idx: usize,
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Writes the pooling head and the `modules.json` that wires it after the
/// transformer.
pub fn write(out_dir: &Path, mode: PoolingMode, dimension: usize) -> Result<()> {
    let pooling_dir = out_dir.join(POOLING_DIR);
    std::fs::create_dir_all(&pooling_dir)
        .with_context(|| format!("failed to create {}", pooling_dir.display()))?;

    let config = PoolingConfig::new(mode, dimension);
    std::fs::write(pooling_dir.join("config.json"), serde_json::to_string_pretty(&config)?)?;

    let modules = vec![
        ModuleEntry {
            idx: 0,
            name: "0".to_string(),
            path: String::new(),
            kind: "sentence_transformers.models.Transformer".to_string(),
        },
        ModuleEntry {
            idx: 1,
            name: "1".to_string(),
            path: POOLING_DIR.to_string(),
            kind: "sentence_transformers.models.Pooling".to_string(),
        },
    ];
    std::fs::write(out_dir.join(MODULES_FILE), serde_json::to_string_pretty(&modules)?)?;

    tracing::info!(?mode, dimension, "wrote pooling config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cls_pooling_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), PoolingMode::Cls, 384).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("1_Pooling/config.json")).unwrap();
        let cfg: PoolingConfig = serde_json::from_str(&raw).unwrap();
        assert!(cfg.pooling_mode_cls_token);
        assert!(!cfg.pooling_mode_mean_tokens);
        assert_eq!(cfg.word_embedding_dimension, 384);

        let modules: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("modules.json")).unwrap()).unwrap();
        assert_eq!(modules[1]["path"], "1_Pooling");
        assert_eq!(modules[0]["type"], "sentence_transformers.models.Transformer");
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("CLS".parse::<PoolingMode>().unwrap(), PoolingMode::Cls);
        assert_eq!("mean".parse::<PoolingMode>().unwrap(), PoolingMode::Mean);
        assert!("max".parse::<PoolingMode>().is_err());
    }
}
