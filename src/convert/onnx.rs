//! Selection of the ONNX graphs a repository publishes under `onnx/`.

use super::{tokenizer, CONFIG_FILE};
use crate::error::PrepError;
use crate::hub::RepoInfo;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const ONNX_DIR: &str = "onnx";
pub const QUANTIZED_FILE: &str = "model_quantized.onnx";
pub const FULL_PRECISION_FILE: &str = "model.onnx";

/// Int8 exports in order of preference.
const INT8_CANDIDATES: &[&str] = &[
    "onnx/model_quantized.onnx",
    "onnx/model_qint8_avx512_vnni.onnx",
    "onnx/model_qint8_avx512.onnx",
    "onnx/model_quint8_avx2.onnx",
    "onnx/model_qint8_arm64.onnx",
    "onnx/model_int8.onnx",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnnxVariant {
    /// The unquantized `onnx/model.onnx`.
    Full,
    /// The first published int8 export.
    Int8,
    /// A repository path chosen by the caller.
    File(String),
}

impl OnnxVariant {
    pub fn output_name(&self) -> &str {
        match self {
            OnnxVariant::Full => FULL_PRECISION_FILE,
            OnnxVariant::Int8 => QUANTIZED_FILE,
            OnnxVariant::File(path) => path.rsplit('/').next().unwrap_or(path),
        }
    }
}

/// Resolves `variant` against the repository listing.
pub fn select(info: &RepoInfo, repo_id: &str, variant: &OnnxVariant) -> Result<String> {
    let published: Vec<&str> = info
        .files()
        .filter(|f| f.ends_with(".onnx"))
        .collect();

    let found = match variant {
        OnnxVariant::Full => published.iter().find(|f| **f == "onnx/model.onnx").copied(),
        OnnxVariant::Int8 => INT8_CANDIDATES
            .iter()
            .find(|c| published.contains(*c))
            .copied(),
        OnnxVariant::File(path) => published.iter().find(|f| **f == path.as_str()).copied(),
    };

    found.map(String::from).ok_or_else(|| {
        PrepError::MissingArtifact {
            repo_id: repo_id.to_string(),
            artifact: match variant {
                OnnxVariant::Full => "onnx/model.onnx".to_string(),
                OnnxVariant::Int8 => "an int8 ONNX export".to_string(),
                OnnxVariant::File(path) => path.clone(),
            },
            available: published.iter().map(|s| s.to_string()).collect(),
        }
        .into()
    })
}

/// Lays out `<out>/onnx/` with the selected graph, the tokenizer files and
/// the model config, all taken from a snapshot at `snapshot_dir`.
pub fn package(snapshot_dir: &Path, selected: &str, variant: &OnnxVariant, out_dir: &Path) -> Result<PathBuf> {
    let onnx_dir = out_dir.join(ONNX_DIR);
    std::fs::create_dir_all(&onnx_dir)
        .with_context(|| format!("failed to create {}", onnx_dir.display()))?;

    let source = snapshot_dir.join(selected);
    let target = onnx_dir.join(variant.output_name());
    if source != target {
        std::fs::copy(&source, &target)
            .with_context(|| format!("failed to copy {} to {}", source.display(), target.display()))?;
    }

    tokenizer::copy_files(snapshot_dir, &onnx_dir)?;
    let config = snapshot_dir.join(CONFIG_FILE);
    if config.is_file() {
        std::fs::copy(&config, onnx_dir.join(CONFIG_FILE))?;
    }

    tracing::info!(source = selected, target = %target.display(), "packaged ONNX graph");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Sibling;

    fn listing(files: &[&str]) -> RepoInfo {
        RepoInfo {
            id: None,
            sha: None,
            siblings: files
                .iter()
                .map(|f| Sibling { rfilename: f.to_string(), size: None, lfs: None })
                .collect(),
        }
    }

    #[test]
    fn test_select_int8_preference() {
        let info = listing(&[
            "onnx/model.onnx",
            "onnx/model_qint8_arm64.onnx",
            "onnx/model_qint8_avx512.onnx",
            "onnx/model_O4.onnx",
        ]);
        assert_eq!(select(&info, "r", &OnnxVariant::Int8).unwrap(), "onnx/model_qint8_avx512.onnx");
        assert_eq!(select(&info, "r", &OnnxVariant::Full).unwrap(), "onnx/model.onnx");
        assert_eq!(
            select(&info, "r", &OnnxVariant::File("onnx/model_O4.onnx".into())).unwrap(),
            "onnx/model_O4.onnx"
        );
    }

    #[test]
    fn test_select_missing_lists_available() {
        let info = listing(&["config.json", "onnx/model.onnx"]);
        let err = select(&info, "thenlper/gte-small", &OnnxVariant::Int8).unwrap_err();
        match err.downcast_ref::<PrepError>() {
            Some(PrepError::MissingArtifact { available, .. }) => {
                assert_eq!(available, &vec!["onnx/model.onnx".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_package() {
        let snap = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(snap.path().join("onnx")).unwrap();
        std::fs::write(snap.path().join("onnx/model_qint8_avx512.onnx"), b"graph").unwrap();
        std::fs::write(snap.path().join("tokenizer.json"), b"{}").unwrap();
        std::fs::write(snap.path().join("config.json"), b"{}").unwrap();

        let target = package(snap.path(), "onnx/model_qint8_avx512.onnx", &OnnxVariant::Int8, snap.path()).unwrap();
        assert_eq!(target, snap.path().join("onnx/model_quantized.onnx"));
        assert_eq!(std::fs::read(&target).unwrap(), b"graph");
        assert!(snap.path().join("onnx/tokenizer.json").exists());
        assert!(snap.path().join("onnx/config.json").exists());
    }

    #[test]
    fn test_output_name() {
        assert_eq!(OnnxVariant::File("onnx/model_O2.onnx".into()).output_name(), "model_O2.onnx");
        assert_eq!(OnnxVariant::Int8.output_name(), "model_quantized.onnx");
    }
}
