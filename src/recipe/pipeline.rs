use super::{Recipe, Transform};
use crate::convert::onnx::{self, OnnxVariant};
use crate::convert::pooling::{self, PoolingMode};
use crate::convert::quantize::QUANTIZE_CONFIG_FILE;
use crate::convert::tokenizer::{self, TOKENIZER_FILES};
use crate::convert::{
    load_weights, quantize_int8, EncoderConfig, KeyRenamer, QuantizeConfig, TokenizerInfo, CONFIG_FILE,
    PYTORCH_FILE, SAFETENSORS_FILE, SAFETENSORS_INDEX_FILE,
};
use crate::envconfig::EnvConfig;
use crate::hub::{FileFilter, HubClient, RepoInfo, Snapshot};
use crate::store::{self, Manifest, Provenance};
use anyhow::{bail, Context, Result};
use candle_core::DType;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Alternate framework exports a plain snapshot leaves behind.
pub const MIRROR_IGNORE: &[&str] = &["onnx/**", "openvino/**", "*.h5", "*.msgpack", "*.ot"];

/// Where the generated `config.json` comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Template(fn() -> EncoderConfig),
    FromSource,
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub renamer: KeyRenamer,
    pub dtype: Option<DType>,
    pub config: ConfigSource,
    pub pooling: Option<PoolingMode>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            renamer: KeyRenamer::default(),
            dtype: None,
            config: ConfigSource::FromSource,
            pooling: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub tensors: usize,
    pub bytes: usize,
    pub config: EncoderConfig,
}

/// A model to read from: a hub repository or a directory already on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Hub { repo_id: String, revision: String },
    Local(PathBuf),
}

impl Source {
    /// Existing directories are local sources; anything else names a repository.
    pub fn parse(spec: &str, revision: &str) -> Self {
        let path = Path::new(spec);
        if path.is_dir() {
            Source::Local(path.to_path_buf())
        } else {
            Source::Hub {
                repo_id: spec.to_string(),
                revision: revision.to_string(),
            }
        }
    }

    fn name(&self) -> String {
        match self {
            Source::Hub { repo_id, .. } => repo_id.clone(),
            Source::Local(dir) => dir.display().to_string(),
        }
    }

    fn revision(&self) -> String {
        match self {
            Source::Hub { revision, .. } => revision.clone(),
            Source::Local(_) => "local".to_string(),
        }
    }
}

struct Staged {
    dir: PathBuf,
    commit: Option<String>,
}

/// Runs preparations against the hub and the local filesystem.
pub struct Preparer {
    config: EnvConfig,
    hub: HubClient,
}

impl Preparer {
    pub fn new(config: EnvConfig, hub: HubClient) -> Self {
        Self { config, hub }
    }

    pub fn from_config(config: EnvConfig) -> Result<Self> {
        let hub = HubClient::from_config(&config)?;
        Ok(Self::new(config, hub))
    }

    pub async fn run(&self, recipe: &Recipe, out_dir: &Path, revision: &str) -> Result<Manifest> {
        tracing::info!(recipe = recipe.id, repo_id = recipe.repo_id, out = %out_dir.display(), "running recipe");

        let source = Source::Hub {
            repo_id: recipe.repo_id.to_string(),
            revision: revision.to_string(),
        };

        match &recipe.transform {
            Transform::Snapshot => {
                let filter = FileFilter::new(&[] as &[&str], MIRROR_IGNORE)?;
                self.pull(recipe.repo_id, revision, out_dir, &filter, Some(recipe.id))
                    .await
            }
            Transform::Onnx { variant } => {
                self.onnx(recipe.repo_id, revision, out_dir, variant, Some(recipe.id))
                    .await
            }
            Transform::Safetensors {
                strip_prefixes,
                config,
                dtype,
                pooling,
            } => {
                let options = ConvertOptions {
                    renamer: if *strip_prefixes {
                        KeyRenamer::encoder_prefixes()
                    } else {
                        KeyRenamer::default()
                    },
                    dtype: *dtype,
                    config: config.clone(),
                    pooling: *pooling,
                };
                self.convert_with(&source, out_dir, options, Some(recipe.id), recipe.transform.label())
                    .await
            }
            Transform::Int8 => self.quantize_with(&source, out_dir, Some(recipe.id)).await,
        }
    }

    /// Mirrors a repository as published.
    pub async fn pull(
        &self,
        repo_id: &str,
        revision: &str,
        out_dir: &Path,
        filter: &FileFilter,
        recipe: Option<&str>,
    ) -> Result<Manifest> {
        let snapshot = self.hub.snapshot(repo_id, revision, out_dir, filter).await?;
        install(out_dir, &snapshot, recipe, "snapshot").await
    }

    /// Mirrors a repository and places one of its published ONNX graphs in `onnx/`.
    pub async fn onnx(
        &self,
        repo_id: &str,
        revision: &str,
        out_dir: &Path,
        variant: &OnnxVariant,
        recipe: Option<&str>,
    ) -> Result<Manifest> {
        let info = self.hub.repo_info(repo_id, revision).await?;
        let selected = onnx::select(&info, repo_id, variant)?;

        let mirror = FileFilter::new(&[] as &[&str], MIRROR_IGNORE)?;
        let snapshot = self
            .hub
            .download_files(repo_id, revision, &info, out_dir, &mirror)
            .await?;

        let graph = FileFilter::new(&[selected.as_str()], &[])?;
        self.hub
            .download_files(repo_id, revision, &info, out_dir, &graph)
            .await?;

        // The fetched graph stays so reruns find it up to date.
        onnx::package(out_dir, &selected, variant, out_dir)?;

        install(out_dir, &snapshot, recipe, "snapshot+onnx").await
    }

    pub async fn convert(&self, source: &Source, out_dir: &Path, options: ConvertOptions) -> Result<Manifest> {
        let label = if options.pooling.is_some() {
            "safetensors+pooling"
        } else {
            "safetensors"
        };
        self.convert_with(source, out_dir, options, None, label).await
    }

    pub async fn quantize(&self, source: &Source, out_dir: &Path) -> Result<Manifest> {
        self.quantize_with(source, out_dir, None).await
    }

    async fn convert_with(
        &self,
        source: &Source,
        out_dir: &Path,
        options: ConvertOptions,
        recipe: Option<&str>,
        label: &str,
    ) -> Result<Manifest> {
        let staged = self.stage(source).await?;
        let src = staged.dir.clone();
        let out = out_dir.to_path_buf();

        let report = tokio::task::spawn_blocking(move || convert_dir(&src, &out, &options))
            .await
            .context("conversion task panicked")??;
        tracing::info!(
            tensors = report.tensors,
            bytes = report.bytes,
            hidden_size = report.config.hidden_size,
            "converted weights"
        );

        finish(out_dir, source, staged.commit, recipe, label).await
    }

    async fn quantize_with(&self, source: &Source, out_dir: &Path, recipe: Option<&str>) -> Result<Manifest> {
        let staged = self.stage(source).await?;
        let src = staged.dir.clone();
        let out = out_dir.to_path_buf();

        let config = tokio::task::spawn_blocking(move || quantize_dir(&src, &out))
            .await
            .context("quantization task panicked")??;
        tracing::info!(quantized = config.tensors.len(), "quantized weights");

        finish(out_dir, source, staged.commit, recipe, "int8").await
    }

    /// Puts the weights, config and tokenizer of `source` in a local directory.
    async fn stage(&self, source: &Source) -> Result<Staged> {
        match source {
            Source::Local(dir) => Ok(Staged {
                dir: dir.clone(),
                commit: None,
            }),
            Source::Hub { repo_id, revision } => {
                let info = self.hub.repo_info(repo_id, revision).await?;
                let patterns = staging_patterns(&info);
                let filter = FileFilter::new(&patterns, &[])?;
                let dir = stage_dir(&self.config.cache_dir, repo_id, revision, &info);

                let snapshot = self
                    .hub
                    .download_files(repo_id, revision, &info, &dir, &filter)
                    .await?;

                let keep: HashSet<PathBuf> = snapshot.files.iter().cloned().collect();
                let pruned = {
                    let dir = dir.clone();
                    tokio::task::spawn_blocking(move || prune_stage(&dir, &keep))
                        .await
                        .context("prune task panicked")??
                };
                tracing::debug!(files = snapshot.files.len(), pruned, dir = %dir.display(), "staged source");

                Ok(Staged {
                    dir,
                    commit: snapshot.sha,
                })
            }
        }
    }
}

/// `<cache>/<org>--<name>/<commit>`, or the revision name when the hub lists
/// no commit.
fn stage_dir(cache_dir: &Path, repo_id: &str, revision: &str, info: &RepoInfo) -> PathBuf {
    let snapshot = info.sha.as_deref().unwrap_or(revision);
    cache_dir
        .join(repo_id.replace('/', "--"))
        .join(snapshot.replace('/', "--"))
}

/// Deletes every file under `dir` that is not in `keep`, so leftovers from an
/// earlier staging never shadow the selected weights.
fn prune_stage(dir: &Path, keep: &HashSet<PathBuf>) -> Result<usize> {
    let mut pruned = 0;
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            pruned += prune_stage(&path, keep)?;
        } else if !keep.contains(&path) {
            std::fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
            pruned += 1;
        }
    }
    Ok(pruned)
}

/// Weights in the best format the repository offers, plus config and tokenizer.
fn staging_patterns(info: &RepoInfo) -> Vec<String> {
    let files: HashSet<&str> = info.files().collect();

    let mut patterns: Vec<String> = if files.contains(SAFETENSORS_FILE) {
        vec![SAFETENSORS_FILE.to_string()]
    } else if files.contains(SAFETENSORS_INDEX_FILE) {
        vec![SAFETENSORS_INDEX_FILE.to_string(), "model-*.safetensors".to_string()]
    } else {
        vec![PYTORCH_FILE.to_string()]
    };

    patterns.push(CONFIG_FILE.to_string());
    patterns.extend(TOKENIZER_FILES.iter().map(|f| f.to_string()));
    patterns
}

async fn install(out_dir: &Path, snapshot: &Snapshot, recipe: Option<&str>, transform: &str) -> Result<Manifest> {
    let provenance = Provenance {
        recipe: recipe.map(String::from),
        repo_id: snapshot.repo_id.clone(),
        revision: snapshot.revision.clone(),
        commit: snapshot.sha.clone(),
        transform: transform.to_string(),
    };
    write_manifest(out_dir, provenance).await
}

async fn finish(
    out_dir: &Path,
    source: &Source,
    commit: Option<String>,
    recipe: Option<&str>,
    transform: &str,
) -> Result<Manifest> {
    let provenance = Provenance {
        recipe: recipe.map(String::from),
        repo_id: source.name(),
        revision: source.revision(),
        commit,
        transform: transform.to_string(),
    };
    write_manifest(out_dir, provenance).await
}

async fn write_manifest(out_dir: &Path, provenance: Provenance) -> Result<Manifest> {
    let dir = out_dir.to_path_buf();
    tokio::task::spawn_blocking(move || store::install_manifest(&dir, provenance))
        .await
        .context("manifest task panicked")?
}

fn ensure_distinct(src: &Path, out: &Path) -> Result<()> {
    let same = match (src.canonicalize(), out.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same {
        bail!("output directory {} is the source directory", out.display());
    }
    Ok(())
}

/// Loads the checkpoint in `src` and writes a candle-ready copy to `out`:
/// `model.safetensors`, the tokenizer files, a generated `config.json` and,
/// when requested, a pooling head.
pub fn convert_dir(src: &Path, out: &Path, options: &ConvertOptions) -> Result<ConvertReport> {
    ensure_distinct(src, out)?;
    std::fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;

    let mut weights = load_weights(src)?;
    if !options.renamer.is_identity() {
        weights = weights.rename(&options.renamer)?;
    }
    if let Some(dtype) = options.dtype {
        weights = weights.to_dtype(dtype)?;
    }
    weights.save(out.join(SAFETENSORS_FILE))?;

    tokenizer::copy_files(src, out)?;
    let tokenizer = TokenizerInfo::read(src)?;

    let base = match &options.config {
        ConfigSource::Template(template) => template(),
        ConfigSource::FromSource => EncoderConfig::from_source(&src.join(CONFIG_FILE))?,
    };
    let config = base.with_tokenizer(&tokenizer);
    config.write(&out.join(CONFIG_FILE))?;

    if let Some(mode) = options.pooling {
        pooling::write(out, mode, config.hidden_size)?;
    }

    Ok(ConvertReport {
        tensors: weights.len(),
        bytes: weights.byte_size(),
        config,
    })
}

/// Quantizes the checkpoint in `src` to int8 and writes it with the source
/// config, the tokenizer files and `quantize_config.json` to `out`.
pub fn quantize_dir(src: &Path, out: &Path) -> Result<QuantizeConfig> {
    ensure_distinct(src, out)?;
    std::fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;

    let weights = load_weights(src)?.rename(&KeyRenamer::encoder_prefixes())?;
    let (quantized, config) = quantize_int8(&weights)?;
    quantized.save(out.join(SAFETENSORS_FILE))?;

    let source_config = src.join(CONFIG_FILE);
    if source_config.is_file() {
        std::fs::copy(&source_config, out.join(CONFIG_FILE))
            .with_context(|| format!("failed to copy {}", source_config.display()))?;
    } else {
        tracing::warn!(src = %src.display(), "source has no config.json");
    }
    tokenizer::copy_files(src, out)?;
    config.write(&out.join(QUANTIZE_CONFIG_FILE))?;

    Ok(config)
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
    fn test_staging_prefers_safetensors() {
        let info = listing(&["model.safetensors", "pytorch_model.bin", "config.json"]);
        let filter = FileFilter::new(&staging_patterns(&info), &[]).unwrap();
        assert!(filter.matches("model.safetensors"));
        assert!(!filter.matches("pytorch_model.bin"));
        assert!(filter.matches("config.json"));
        assert!(filter.matches("vocab.txt"));
        assert!(!filter.matches("onnx/model.onnx"));
    }

    #[test]
    fn test_staging_sharded_and_pickle() {
        let sharded = listing(&["model.safetensors.index.json", "model-00001-of-00002.safetensors"]);
        let filter = FileFilter::new(&staging_patterns(&sharded), &[]).unwrap();
        assert!(filter.matches("model-00001-of-00002.safetensors"));
        assert!(filter.matches("model.safetensors.index.json"));

        let pickle = listing(&["pytorch_model.bin", "tf_model.h5"]);
        let filter = FileFilter::new(&staging_patterns(&pickle), &[]).unwrap();
        assert!(filter.matches("pytorch_model.bin"));
        assert!(!filter.matches("tf_model.h5"));
    }

    #[test]
    fn test_mirror_ignores_other_frameworks() {
        let filter = FileFilter::new(&[] as &[&str], MIRROR_IGNORE).unwrap();
        assert!(filter.matches("model.safetensors"));
        assert!(filter.matches("1_Pooling/config.json"));
        assert!(!filter.matches("onnx/model_qint8_avx512.onnx"));
        assert!(!filter.matches("tf_model.h5"));
        assert!(!filter.matches("rust_model.ot"));
    }

    #[test]
    fn test_source_parse() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_string_lossy().to_string();
        assert_eq!(Source::parse(&local, "main"), Source::Local(dir.path().to_path_buf()));
        assert_eq!(
            Source::parse("thenlper/gte-small", "v1"),
            Source::Hub { repo_id: "thenlper/gte-small".into(), revision: "v1".into() }
        );
    }

    #[test]
    fn test_stage_dir_is_per_commit() {
        let cache = Path::new("/cache");
        let mut info = listing(&[]);
        assert_eq!(
            stage_dir(cache, "thenlper/gte-small", "refs/pr/1", &info),
            cache.join("thenlper--gte-small").join("refs--pr--1")
        );
        info.sha = Some("abc123".into());
        assert_eq!(
            stage_dir(cache, "thenlper/gte-small", "main", &info),
            cache.join("thenlper--gte-small").join("abc123")
        );
    }

    #[test]
    fn test_prune_stage_keeps_selected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("onnx")).unwrap();
        for f in ["config.json", "model.safetensors", "pytorch_model.bin", "onnx/model.onnx"] {
            std::fs::write(dir.path().join(f), b"x").unwrap();
        }
        let keep: HashSet<PathBuf> = ["config.json", "pytorch_model.bin"]
            .iter()
            .map(|f| dir.path().join(f))
            .collect();

        assert_eq!(prune_stage(dir.path(), &keep).unwrap(), 2);
        assert!(dir.path().join("pytorch_model.bin").is_file());
        assert!(!dir.path().join("model.safetensors").exists());
        assert!(!dir.path().join("onnx/model.onnx").exists());
    }

    #[test]
    fn test_convert_refuses_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let err = convert_dir(dir.path(), dir.path(), &ConvertOptions::default()).unwrap_err();
        assert!(err.to_string().contains("is the source directory"));
    }
}
