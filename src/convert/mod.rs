//! Weight loading, key renaming, dtype casts and artifact writing.

pub mod config;
pub mod onnx;
pub mod pooling;
pub mod quantize;
pub mod rename;
pub mod safetensors;
pub mod tokenizer;
pub mod torch;

pub use config::EncoderConfig;
pub use quantize::{quantize_int8, QuantizeConfig};
pub use rename::KeyRenamer;
pub use tokenizer::TokenizerInfo;

use crate::error::PrepError;
use anyhow::{bail, Context, Result};
use candle_core::{DType, Tensor};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const SAFETENSORS_FILE: &str = "model.safetensors";
pub const SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";
pub const PYTORCH_FILE: &str = "pytorch_model.bin";
pub const CONFIG_FILE: &str = "config.json";

/// A named tensor collection, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct Weights {
    tensors: BTreeMap<String, Tensor>,
}

impl Weights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn byte_size(&self) -> usize {
        self.tensors
            .values()
            .map(|t| t.elem_count() * t.dtype().size_in_bytes())
            .sum()
    }

    /// Applies `renamer` to every key, failing if two keys collapse into one.
    pub fn rename(self, renamer: &KeyRenamer) -> Result<Self> {
        let mut renamed: BTreeMap<String, Tensor> = BTreeMap::new();
        let mut origin: HashMap<String, String> = HashMap::new();

        for (name, tensor) in self.tensors {
            let target = renamer.apply(&name);
            if let Some(first) = origin.get(&target) {
                return Err(PrepError::KeyCollision {
                    first: first.clone(),
                    second: name,
                    target,
                }
                .into());
            }
            if target != name {
                tracing::debug!(from = %name, to = %target, "renamed tensor");
            }
            origin.insert(target.clone(), name);
            renamed.insert(target, tensor);
        }

        Ok(Self { tensors: renamed })
    }

    /// Casts floating point tensors to `dtype`; integer buffers are kept.
    pub fn to_dtype(self, dtype: DType) -> Result<Self> {
        if !dtype.is_float() {
            bail!("refusing to cast weights to non-float dtype {:?}", dtype);
        }

        let mut tensors = BTreeMap::new();
        for (name, tensor) in self.tensors {
            let tensor = if tensor.dtype().is_float() && tensor.dtype() != dtype {
                tensor
                    .to_dtype(dtype)
                    .with_context(|| format!("failed to cast {}", name))?
            } else {
                tensor
            };
            tensors.insert(name, tensor);
        }
        Ok(Self { tensors })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let map: HashMap<&str, Tensor> = self
            .tensors
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();

        candle_core::safetensors::save(&map, path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), tensors = self.len(), "wrote safetensors");
        Ok(())
    }
}

impl FromIterator<(String, Tensor)> for Weights {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

/// Loads the checkpoint found in `dir`.
///
/// `model.safetensors` wins over a sharded index, which wins over a PyTorch
/// pickle.
pub fn load_weights(dir: &Path) -> Result<Weights> {
    let single = dir.join(SAFETENSORS_FILE);
    if single.is_file() {
        tracing::info!(path = %single.display(), "loading safetensors");
        return safetensors::load(&single);
    }

    let index = dir.join(SAFETENSORS_INDEX_FILE);
    if index.is_file() {
        tracing::info!(path = %index.display(), "loading sharded safetensors");
        return safetensors::load_sharded(&index);
    }

    let pickle = dir.join(PYTORCH_FILE);
    if pickle.is_file() {
        tracing::info!(path = %pickle.display(), "loading pytorch checkpoint");
        return torch::load(&pickle);
    }

    Err(PrepError::NoWeights(dir.to_path_buf()).into())
}

/// Parses `f32`, `f16` or `bf16`.
pub fn parse_dtype(s: &str) -> Result<DType> {
    match s.to_ascii_lowercase().as_str() {
        "f32" | "float32" => Ok(DType::F32),
        "f16" | "float16" => Ok(DType::F16),
        "bf16" | "bfloat16" => Ok(DType::BF16),
        other => bail!("unsupported dtype '{}' (expected f32, f16 or bf16)", other),
    }
}
