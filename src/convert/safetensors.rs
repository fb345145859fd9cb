use super::Weights;
use anyhow::{anyhow, bail, Context, Result};
use candle_core::Device;
use safetensors::SafeTensors;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ShardIndex {
    pub weight_map: BTreeMap<String, String>,
}

impl ShardIndex {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid shard index {}", path.display()))
    }

    pub fn shards(&self) -> BTreeSet<&str> {
        self.weight_map.values().map(|s| s.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TensorSummary {
    pub name: String,
    pub dtype: String,
    pub shape: Vec<usize>,
    pub bytes: usize,
}

pub fn load(path: &Path) -> Result<Weights> {
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok(tensors.into_iter().collect())
}

pub fn load_sharded(index_path: &Path) -> Result<Weights> {
    let index = ShardIndex::read(index_path)?;
    let dir = index_path
        .parent()
        .ok_or_else(|| anyhow!("shard index has no parent directory"))?;

    let mut weights = Weights::new();
    for shard in index.shards() {
        let shard_path = dir.join(shard);
        tracing::debug!(shard, "loading shard");
        for (name, tensor) in load(&shard_path)?.tensors {
            if weights.insert(name.clone(), tensor).is_some() {
                bail!("tensor {} appears in more than one shard", name);
            }
        }
    }

    let missing: Vec<&String> = index
        .weight_map
        .keys()
        .filter(|name| weights.get(name).is_none())
        .collect();
    if !missing.is_empty() {
        bail!("shards are missing {} indexed tensors, first: {}", missing.len(), missing[0]);
    }

    Ok(weights)
}

/// Lists the tensors of a safetensors file without materializing them.
pub fn inspect(path: &Path) -> Result<Vec<TensorSummary>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    // SAFETY: the mapping is read-only and dropped before this function
    // returns; the file is not expected to be truncated while we read it.
    let buffer = unsafe { memmap2::MmapOptions::new().map(&file)? };

    let st = SafeTensors::deserialize(&buffer)
        .map_err(|e| anyhow!("invalid safetensors file {}: {}", path.display(), e))?;

    let mut summaries: Vec<TensorSummary> = st
        .tensors()
        .into_iter()
        .map(|(name, view)| TensorSummary {
            name,
            dtype: format!("{:?}", view.dtype()),
            shape: view.shape().to_vec(),
            bytes: view.data().len(),
        })
        .collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Tensor};

    fn write_sample(path: &Path, names: &[&str]) {
        let mut w = Weights::new();
        for name in names {
            w.insert(*name, Tensor::ones((2, 3), DType::F32, &Device::Cpu).unwrap());
        }
        w.save(path).unwrap();
    }

    #[test]
    fn test_round_trip_and_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        write_sample(&path, &["b.weight", "a.weight"]);

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("a.weight").unwrap().dims(), &[2, 3]);

        let summary = inspect(&path).unwrap();
        assert_eq!(summary[0].name, "a.weight");
        assert_eq!(summary[0].dtype, "F32");
        assert_eq!(summary[0].shape, vec![2, 3]);
        assert_eq!(summary[0].bytes, 24);
    }

    #[test]
    fn test_load_sharded() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(&dir.path().join("model-00001-of-00002.safetensors"), &["a.weight"]);
        write_sample(&dir.path().join("model-00002-of-00002.safetensors"), &["b.weight"]);
        let index = dir.path().join("model.safetensors.index.json");
        std::fs::write(
            &index,
            r#"{"metadata": {"total_size": 48}, "weight_map": {
                "a.weight": "model-00001-of-00002.safetensors",
                "b.weight": "model-00002-of-00002.safetensors"}}"#,
        )
        .unwrap();

        let weights = load_sharded(&index).unwrap();
        assert_eq!(weights.names().collect::<Vec<_>>(), vec!["a.weight", "b.weight"]);
    }

    #[test]
    fn test_load_sharded_missing_tensor() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(&dir.path().join("shard.safetensors"), &["a.weight"]);
        let index = dir.path().join("model.safetensors.index.json");
        std::fs::write(
            &index,
            r#"{"weight_map": {"a.weight": "shard.safetensors", "c.weight": "shard.safetensors"}}"#,
        )
        .unwrap();
        assert!(load_sharded(&index).is_err());
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        std::fs::write(&path, b"not a safetensors file").unwrap();
        assert!(inspect(&path).is_err());
    }
}
