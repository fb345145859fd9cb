//! Proves a prepared directory loads the way the embedding service loads it.

use crate::convert::{safetensors, EncoderConfig, CONFIG_FILE, SAFETENSORS_FILE};
use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub hidden_size: usize,
    pub output_dims: Vec<usize>,
}

/// Loads `config.json` and `model.safetensors` into a candle BERT encoder and
/// runs one forward pass over `[CLS] [SEP]`-shaped ids.
pub fn load_bert(dir: &Path) -> Result<LoadReport> {
    let config_path = dir.join(CONFIG_FILE);
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a BERT config", config_path.display()))?;
    let encoder = EncoderConfig::from_source(&config_path)?;

    let weights = safetensors::load(&dir.join(SAFETENSORS_FILE))?;
    let tensors: HashMap<String, Tensor> = weights
        .iter()
        .map(|(name, t)| (name.to_string(), t.clone()))
        .collect();

    let device = Device::Cpu;
    let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
    let model = BertModel::load(vb, &config).context("weights do not match a BERT encoder")?;

    let last = encoder.vocab_size.saturating_sub(1) as u32;
    let ids = [1u32.min(last), 2u32.min(last)];
    let input_ids = Tensor::new(&ids, &device)?.unsqueeze(0)?;
    let token_type_ids = input_ids.zeros_like()?;
    let output = model.forward(&input_ids, &token_type_ids, None)?;

    let output_dims = output.dims().to_vec();
    if output_dims.last() != Some(&encoder.hidden_size) {
        bail!(
            "encoder produced {:?}, expected hidden size {}",
            output_dims,
            encoder.hidden_size
        );
    }

    tracing::debug!(dir = %dir.display(), ?output_dims, "forward pass ok");
    Ok(LoadReport {
        hidden_size: encoder.hidden_size,
        output_dims,
    })
}
