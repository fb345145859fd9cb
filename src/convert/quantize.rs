//! Dynamic int8 quantization of linear layer weights.
//!
//! Each output row of a linear weight gets its own symmetric scale. Codes are
//! stored as `U8` offset by [`ZERO_POINT`] so the file stays readable by any
//! safetensors consumer; `<name>_scale` holds the `[rows, 1]` f32 scales.

use super::Weights;
use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ZERO_POINT: f64 = 128.0;
pub const QMAX: f64 = 127.0;
pub const SCALE_SUFFIX: &str = "_scale";
pub const QUANTIZE_CONFIG_FILE: &str = "quantize_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizeConfig {
    pub scheme: String,
    pub granularity: String,
    pub symmetric: bool,
    pub zero_point: u8,
    pub storage_dtype: String,
    pub scale_suffix: String,
    pub tensors: Vec<String>,
}

impl QuantizeConfig {
    fn int8(tensors: Vec<String>) -> Self {
        Self {
            scheme: "int8".to_string(),
            granularity: "per_row".to_string(),
            symmetric: true,
            zero_point: ZERO_POINT as u8,
            storage_dtype: "U8".to_string(),
            scale_suffix: SCALE_SUFFIX.to_string(),
            tensors,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Linear layer weights: rank 2, floating point, named `*weight`, and not an
/// embedding table or a norm.
pub fn is_linear_weight(name: &str, tensor: &Tensor) -> bool {
    let lower = name.to_ascii_lowercase();
    tensor.rank() == 2
        && tensor.dtype().is_float()
        && lower.ends_with("weight")
        && !lower.contains("embeddings")
        && !lower.contains("norm")
}

/// Returns `(codes, scale)` for a rank 2 weight.
pub fn quantize_rows(weight: &Tensor) -> Result<(Tensor, Tensor)> {
    let w = weight.to_dtype(DType::F32)?;
    let absmax = w.abs()?.max_keepdim(1)?;

    // All-zero rows would divide by zero; any scale reproduces them exactly.
    let zero_rows = absmax.eq(0f32)?;
    let scale = zero_rows.where_cond(&absmax.ones_like()?, &(&absmax / QMAX)?)?;

    let codes = w
        .broadcast_div(&scale)?
        .round()?
        .clamp(-QMAX as f32, QMAX as f32)?;
    let codes = (codes + ZERO_POINT)?.to_dtype(DType::U8)?;

    Ok((codes, scale))
}

pub fn dequantize_rows(codes: &Tensor, scale: &Tensor) -> Result<Tensor> {
    let centered = (codes.to_dtype(DType::F32)? - ZERO_POINT)?;
    Ok(centered.broadcast_mul(scale)?)
}

/// Quantizes every linear weight; all other floating tensors become f32.
pub fn quantize_int8(weights: &Weights) -> Result<(Weights, QuantizeConfig)> {
    let mut out = Weights::new();
    let mut quantized = Vec::new();

    for (name, tensor) in weights.iter() {
        if is_linear_weight(name, tensor) {
            let (codes, scale) =
                quantize_rows(tensor).with_context(|| format!("failed to quantize {}", name))?;
            out.insert(name, codes);
            out.insert(format!("{}{}", name, SCALE_SUFFIX), scale);
            quantized.push(name.to_string());
        } else if tensor.dtype().is_float() {
            out.insert(name, tensor.to_dtype(DType::F32)?);
        } else {
            out.insert(name, tensor.clone());
        }
    }

    tracing::info!(
        quantized = quantized.len(),
        kept = weights.len() - quantized.len(),
        "quantized linear weights to int8"
    );
    Ok((out, QuantizeConfig::int8(quantized)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_quantize_rows() {
        let w = Tensor::new(&[[1.2f32, -2.0, 0.5], [0.0, 0.0, 0.0]], &Device::Cpu).unwrap();
        let (codes, scale) = quantize_rows(&w).unwrap();

        assert_eq!(codes.dtype(), DType::U8);
        assert_eq!(scale.dims(), &[2, 1]);

        let scale_v = scale.to_vec2::<f32>().unwrap();
        assert!((scale_v[0][0] - 2.0 / 127.0).abs() < 1e-7);
        assert_eq!(scale_v[1][0], 1.0);

        let codes_v = codes.to_vec2::<u8>().unwrap();
        // -2.0 is the row max: code -127, stored as 1.
        assert_eq!(codes_v[0][1], 1);
        assert_eq!(codes_v[0][0], 128 + 76);
        assert_eq!(codes_v[0][2], 128 + 32);
        assert_eq!(codes_v[1], vec![128, 128, 128]);
    }

    #[test]
    fn test_dequantize_error_bound() {
        let data: Vec<f32> = (0..64).map(|i| ((i as f32) * 0.37).sin() * (1.0 + i as f32 / 8.0)).collect();
        let w = Tensor::from_vec(data, (4, 16), &Device::Cpu).unwrap();
        let (codes, scale) = quantize_rows(&w).unwrap();
        let back = dequantize_rows(&codes, &scale).unwrap();

        let orig = w.to_vec2::<f32>().unwrap();
        let restored = back.to_vec2::<f32>().unwrap();
        let scales = scale.to_vec2::<f32>().unwrap();
        for r in 0..4 {
            for c in 0..16 {
                let err = (orig[r][c] - restored[r][c]).abs();
                assert!(err <= scales[r][0] / 2.0 + 1e-6, "row {} col {} err {}", r, c, err);
            }
        }
    }

    #[test]
    fn test_linear_weight_selection() {
        let dev = Device::Cpu;
        let mat = Tensor::zeros((3, 3), DType::F32, &dev).unwrap();
        let vec = Tensor::zeros(3, DType::F32, &dev).unwrap();
        let ids = Tensor::zeros((1, 3), DType::I64, &dev).unwrap();

        assert!(is_linear_weight("encoder.layer.0.attention.self.query.weight", &mat));
        assert!(is_linear_weight("pooler.dense.weight", &mat));
        assert!(!is_linear_weight("encoder.layer.0.attention.self.query.bias", &vec));
        assert!(!is_linear_weight("embeddings.word_embeddings.weight", &mat));
        assert!(!is_linear_weight("encoder.layer.0.output.LayerNorm.weight", &vec));
        assert!(!is_linear_weight("embeddings.position_ids", &ids));
    }

    #[test]
    fn test_quantize_int8_weights() {
        let dev = Device::Cpu;
        let mut w = Weights::new();
        w.insert("dense.weight", Tensor::ones((2, 4), DType::F16, &dev).unwrap());
        w.insert("dense.bias", Tensor::ones(2, DType::F16, &dev).unwrap());
        w.insert("embeddings.position_ids", Tensor::zeros((1, 4), DType::I64, &dev).unwrap());

        let (q, config) = quantize_int8(&w).unwrap();
        assert_eq!(config.tensors, vec!["dense.weight".to_string()]);
        assert_eq!(q.get("dense.weight").unwrap().dtype(), DType::U8);
        assert_eq!(q.get("dense.weight_scale").unwrap().dtype(), DType::F32);
        assert_eq!(q.get("dense.bias").unwrap().dtype(), DType::F32);
        assert_eq!(q.get("embeddings.position_ids").unwrap().dtype(), DType::I64);
        assert_eq!(q.len(), 4);
    }
}
