//! Built-in preparations, each runnable with no further arguments.

pub mod pipeline;

pub use pipeline::{convert_dir, quantize_dir, ConfigSource, ConvertOptions, ConvertReport, Preparer, Source};

use crate::convert::onnx::OnnxVariant;
use crate::convert::pooling::PoolingMode;
use crate::convert::EncoderConfig;
use crate::error::PrepError;
use anyhow::Result;
use candle_core::DType;

/// What a catalogue entry is recommended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Default,
    Code,
}

impl std::fmt::Display for Usage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Usage::Default => write!(f, "default"),
            Usage::Code => write!(f, "code"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Transform {
    /// Copy the repository files as published.
    Snapshot,
    /// Snapshot, then place a published ONNX graph under `onnx/`.
    Onnx { variant: OnnxVariant },
    /// Re-save the weights as a single safetensors file.
    Safetensors {
        strip_prefixes: bool,
        config: ConfigSource,
        dtype: Option<DType>,
        pooling: Option<PoolingMode>,
    },
    /// Per-row int8 quantization of linear weights.
    Int8,
}

impl Transform {
    pub fn label(&self) -> &'static str {
        match self {
            Transform::Snapshot => "snapshot",
            Transform::Onnx { .. } => "snapshot+onnx",
            Transform::Safetensors { pooling: Some(_), .. } => "safetensors+pooling",
            Transform::Safetensors { .. } => "safetensors",
            Transform::Int8 => "int8",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: &'static str,
    pub name: &'static str,
    pub repo_id: &'static str,
    /// Relative to the configured root unless absolute.
    pub output: &'static str,
    pub dims: usize,
    pub usage: Option<Usage>,
    pub transform: Transform,
}

pub fn builtin() -> Vec<Recipe> {
    vec![
        Recipe {
            id: "all-minilm-l6-v2",
            name: "all-MiniLM-L6-v2",
            repo_id: "sentence-transformers/all-MiniLM-L6-v2",
            output: "models/all-MiniLM-L6-v2",
            dims: 384,
            usage: Some(Usage::Default),
            transform: Transform::Snapshot,
        },
        Recipe {
            id: "gte-small",
            name: "GTE small",
            repo_id: "thenlper/gte-small",
            output: "models/gte-small",
            dims: 384,
            usage: None,
            transform: Transform::Snapshot,
        },
        Recipe {
            id: "codebert-small-v2",
            name: "CodeBERT small v2",
            repo_id: "codistai/codeBERT-small-v2",
            output: "models/codeBERT-small-v2",
            dims: 768,
            usage: Some(Usage::Code),
            transform: Transform::Snapshot,
        },
        Recipe {
            id: "minilm-quantized",
            name: "all-MiniLM-L6-v2 (int8 ONNX)",
            repo_id: "sentence-transformers/all-MiniLM-L6-v2",
            output: "models/all-MiniLM-L6-v2",
            dims: 384,
            usage: None,
            transform: Transform::Onnx {
                variant: OnnxVariant::Int8,
            },
        },
        Recipe {
            id: "candle-minilm",
            name: "all-MiniLM-L6-v2 (candle)",
            repo_id: "sentence-transformers/all-MiniLM-L6-v2",
            output: "candle-model",
            dims: 384,
            usage: None,
            transform: Transform::Safetensors {
                strip_prefixes: true,
                config: ConfigSource::Template(EncoderConfig::minilm_l6),
                dtype: None,
                pooling: None,
            },
        },
        Recipe {
            id: "codebert-int8",
            name: "CodeBERT base (int8)",
            repo_id: "microsoft/codebert-base",
            output: "quantized-codebert",
            dims: 768,
            usage: None,
            transform: Transform::Int8,
        },
        Recipe {
            id: "minilm-cls",
            name: "all-MiniLM-L6-v2 (CLS embedding)",
            repo_id: "sentence-transformers/all-MiniLM-L6-v2",
            output: "embedding-model",
            dims: 384,
            usage: None,
            transform: Transform::Safetensors {
                strip_prefixes: true,
                config: ConfigSource::FromSource,
                dtype: None,
                pooling: Some(PoolingMode::Cls),
            },
        },
    ]
}

pub fn find(id: &str) -> Result<Recipe> {
    builtin()
        .into_iter()
        .find(|r| r.id.eq_ignore_ascii_case(id))
        .ok_or_else(|| PrepError::UnknownRecipe(id.to_string()).into())
}
