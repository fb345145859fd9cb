use super::TokenizerInfo;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Hyperparameters of a BERT-family encoder, in the field order candle and
/// transformers write them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: String,
    pub hidden_dropout_prob: f64,
    pub attention_probs_dropout_prob: f64,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub initializer_range: f64,
    pub layer_norm_eps: f64,
    pub pad_token_id: usize,
    pub model_type: String,
}

impl EncoderConfig {
    /// all-MiniLM-L6-v2.
    pub fn minilm_l6() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 384,
            num_hidden_layers: 6,
            num_attention_heads: 12,
            intermediate_size: 1536,
            hidden_act: "gelu".to_string(),
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            initializer_range: 0.02,
            layer_norm_eps: 1e-12,
            pad_token_id: 0,
            model_type: "bert".to_string(),
        }
    }

    /// Reads a transformers `config.json`, filling absent fields from the
    /// MiniLM template.
    pub fn from_source(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let source: Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        Ok(Self::from_value(&source))
    }

    pub fn from_value(source: &Value) -> Self {
        let base = Self::minilm_l6();
        let usize_of = |key: &str, default: usize| {
            source
                .get(key)
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(default)
        };
        let f64_of = |key: &str, default: f64| source.get(key).and_then(|v| v.as_f64()).unwrap_or(default);
        let str_of = |key: &str, default: &str| {
            source
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };

        Self {
            vocab_size: usize_of("vocab_size", base.vocab_size),
            hidden_size: usize_of("hidden_size", base.hidden_size),
            num_hidden_layers: usize_of("num_hidden_layers", base.num_hidden_layers),
            num_attention_heads: usize_of("num_attention_heads", base.num_attention_heads),
            intermediate_size: usize_of("intermediate_size", base.intermediate_size),
            hidden_act: str_of("hidden_act", &base.hidden_act),
            hidden_dropout_prob: f64_of("hidden_dropout_prob", base.hidden_dropout_prob),
            attention_probs_dropout_prob: f64_of(
                "attention_probs_dropout_prob",
                base.attention_probs_dropout_prob,
            ),
            max_position_embeddings: usize_of("max_position_embeddings", base.max_position_embeddings),
            type_vocab_size: usize_of("type_vocab_size", base.type_vocab_size),
            initializer_range: f64_of("initializer_range", base.initializer_range),
            layer_norm_eps: f64_of("layer_norm_eps", base.layer_norm_eps),
            pad_token_id: usize_of("pad_token_id", base.pad_token_id),
            model_type: str_of("model_type", &base.model_type),
        }
    }

    /// The tokenizer is authoritative for vocabulary size and padding id.
    pub fn with_tokenizer(mut self, tokenizer: &TokenizerInfo) -> Self {
        if let Some(vocab_size) = tokenizer.vocab_size {
            self.vocab_size = vocab_size;
        }
        if let Some(pad) = tokenizer.pad_token_id {
            self.pad_token_id = pad as usize;
        }
        self
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), model_type = %self.model_type, "wrote config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_field_order() {
        let json = serde_json::to_string_pretty(&EncoderConfig::minilm_l6()).unwrap();
        let first = json.lines().nth(1).unwrap();
        let last = json.lines().rev().nth(1).unwrap();
        assert_eq!(first, "  \"vocab_size\": 30522,");
        assert_eq!(last, "  \"model_type\": \"bert\"");
        assert!(json.contains("\"layer_norm_eps\": 1e-12"));
    }

    #[test]
    fn test_from_value_overlays_template() {
        let cfg = EncoderConfig::from_value(&json!({
            "architectures": ["RobertaModel"],
            "hidden_size": 768,
            "num_hidden_layers": 12,
            "intermediate_size": 3072,
            "max_position_embeddings": 514,
            "type_vocab_size": 1,
            "layer_norm_eps": 1e-5,
            "pad_token_id": 1,
            "vocab_size": 50265,
            "model_type": "roberta"
        }));
        assert_eq!(cfg.hidden_size, 768);
        assert_eq!(cfg.num_attention_heads, 12);
        assert_eq!(cfg.hidden_act, "gelu");
        assert_eq!(cfg.pad_token_id, 1);
        assert_eq!(cfg.model_type, "roberta");
        assert!((cfg.layer_norm_eps - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn test_tokenizer_wins() {
        let info = TokenizerInfo {
            vocab_size: Some(250),
            pad_token: Some("[PAD]".into()),
            pad_token_id: Some(3),
        };
        let cfg = EncoderConfig::minilm_l6().with_tokenizer(&info);
        assert_eq!(cfg.vocab_size, 250);
        assert_eq!(cfg.pad_token_id, 3);

        let untouched = EncoderConfig::minilm_l6().with_tokenizer(&TokenizerInfo::default());
        assert_eq!(untouched, EncoderConfig::minilm_l6());
    }

    #[test]
    fn test_loads_as_candle_bert_config() {
        let json = serde_json::to_string(&EncoderConfig::minilm_l6()).unwrap();
        let parsed: Result<candle_transformers::models::bert::Config, _> = serde_json::from_str(&json);
        assert!(parsed.is_ok(), "{:?}", parsed.err());
    }
}
