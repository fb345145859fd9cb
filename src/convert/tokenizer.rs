use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Files a tokenizer may be split across; whichever exist are carried over.
pub const TOKENIZER_FILES: &[&str] = &[
    "tokenizer.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
    "added_tokens.json",
    "vocab.txt",
    "vocab.json",
    "merges.txt",
    "sentencepiece.bpe.model",
    "spiece.model",
];

/// Facts about a tokenizer that end up in the generated model config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizerInfo {
    pub vocab_size: Option<usize>,
    pub pad_token: Option<String>,
    pub pad_token_id: Option<u32>,
}

impl TokenizerInfo {
    pub fn read(dir: &Path) -> Result<Self> {
        let tokenizer = read_json(&dir.join("tokenizer.json"))?;
        let vocab_lines = read_vocab_txt(&dir.join("vocab.txt"))?;

        let pad_token = [
            dir.join("tokenizer_config.json"),
            dir.join("special_tokens_map.json"),
        ]
        .iter()
        .filter_map(|p| read_json(p).ok().flatten())
        .find_map(|v| v.get("pad_token").and_then(token_content));

        let vocab_size = tokenizer
            .as_ref()
            .and_then(|t| t.get("model"))
            .and_then(model_vocab_size)
            .or_else(|| vocab_lines.as_ref().map(|l| l.len()));

        let pad_token_id = pad_token.as_deref().and_then(|pad| {
            tokenizer
                .as_ref()
                .and_then(|t| token_id(t, pad))
                .or_else(|| {
                    vocab_lines
                        .as_ref()
                        .and_then(|l| l.iter().position(|tok| tok == pad))
                        .map(|i| i as u32)
                })
        });

        Ok(Self {
            vocab_size,
            pad_token,
            pad_token_id,
        })
    }
}

/// Copies the tokenizer files present in `src` into `dst`.
pub fn copy_files(src: &Path, dst: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;

    let mut copied = Vec::new();
    for name in TOKENIZER_FILES {
        let from = src.join(name);
        if !from.is_file() {
            continue;
        }
        let to = dst.join(name);
        if from != to {
            std::fs::copy(&from, &to)
                .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
        }
        copied.push(to);
    }

    if copied.is_empty() {
        tracing::warn!(src = %src.display(), "no tokenizer files found");
    } else {
        tracing::debug!(count = copied.len(), dst = %dst.display(), "copied tokenizer files");
    }
    Ok(copied)
}

fn read_json(path: &Path) -> Result<Option<Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    Ok(Some(value))
}

fn read_vocab_txt(path: &Path) -> Result<Option<Vec<String>>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Some(content.lines().map(|l| l.to_string()).collect()))
}

/// `pad_token` is either a bare string or an AddedToken object.
fn token_content(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("content").and_then(|c| c.as_str()).map(String::from),
        _ => None,
    }
}

/// Base vocabulary size, added tokens excluded.
fn model_vocab_size(model: &Value) -> Option<usize> {
    match model.get("vocab")? {
        Value::Object(map) => Some(map.len()),
        // Unigram stores `[piece, score]` pairs.
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn token_id(tokenizer: &Value, token: &str) -> Option<u32> {
    let added = tokenizer
        .get("added_tokens")
        .and_then(|a| a.as_array())
        .and_then(|tokens| {
            tokens.iter().find_map(|t| {
                (t.get("content")?.as_str()? == token)
                    .then(|| t.get("id")?.as_u64())
                    .flatten()
            })
        });
    if let Some(id) = added {
        return Some(id as u32);
    }

    match tokenizer.get("model")?.get("vocab")? {
        Value::Object(map) => map.get(token)?.as_u64().map(|id| id as u32),
        Value::Array(items) => items
            .iter()
            .position(|item| item.get(0).and_then(|p| p.as_str()) == Some(token))
            .map(|i| i as u32),
        _ => None,
    }
}
