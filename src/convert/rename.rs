/// Removes architecture prefixes from tensor names.
///
/// Every occurrence of each pattern is removed, patterns applied in order,
/// so `["bert.", "model."]` turns `bert.encoder.layer.0.output.dense.weight`
/// into `encoder.layer.0.output.dense.weight`.
#[derive(Debug, Clone, Default)]
pub struct KeyRenamer {
    patterns: Vec<String>,
}

/// The prefixes stripped when exporting BERT-family checkpoints for candle.
/// `roberta.` must come before `bert.`, which it contains.
pub const ENCODER_PREFIXES: [&str; 3] = ["roberta.", "bert.", "model."];

impl KeyRenamer {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn encoder_prefixes() -> Self {
        Self::new(ENCODER_PREFIXES)
    }

    pub fn is_identity(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn apply(&self, key: &str) -> String {
        self.patterns
            .iter()
            .fold(key.to_string(), |acc, p| acc.replace(p.as_str(), ""))
    }
}
