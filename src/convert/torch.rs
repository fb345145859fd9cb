use super::Weights;
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Loads a PyTorch `state_dict` checkpoint.
///
/// Only the zip-based format written by `torch.save` since 1.6 is supported;
/// the legacy tar/pickle stream is rejected up front.
pub fn load(path: &Path) -> Result<Weights> {
    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .with_context(|| format!("failed to read {}", path.display()))?;

    if &magic != ZIP_MAGIC {
        bail!(
            "{} is not a zip-based PyTorch checkpoint; re-save it with torch>=1.6",
            path.display()
        );
    }

    let tensors = candle_core::pickle::read_all(path)
        .with_context(|| format!("failed to unpickle {}", path.display()))?;

    if tensors.is_empty() {
        bail!("{} contains no tensors", path.display());
    }

    Ok(tensors.into_iter().collect())
}
