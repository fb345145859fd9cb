use crate::error::PrepError;
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct Downloader {
    client: Client,
    token: Option<String>,
    num_threads: usize,
    chunk_size: u64,
}

impl Downloader {
    pub fn new(num_threads: usize, chunk_size: u64, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("modelprep/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            token: None,
            num_threads: num_threads.max(1),
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Downloads `url` into `dest_path` and returns the number of bytes written.
    ///
    /// Data lands in a sibling `.part` file which is renamed over `dest_path`
    /// only after the transfer (and the digest check, when `expected_sha256`
    /// is given) succeeds.
    pub async fn download<F>(
        &self,
        url: &str,
        dest_path: &Path,
        expected_sha256: Option<&str>,
        size_hint: Option<u64>,
        progress_callback: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let part_path = part_path(dest_path);
        let result = self
            .download_to(url, &part_path, size_hint, progress_callback)
            .await;

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        if let Some(expected) = expected_sha256 {
            if let Err(e) = verify_digest(&part_path, expected).await {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(match e.downcast::<PrepError>() {
                    Ok(PrepError::DigestMismatch { expected, actual, .. }) => {
                        PrepError::DigestMismatch {
                            path: dest_path.to_path_buf(),
                            expected,
                            actual,
                        }
                        .into()
                    }
                    Ok(other) => other.into(),
                    Err(other) => other,
                });
            }
        }

        tokio::fs::rename(&part_path, dest_path)
            .await
            .with_context(|| format!("failed to move download into {}", dest_path.display()))?;

        Ok(written)
    }

    async fn download_to<F>(
        &self,
        url: &str,
        part_path: &Path,
        size_hint: Option<u64>,
        progress_callback: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        let (total_size, accepts_ranges) = self.probe(url, size_hint).await;

        match total_size {
            Some(total) if accepts_ranges && total > self.chunk_size => {
                tracing::debug!(url, total, chunks = total.div_ceil(self.chunk_size), "ranged download");
                self.download_ranged(url, part_path, total, progress_callback).await
            }
            _ => self.download_stream(url, part_path, total_size, progress_callback).await,
        }
    }

    /// HEAD the resource. A failed probe is not fatal: the GET that follows
    /// reports the real error.
    async fn probe(&self, url: &str, size_hint: Option<u64>) -> (Option<u64>, bool) {
        let res = match self.authorize(self.client.head(url)).send().await {
            Ok(res) if res.status().is_success() => res,
            _ => return (size_hint, false),
        };

        let total = res
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .or(size_hint);

        let accepts_ranges = res
            .headers()
            .get(header::ACCEPT_RANGES)
            .map(|v| v == "bytes")
            .unwrap_or(false);

        (total, accepts_ranges)
    }

    async fn download_ranged<F>(
        &self,
        url: &str,
        part_path: &Path,
        total_size: u64,
        progress_callback: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        let file = File::create(part_path)
            .with_context(|| format!("failed to create {}", part_path.display()))?;
        file.set_len(total_size)?;
        let shared_file = Arc::new(Mutex::new(file));

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < total_size {
            let end = (start + self.chunk_size - 1).min(total_size - 1);
            chunks.push((start, end));
            start += self.chunk_size;
        }

        let completed_size = Arc::new(Mutex::new(0u64));
        let progress_callback = Arc::new(Mutex::new(progress_callback));

        let mut stream = futures::stream::iter(chunks)
            .map(|(start, end)| {
                let request = self
                    .authorize(self.client.get(url))
                    .header(header::RANGE, format!("bytes={}-{}", start, end));
                let url = url.to_string();
                let shared_file = Arc::clone(&shared_file);
                let completed_size = Arc::clone(&completed_size);
                let progress_callback = Arc::clone(&progress_callback);

                async move {
                    let res = request.send().await?;
                    if res.status() != StatusCode::PARTIAL_CONTENT {
                        return Err(PrepError::HubStatus {
                            url,
                            status: res.status().as_u16(),
                        }
                        .into());
                    }

                    let mut body = res.bytes_stream();
                    let mut offset = start;

                    while let Some(item) = body.next().await {
                        let chunk = item?;
                        let size = chunk.len() as u64;
                        if offset + size > end + 1 {
                            return Err(anyhow!("server sent more than the requested range {}-{}", start, end));
                        }

                        {
                            let mut f = shared_file.lock();
                            f.seek(SeekFrom::Start(offset))?;
                            f.write_all(&chunk)?;
                        }

                        offset += size;
                        let mut completed = completed_size.lock();
                        *completed += size;

                        let mut cb = progress_callback.lock();
                        (*cb)(*completed, total_size);
                    }

                    if offset != end + 1 {
                        return Err(anyhow!("range {}-{} ended early at {}", start, end, offset));
                    }
                    Ok::<(), anyhow::Error>(())
                }
            })
            .buffer_unordered(self.num_threads);

        while let Some(res) = stream.next().await {
            res?;
        }

        shared_file.lock().flush()?;
        let completed = *completed_size.lock();
        Ok(completed)
    }

    async fn download_stream<F>(
        &self,
        url: &str,
        part_path: &Path,
        total_size: Option<u64>,
        mut progress_callback: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        let res = self.authorize(self.client.get(url)).send().await?;
        if !res.status().is_success() {
            return Err(PrepError::HubStatus {
                url: url.to_string(),
                status: res.status().as_u16(),
            }
            .into());
        }

        let total = res.content_length().or(total_size).unwrap_or(0);
        let mut file = File::create(part_path)
            .with_context(|| format!("failed to create {}", part_path.display()))?;
        let mut body = res.bytes_stream();
        let mut completed = 0u64;

        while let Some(item) = body.next().await {
            let chunk = item?;
            file.write_all(&chunk)?;
            completed += chunk.len() as u64;
            (progress_callback)(completed, total.max(completed));
        }

        file.flush()?;
        Ok(completed)
    }
}

fn part_path(dest_path: &Path) -> PathBuf {
    let mut name = dest_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest_path.with_file_name(name)
}

/// Hex-encoded sha256 of a file, computed off the async runtime.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let path = path.to_owned();

    tokio::task::spawn_blocking(move || sha256_file_blocking(&path)).await?
}

pub fn sha256_file_blocking(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub async fn verify_digest(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path).await?;
    let expected = expected.trim_start_matches("sha256:").to_ascii_lowercase();

    if actual != expected {
        return Err(PrepError::DigestMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/tmp/out/model.safetensors")),
            PathBuf::from("/tmp/out/model.safetensors.part")
        );
    }

    #[tokio::test]
    async fn test_verify_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        let hello = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(sha256_file(&path).await.unwrap(), hello);
        verify_digest(&path, &format!("sha256:{}", hello)).await.unwrap();

        let err = verify_digest(&path, "00ff").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_new_clamps_zero_values() {
        let d = Downloader::new(0, 0, Duration::from_secs(5)).unwrap();
        assert_eq!(d.num_threads, 1);
        assert_eq!(d.chunk_size, 1);
    }
}
