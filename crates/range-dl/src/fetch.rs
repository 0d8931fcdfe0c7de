//! Transfer dispatch: local copy, whole-body GET, or ranged resumption.

use std::io::ErrorKind;
use std::path::Path;

use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::header::{IF_RANGE, RANGE};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::local::copy_if_changed;
use crate::probe::{probe, RemoteInfo};
use crate::{FetchError, Source};

/// Ranged request size (4 MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Write buffer size for whole-body downloads (2 MB)
const WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Live byte count reported after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

/// How one transfer ended. Failures are values so sibling transfers keep going.
#[derive(Debug)]
pub enum FetchOutcome {
    Complete { bytes: u64 },
    Paused,
    Errored(FetchError),
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, FetchOutcome::Complete { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    chunk_size: u64,
    single_request_threshold: u64,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl Fetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
            single_request_threshold: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Size of each ranged GET. Also moves the single-request threshold
    /// unless it was set explicitly afterwards.
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes.max(1);
        self.single_request_threshold = self.chunk_size;
        self
    }

    /// Resources at or below this size are fetched with one GET.
    pub fn with_single_request_threshold(mut self, bytes: u64) -> Self {
        self.single_request_threshold = bytes;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Metadata probe: size, range support and entity tag.
    pub async fn probe(&self, url: &Url) -> Result<RemoteInfo, FetchError> {
        probe(&self.client, url).await
    }

    /// Bring `destination` up to date with `source`.
    ///
    /// Cancellation is observed before the probe and before every chunk; an
    /// in-flight range request is abandoned without touching the file.
    pub async fn fetch<F>(
        &self,
        source: &Source,
        destination: &Path,
        expected_size: Option<u64>,
        token: &CancellationToken,
        on_progress: F,
    ) -> FetchOutcome
    where
        F: Fn(TransferProgress) + Send + Sync,
    {
        if token.is_cancelled() {
            return FetchOutcome::Paused;
        }

        let result = match source {
            Source::Local(path) => copy_local(path, destination, &on_progress).await,
            Source::Http(url) => {
                self.fetch_http(url, destination, expected_size, token, &on_progress)
                    .await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "fetch_failed: {} -> {} error={}",
                    source,
                    destination.display(),
                    e
                );
                FetchOutcome::Errored(e)
            }
        }
    }

    async fn fetch_http<F>(
        &self,
        url: &Url,
        destination: &Path,
        expected_size: Option<u64>,
        token: &CancellationToken,
        on_progress: &F,
    ) -> Result<FetchOutcome, FetchError>
    where
        F: Fn(TransferProgress) + Send + Sync,
    {
        let info = self.probe(url).await?;
        let total = info.size.or(expected_size);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut written = file_len(destination).await?;

        if let Some(total) = total {
            if total > 0 && written == total {
                debug!("fetch_skip: {} already complete bytes={}", url, total);
                on_progress(TransferProgress {
                    downloaded: written,
                    total: Some(total),
                });
                return Ok(FetchOutcome::Complete { bytes: written });
            }
        }

        let total = match total {
            Some(total) if info.accepts_ranges && total > self.single_request_threshold => total,
            _ => return self.fetch_whole(url, destination, total, token, on_progress).await,
        };

        if written > total {
            warn!(
                "fetch_reset: {} destination larger than source ({} > {})",
                destination.display(),
                written,
                total
            );
            File::create(destination).await?;
            written = 0;
        }

        info!(
            "fetch_ranged: {} resume_from={} total={} chunk={}",
            url, written, total, self.chunk_size
        );
        on_progress(TransferProgress {
            downloaded: written,
            total: Some(total),
        });

        while written < total {
            if token.is_cancelled() {
                debug!("fetch_paused: {} at {}", url, written);
                return Ok(FetchOutcome::Paused);
            }

            let end = (written + self.chunk_size).min(total) - 1;
            let chunk = tokio::select! {
                _ = token.cancelled() => {
                    debug!("fetch_paused: {} in-flight bytes={}-{} dropped", url, written, end);
                    return Ok(FetchOutcome::Paused);
                }
                chunk = self.fetch_range(url, written, end, info.etag.as_deref()) => chunk?,
            };
            append_chunk(destination, &chunk).await?;

            written = file_len(destination).await?;
            on_progress(TransferProgress {
                downloaded: written,
                total: Some(total),
            });
        }

        Ok(FetchOutcome::Complete { bytes: written })
    }

    async fn fetch_range(
        &self,
        url: &Url,
        start: u64,
        end: u64,
        etag: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        debug!("fetch_chunk: {} bytes={}-{}", url, start, end);
        let mut request = self
            .client
            .get(url.clone())
            .header(RANGE, format!("bytes={}-{}", start, end));
        // Weak validators are not allowed in If-Range.
        if let Some(tag) = etag.filter(|tag| !tag.starts_with("W/")) {
            request = request.header(IF_RANGE, tag);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            if status.is_success() {
                return Err(FetchError::RangeNotHonored {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        let expected = end - start + 1;
        if bytes.len() as u64 != expected {
            return Err(FetchError::ShortChunk {
                start,
                end,
                received: bytes.len() as u64,
            });
        }
        Ok(bytes.to_vec())
    }

    async fn fetch_whole<F>(
        &self,
        url: &Url,
        destination: &Path,
        total: Option<u64>,
        token: &CancellationToken,
        on_progress: &F,
    ) -> Result<FetchOutcome, FetchError>
    where
        F: Fn(TransferProgress) + Send + Sync,
    {
        info!("fetch_whole: {} total={:?}", url, total);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut write_buffer = Vec::with_capacity(WRITE_BUFFER_SIZE);
        let mut downloaded: u64 = 0;

        on_progress(TransferProgress {
            downloaded: 0,
            total,
        });

        while let Some(chunk) = stream.next().await {
            if token.is_cancelled() {
                // A partial whole-body file is replaced on the next attempt.
                file.write_all(&write_buffer).await?;
                file.flush().await?;
                debug!("fetch_paused: {} whole-body at {}", url, downloaded);
                return Ok(FetchOutcome::Paused);
            }

            let chunk = chunk?;
            downloaded += chunk.len() as u64;
            write_buffer.extend_from_slice(&chunk);

            if write_buffer.len() >= WRITE_BUFFER_SIZE {
                file.write_all(&write_buffer).await?;
                write_buffer.clear();
                on_progress(TransferProgress { downloaded, total });
            }
        }

        file.write_all(&write_buffer).await?;
        file.flush().await?;
        // A zero length is treated as unknown, as in the resume check.
        if let Some(expected) = total.filter(|expected| *expected > 0 && *expected != downloaded) {
            warn!(
                "fetch_whole: {} size mismatch expected={} received={}",
                url, expected, downloaded
            );
            return Err(FetchError::SizeMismatch {
                url: url.to_string(),
                expected,
                received: downloaded,
            });
        }
        on_progress(TransferProgress {
            downloaded,
            total: total.or(Some(downloaded)),
        });
        Ok(FetchOutcome::Complete { bytes: downloaded })
    }
}

async fn copy_local<F>(
    source: &Path,
    destination: &Path,
    on_progress: &F,
) -> Result<FetchOutcome, FetchError>
where
    F: Fn(TransferProgress) + Send + Sync,
{
    let copy = copy_if_changed(source, destination).await?;
    on_progress(TransferProgress {
        downloaded: copy.bytes(),
        total: Some(copy.bytes()),
    });
    Ok(FetchOutcome::Complete { bytes: copy.bytes() })
}

async fn file_len(path: &Path) -> Result<u64, FetchError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

async fn append_chunk(path: &Path, chunk: &[u8]) -> Result<(), FetchError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(chunk).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}
