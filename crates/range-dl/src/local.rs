use std::io::ErrorKind;
use std::path::Path;

use log::debug;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::FetchError;

/// Read buffer for hashing (1 MB)
const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Result of a local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCopy {
    Copied { bytes: u64 },
    Unchanged { bytes: u64 },
}

impl LocalCopy {
    pub fn bytes(&self) -> u64 {
        match self {
            LocalCopy::Copied { bytes } | LocalCopy::Unchanged { bytes } => *bytes,
        }
    }
}

/// Hex-encoded SHA-256 of a file's content.
pub async fn file_digest(path: &Path) -> Result<String, FetchError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Copy `source` to `destination` unless the destination already holds the
/// same content. An existing, different destination is overwritten.
pub async fn copy_if_changed(source: &Path, destination: &Path) -> Result<LocalCopy, FetchError> {
    let source_len = match tokio::fs::metadata(source).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return Err(FetchError::MissingSource(source.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(FetchError::MissingSource(source.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    match tokio::fs::metadata(destination).await {
        Ok(meta) if meta.len() == source_len => {
            if file_digest(source).await? == file_digest(destination).await? {
                debug!("local_copy_skip: {} unchanged", destination.display());
                return Ok(LocalCopy::Unchanged { bytes: source_len });
            }
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = tokio::fs::copy(source, destination).await?;
    debug!(
        "local_copy: {} -> {} bytes={}",
        source.display(),
        destination.display(),
        bytes
    );
    Ok(LocalCopy::Copied { bytes })
}
