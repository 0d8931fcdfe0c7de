use std::path::PathBuf;

use thiserror::Error;

/// Reasons a single transfer can fail. None of these are retried internally.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid source uri: {0}")]
    InvalidSource(String),

    #[error("source file not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("range request to {url} answered with status {status} instead of 206")]
    RangeNotHonored { url: String, status: u16 },

    #[error("short range response for bytes {start}-{end}: received {received} bytes")]
    ShortChunk { start: u64, end: u64, received: u64 },

    #[error("{url} delivered {received} bytes, expected {expected}")]
    SizeMismatch {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
