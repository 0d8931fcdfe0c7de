use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::FetchError;

/// Where a transfer reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local(PathBuf),
    Http(Url),
}

impl Source {
    /// Parse a file name into a transfer source.
    ///
    /// Accepts `http`, `https` and `file` URIs as well as absolute filesystem
    /// paths. Relative names and other schemes are rejected.
    pub fn parse(value: &str) -> Result<Self, FetchError> {
        let path = Path::new(value);
        if path.is_absolute() {
            return Ok(Source::Local(path.to_path_buf()));
        }

        let url = Url::parse(value).map_err(|_| FetchError::InvalidSource(value.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(Source::Http(url)),
            "file" => url
                .to_file_path()
                .map(Source::Local)
                .map_err(|_| FetchError::InvalidSource(value.to_string())),
            _ => Err(FetchError::InvalidSource(value.to_string())),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Http(url) => write!(f, "{}", url),
        }
    }
}
