//! File-name and path helpers shared by loading, materialization and jobs.

use std::path::{Path, PathBuf};

const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace characters that are not allowed in a file or directory name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_FILE_NAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Local file name for a media URI or bare name: last path segment,
/// percent-decoded, without query or fragment.
pub fn file_name_from_uri(uri: &str) -> String {
    let without_suffix = uri
        .split(['?', '#'])
        .next()
        .unwrap_or(uri)
        .trim_end_matches(['/', '\\']);
    let segment = without_suffix
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_suffix);
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

/// Default per-file download path inside the inspection directory.
pub fn default_download_path(uri: &str) -> String {
    format!("./{}", file_name_from_uri(uri))
}

/// Join a file's download path onto its inspection directory unless it is
/// already absolute.
pub fn resolve_download_path(inspection_dir: &Path, download_path: &str) -> PathBuf {
    let path = Path::new(download_path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let relative = download_path
        .strip_prefix("./")
        .or_else(|| download_path.strip_prefix(".\\"))
        .unwrap_or(download_path);
    inspection_dir.join(relative)
}

/// Project paths are compared case-insensitively.
pub fn same_path(a: &Path, b: &Path) -> bool {
    path_key(a) == path_key(b)
}

pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}
