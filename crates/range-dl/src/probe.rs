use log::debug;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, ETAG, RANGE};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;

use crate::FetchError;

/// What a metadata probe learned about a remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteInfo {
    pub size: Option<u64>,
    pub accepts_ranges: bool,
    pub etag: Option<String>,
}

/// HEAD the resource; fall back to a one-byte range probe when the server
/// refuses HEAD or omits Content-Length.
pub(crate) async fn probe(client: &Client, url: &Url) -> Result<RemoteInfo, FetchError> {
    let response = client.head(url.clone()).send().await?;
    let status = response.status();

    if status.is_success() {
        let info = info_from_headers(response.headers());
        if info.size.is_some() {
            return Ok(info);
        }
    } else if status != StatusCode::METHOD_NOT_ALLOWED && status != StatusCode::NOT_IMPLEMENTED {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    debug!("probe_fallback: {} head_status={}", url, status);
    range_probe(client, url).await
}

async fn range_probe(client: &Client, url: &Url) -> Result<RemoteInfo, FetchError> {
    let response = client
        .get(url.clone())
        .header(RANGE, "bytes=0-0")
        .send()
        .await?;
    let status = response.status();

    if status == StatusCode::PARTIAL_CONTENT {
        let headers = response.headers();
        let size = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(total_from_content_range);
        return Ok(RemoteInfo {
            size,
            accepts_ranges: true,
            etag: header_string(headers, ETAG),
        });
    }

    if status.is_success() {
        // Full body on offer; drop it unread.
        let mut info = info_from_headers(response.headers());
        info.accepts_ranges = false;
        return Ok(info);
    }

    Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    })
}

fn info_from_headers(headers: &HeaderMap) -> RemoteInfo {
    RemoteInfo {
        size: header_string(headers, CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok()),
        accepts_ranges: headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")))
            .unwrap_or(false),
        etag: header_string(headers, ETAG),
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `bytes 0-0/12345` -> `12345`; unknown totals (`*`) yield `None`.
fn total_from_content_range(value: &str) -> Option<u64> {
    let total = value.rsplit('/').next()?.trim();
    if total == "*" {
        return None;
    }
    total.parse::<u64>().ok()
}
