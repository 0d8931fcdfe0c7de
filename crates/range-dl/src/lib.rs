//! Resumable single-resource transfer.
//!
//! A [`Fetcher`] moves one resource, either an `http(s)://` URL or a local
//! file, to a destination path. HTTP resources above the single-request
//! threshold are pulled with sequential `Range` requests that are appended in
//! offset order, so a killed process resumes from the last fully written byte.
//! Local sources are copied only when the destination content differs.

mod error;
mod fetch;
mod local;
mod probe;
mod source;

pub use error::FetchError;
pub use fetch::{FetchOutcome, Fetcher, TransferProgress, DEFAULT_CHUNK_SIZE};
pub use local::{copy_if_changed, file_digest, LocalCopy};
pub use probe::RemoteInfo;
pub use source::Source;
