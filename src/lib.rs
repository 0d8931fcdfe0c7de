//! Resumable download engine for inspection deliverables.
//!
//! Projects are persisted as `info.json` descriptors under a settings root.
//! [`DownloadService`] loads them, keeps at most one background job per
//! project, and drives every inspection through
//! `Loading -> Staged -> Queued -> Processing -> Complete` (or `Paused` /
//! `Errored`), persisting after each transition so a restarted process picks
//! up where it stopped.

pub mod collab;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod inspection;
pub mod jobs;
pub mod paths;
pub mod project;
pub mod service;
pub mod status;
pub mod store;

pub use config::Settings;
pub use service::DownloadService;
