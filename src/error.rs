//! Error types for every layer of the engine.
//!
//! File failures aggregate into [`InspectionError::FilesFailed`], and
//! inspection failures aggregate into [`DownloadError::InspectionsFailed`].

use std::path::PathBuf;
use std::time::Duration;

use range_dl::FetchError;
use thiserror::Error;
use uuid::Uuid;

use crate::project::{InspectionState, Trigger};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("descriptor io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("descriptor json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("project directory already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
}

#[derive(Debug, Error)]
#[error("inspection in state {from} does not accept {trigger:?}")]
pub struct TransitionError {
    pub from: InspectionState,
    pub trigger: Trigger,
}

/// Failures reported by collaborators (registry, factory, documents, pack source).
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("{0}")]
    Failed(String),

    #[error("pack {0} is not installed")]
    PackMissing(Uuid),

    #[error("no pack endpoint configured")]
    NoPackEndpoint,

    #[error("pack endpoint returned status {0}")]
    PackStatus(u16),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by report and exchange producers.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("validation failed: {}", .problems.join("; "))]
    InvalidData { problems: Vec<String> },

    #[error("{0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("inspection payload is empty")]
    EmptyPayload,

    #[error("inspection payload has no valid $packId")]
    MissingPackId,

    #[error("inspection #{0} no longer exists")]
    InspectionMissing(usize),

    #[error("load cancelled")]
    Cancelled,

    #[error(transparent)]
    Collab(#[from] CollabError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One file's failure inside an inspection.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("{file}: {source}")]
    Fetch {
        file: String,
        #[source]
        source: FetchError,
    },

    #[error("{file}: no download path")]
    NoDownloadPath { file: String },
}

#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("inspection {name} is {state} and cannot be processed this pass")]
    NotActionable {
        name: String,
        state: InspectionState,
    },

    #[error("inspection {name}: {} file(s) failed: {}", .errors.len(), join(.errors))]
    FilesFailed { name: String, errors: Vec<FileError> },

    #[error("inspection {name} has no download path")]
    NoDownloadPath { name: String },

    #[error("inspection {name}: media not on disk: {}", .missing.join(", "))]
    MediaMissing { name: String, missing: Vec<String> },

    #[error("inspection {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: LoadError,
    },

    #[error("inspection {name}: {source}")]
    Collab {
        name: String,
        #[source]
        source: CollabError,
    },

    #[error("inspection {name}: {source}")]
    Artifact {
        name: String,
        #[source]
        source: ArtifactError,
    },

    #[error("inspection {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("project {project}: {} inspection(s) failed: {}", .errors.len(), join(.errors))]
    InspectionsFailed {
        project: String,
        errors: Vec<InspectionError>,
    },

    #[error("project {project}: combined artifact failed: {source}")]
    CombinedArtifact {
        project: String,
        #[source]
        source: ArtifactError,
    },

    #[error("project {project}: {source}")]
    Collab {
        project: String,
        #[source]
        source: CollabError,
    },
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job storage unavailable: {0}")]
    Unavailable(String),

    #[error("jobs for {} still present after {waited:?}", .path.display())]
    StillRunning { path: PathBuf, waited: Duration },

    #[error("project {} is not loaded", .0.display())]
    UnknownProject(PathBuf),

    #[error(transparent)]
    Load(#[from] LoadError),
}

fn join<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
