//! Job records and the traits tying the queue to its runner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobKind {
    DownloadProject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueueState {
    #[serde(rename = "enqueued")]
    Enqueued,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "scheduled")]
    Scheduled,
}

impl QueueState {
    pub const ALL: [QueueState; 3] = [
        QueueState::Enqueued,
        QueueState::Processing,
        QueueState::Scheduled,
    ];
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Enqueued => write!(f, "enqueued"),
            QueueState::Processing => write!(f, "processing"),
            QueueState::Scheduled => write!(f, "scheduled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    /// Descriptor path of the target project.
    pub project_path: PathBuf,
    pub state: QueueState,
}

/// How a finished job wants the queue to proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// Run again after the delay.
    Reschedule(Duration),
    Failed(String),
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &JobRecord, token: CancellationToken) -> JobOutcome;
}

/// Typed access to a job store with enqueued, processing and scheduled queues.
pub trait JobSystem: Send + Sync {
    fn jobs(&self, state: QueueState) -> Result<Vec<JobRecord>, JobError>;

    fn enqueue(&self, kind: JobKind, project_path: &Path) -> Result<JobId, JobError>;

    fn schedule(&self, kind: JobKind, project_path: &Path, delay: Duration)
        -> Result<JobId, JobError>;

    /// Remove a waiting job or cancel a running one. A running job stays
    /// listed as processing until its runner returns.
    fn delete(&self, id: JobId) -> Result<bool, JobError>;
}
