//! Progress and status events published to subscribers.

use serde::Serialize;
use uuid::Uuid;

use crate::project::InspectionState;

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress event payload for one file
#[derive(Debug, Clone, Serialize)]
pub struct FileProgress {
    pub project_id: Uuid,
    pub inspection: usize,
    pub file: String,
    pub percent: u32,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Status change event payload for one inspection
#[derive(Debug, Clone, Serialize)]
pub struct InspectionStatusChanged {
    pub project_id: Uuid,
    pub inspection: usize,
    pub name: String,
    pub status: InspectionState,
    pub error: Option<String>,
}

/// Rollup change event payload for a project
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatusChanged {
    pub project_id: Uuid,
    pub status: InspectionState,
    pub progress: f64,
    pub total_bytes: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DownloadEvent {
    FileProgress(FileProgress),
    InspectionStatus(InspectionStatusChanged),
    ProjectStatus(ProjectStatusChanged),
}
