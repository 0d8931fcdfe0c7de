//! Outcomes of a download pass

use serde::Serialize;

/// How one `download_project` pass ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectOutcome {
    /// Every inspection complete and combined artifacts produced.
    Complete,
    /// Cancellation observed; the next pass resumes.
    Paused,
    /// The project left the collection before the pass started.
    Missing,
    /// The project's download root does not exist right now.
    RootUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionOutcome {
    Complete,
    AlreadyComplete,
    Paused,
}
