//! Inspection lifecycle: states, triggers and the allowed transitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InspectionState {
    /// Payload is being resolved and files enumerated.
    #[default]
    Loading,
    Queued,
    Staged,
    Processing,
    Paused,
    Complete,
    Errored,
}

/// Events that move an inspection between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Payload resolved and file list known.
    Resolved,
    /// Payload resolution failed.
    ResolveFailed,
    /// A project job was created for the owning project.
    Enqueued,
    /// File transfer started.
    Started,
    /// Every file and artifact is in place.
    Finished,
    /// A file or artifact step failed.
    Failed,
    /// Cancellation observed.
    Interrupted,
    /// Explicit user restart.
    Restarted,
    /// Explicit user reload; file entries are cleared.
    Reloaded,
}

impl InspectionState {
    /// Next state for `trigger`, or `None` when the transition is not allowed.
    pub fn apply(self, trigger: Trigger) -> Option<InspectionState> {
        use InspectionState::*;
        use Trigger::*;

        match (self, trigger) {
            (Loading, Resolved) => Some(Staged),
            (Loading, ResolveFailed) => Some(Errored),
            (Staged | Queued | Processing | Paused, Enqueued) => Some(Queued),
            (Staged | Queued | Processing | Paused, Started) => Some(Processing),
            (Processing, Finished) => Some(Complete),
            (Loading | Staged | Queued | Processing | Paused | Errored, Failed) => Some(Errored),
            // A cancelled load stays Loading so the next pass resolves it again.
            (Staged | Queued | Processing | Paused, Interrupted) => Some(Paused),
            (Staged | Queued | Processing | Paused | Errored, Restarted) => Some(Staged),
            (_, Reloaded) => Some(Loading),
            _ => None,
        }
    }

    /// Whether the orchestrator may start transferring files.
    pub fn is_actionable(self) -> bool {
        matches!(
            self,
            InspectionState::Queued
                | InspectionState::Staged
                | InspectionState::Processing
                | InspectionState::Paused
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        let state = match value.trim().to_ascii_lowercase().as_str() {
            "loading" => InspectionState::Loading,
            "queued" => InspectionState::Queued,
            "staged" => InspectionState::Staged,
            "processing" => InspectionState::Processing,
            "paused" => InspectionState::Paused,
            "complete" => InspectionState::Complete,
            "errored" => InspectionState::Errored,
            _ => return None,
        };
        Some(state)
    }
}

impl std::fmt::Display for InspectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InspectionState::Loading => write!(f, "loading"),
            InspectionState::Queued => write!(f, "queued"),
            InspectionState::Staged => write!(f, "staged"),
            InspectionState::Processing => write!(f, "processing"),
            InspectionState::Paused => write!(f, "paused"),
            InspectionState::Complete => write!(f, "complete"),
            InspectionState::Errored => write!(f, "errored"),
        }
    }
}

impl From<String> for InspectionState {
    fn from(value: String) -> Self {
        InspectionState::parse(&value).unwrap_or_default()
    }
}
