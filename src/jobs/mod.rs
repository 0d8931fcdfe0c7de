//! Background jobs: an in-process queue and the per-project dedup bridge.

mod bridge;
mod queue;
mod types;

pub use bridge::JobBridge;
pub use queue::JobQueue;
pub use types::{JobId, JobKind, JobOutcome, JobRecord, JobRunner, JobSystem, QueueState};
