//! Project download orchestration
//!
//! A pass over one project:
//! - resolves inspections still loading
//! - transfers every file of each actionable inspection through [`range_dl::Fetcher`]
//! - materializes the inspection document and its individual artifacts
//! - produces combined artifacts once every inspection is complete

mod artifacts;
mod orchestrator;
mod types;

pub use orchestrator::Orchestrator;
pub use types::{InspectionOutcome, ProjectOutcome};
