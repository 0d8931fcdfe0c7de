//! Inspection payload resolution and schema pack retrieval.

mod loader;
mod packs;

pub use loader::{InspectionLoader, Resolution};
pub use packs::HttpPackSource;
