//! Project model, descriptor format and inspection state machine.

mod descriptor;
mod lenient;
mod state;
mod types;

pub use descriptor::{parse_descriptor, render_descriptor, DESCRIPTOR_FILE_NAME};
pub use state::{InspectionState, Trigger};
pub use types::{FileEntry, Inspection, Project, PACK_ID_KEY, SENTINEL_EXTENSION};
