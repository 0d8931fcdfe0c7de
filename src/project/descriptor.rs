//! `info.json` reading and writing.

use serde_json::Value;

use super::Project;

/// Descriptor file inside every project directory.
pub const DESCRIPTOR_FILE_NAME: &str = "info.json";

/// Parse a descriptor. Only invalid JSON or a non-object document is an
/// error; malformed fields and inspections are skipped.
pub fn parse_descriptor(text: &str) -> Result<Project, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(serde::de::Error::custom("descriptor is not a JSON object"));
    }
    serde_json::from_value(value)
}

pub fn render_descriptor(project: &Project) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(project)
}
