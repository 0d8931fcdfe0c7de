//! Project, inspection and file model.
//!
//! Projects own inspections which own files. Totals, progress and the project
//! rollup state are computed on demand from that tree and written into the
//! descriptor for readers, but never read back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::lenient;
use super::{InspectionState, Trigger};
use crate::error::TransitionError;
use crate::paths::sanitize_file_name;

/// Extension of the locally materialized inspection document.
pub const SENTINEL_EXTENSION: &str = ".ptdx";

/// Payload key naming the schema pack.
pub const PACK_ID_KEY: &str = "$packId";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileEntry {
    /// URI or bare file name.
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub downloaded_size: u64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub download_path: Option<String>,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size,
            ..Self::default()
        }
    }

    /// The inspection document is produced locally, never transferred.
    pub fn is_sentinel(&self) -> bool {
        self.name
            .to_ascii_lowercase()
            .ends_with(SENTINEL_EXTENSION)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Inspection {
    #[serde(default, deserialize_with = "lenient::state")]
    pub state: InspectionState,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    /// Display name of the owning project.
    #[serde(default, deserialize_with = "lenient::string")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "lenient::path")]
    pub download_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub expanded: bool,
    #[serde(default, deserialize_with = "lenient::payload")]
    pub json: Value,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub files: Vec<FileEntry>,
    #[serde(default, deserialize_with = "lenient::path")]
    pub data_complete_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "lenient::path")]
    pub report_complete_path: Option<PathBuf>,
    #[serde(rename = "ExchangeDBCompletePath", default, deserialize_with = "lenient::path")]
    pub exchange_complete_path: Option<PathBuf>,
}

impl Inspection {
    pub fn new(name: impl Into<String>, download_path: PathBuf, payload: Value) -> Self {
        Self {
            name: name.into(),
            download_path: Some(download_path),
            json: payload,
            ..Self::default()
        }
    }

    /// Apply `trigger`, returning the new state.
    pub fn fire(&mut self, trigger: Trigger) -> Result<InspectionState, TransitionError> {
        let next = self.state.apply(trigger).ok_or(TransitionError {
            from: self.state,
            trigger,
        })?;
        if trigger == Trigger::Reloaded {
            self.files.clear();
        }
        self.state = next;
        Ok(next)
    }

    /// Schema pack named by the payload.
    pub fn pack_id(&self) -> Option<Uuid> {
        self.json
            .get(PACK_ID_KEY)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn has_payload(&self) -> bool {
        match &self.json {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().filter_map(|f| f.size).sum()
    }

    pub fn downloaded_size(&self) -> u64 {
        self.files.iter().map(|f| f.downloaded_size).sum()
    }

    /// Fraction of expected bytes on disk, 1.0 once complete.
    pub fn progress(&self) -> f64 {
        if self.state == InspectionState::Complete {
            return 1.0;
        }
        let total = self.total_size();
        if total == 0 {
            return 0.0;
        }
        (self.downloaded_size() as f64 / total as f64).min(1.0)
    }

    /// Files that go through the transfer phase.
    pub fn transferable_files(&self) -> impl Iterator<Item = (usize, &FileEntry)> {
        self.files.iter().enumerate().filter(|(_, f)| !f.is_sentinel())
    }
}

impl Serialize for Inspection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Inspection", 13)?;
        s.serialize_field("State", &self.state)?;
        s.serialize_field("TotalSize", &self.total_size())?;
        s.serialize_field("Name", &self.name)?;
        s.serialize_field("Project", &self.project)?;
        s.serialize_field("DownloadPath", &self.download_path)?;
        s.serialize_field("Size", &self.downloaded_size())?;
        s.serialize_field("Progress", &self.progress())?;
        s.serialize_field("Expanded", &self.expanded)?;
        s.serialize_field("Json", &self.json)?;
        s.serialize_field("Files", &self.files)?;
        s.serialize_field("DataCompletePath", &self.data_complete_path)?;
        s.serialize_field("ReportCompletePath", &self.report_complete_path)?;
        s.serialize_field("ExchangeDBCompletePath", &self.exchange_complete_path)?;
        s.end()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Project {
    #[serde(default = "Uuid::new_v4", deserialize_with = "lenient::identity")]
    pub id: Uuid,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub confirmation_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::path")]
    pub download_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub deliverable_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::object")]
    pub additional_properties: Map<String, Value>,
    #[serde(
        rename = "CombinedExchangeGenerate",
        alias = "CombinedNASSCOExchangeGenerate",
        default,
        deserialize_with = "lenient::flag"
    )]
    pub combined_exchange: bool,
    #[serde(default, deserialize_with = "lenient::uuid_list")]
    pub combined_report_ids: Vec<Uuid>,
    #[serde(default, deserialize_with = "lenient::uuid_list")]
    pub individual_report_ids: Vec<Uuid>,
    #[serde(
        rename = "IndividualExchangeGenerate",
        alias = "IndividualNASSCOExchangeGenerate",
        default,
        deserialize_with = "lenient::flag"
    )]
    pub individual_exchange: bool,
    #[serde(default, deserialize_with = "lenient::seq")]
    pub inspections: Vec<Inspection>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            confirmation_time: None,
            download_path: None,
            deliverable_name: None,
            additional_properties: Map::new(),
            combined_exchange: false,
            combined_report_ids: Vec::new(),
            individual_report_ids: Vec::new(),
            individual_exchange: false,
            inspections: Vec::new(),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.inspections.iter().map(Inspection::total_size).sum()
    }

    /// Rollup of inspection states.
    pub fn state(&self) -> InspectionState {
        let states = || self.inspections.iter().map(|i| i.state);
        if states().any(|s| s == InspectionState::Errored) {
            InspectionState::Errored
        } else if states().all(|s| s == InspectionState::Complete) {
            InspectionState::Complete
        } else if states().any(|s| s == InspectionState::Paused) {
            InspectionState::Paused
        } else {
            InspectionState::Processing
        }
    }

    /// Completed steps over expected steps: one per inspection, plus one per
    /// configured artifact. Artifacts count once their file exists.
    pub fn progress(&self) -> f64 {
        let mut expected = self.inspections.len();
        let mut done = self
            .inspections
            .iter()
            .filter(|i| i.state == InspectionState::Complete)
            .count();

        let mut count_artifact = |path: Option<&Path>| {
            expected += 1;
            if path.is_some_and(Path::exists) {
                done += 1;
            }
        };
        for inspection in &self.inspections {
            if !self.individual_report_ids.is_empty() {
                count_artifact(inspection.report_complete_path.as_deref());
            }
            if self.individual_exchange {
                count_artifact(inspection.exchange_complete_path.as_deref());
            }
        }
        if !self.combined_report_ids.is_empty() {
            count_artifact(self.combined_report_path().as_deref());
        }
        if self.combined_exchange {
            count_artifact(self.combined_exchange_path().as_deref());
        }

        if expected == 0 {
            return 0.0;
        }
        done as f64 / expected as f64
    }

    fn artifact_stem(&self, fallback: &str) -> String {
        let preferred = self
            .deliverable_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(self.name.as_str()).filter(|s| !s.trim().is_empty()))
            .unwrap_or(fallback);
        sanitize_file_name(preferred)
    }

    pub fn combined_report_path(&self) -> Option<PathBuf> {
        let root = self.download_path.as_ref()?;
        Some(root.join(format!("{}.pdf", self.artifact_stem("Project report"))))
    }

    pub fn combined_exchange_path(&self) -> Option<PathBuf> {
        let root = self.download_path.as_ref()?;
        Some(root.join(format!("{}.mdb", self.artifact_stem("Exchange"))))
    }
}
