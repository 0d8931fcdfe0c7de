//! Seams to the collaborators the engine drives but does not implement:
//! schema packs, inspection documents and artifact producers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ArtifactError, CollabError};
use crate::inspection::HttpPackSource;

/// A locally installed schema pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pack {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// Installed schema packs.
pub trait SchemaRegistry: Send + Sync {
    /// Highest installed version of `id`.
    fn find(&self, id: Uuid) -> Option<Pack>;

    /// Install a downloaded pack file and return the installed pack.
    fn install(&self, file: &Path) -> Result<Pack, CollabError>;
}

/// Where missing packs are downloaded from.
#[async_trait]
pub trait PackSource: Send + Sync {
    async fn fetch_pack(
        &self,
        id: Uuid,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<(), CollabError>;
}

/// A media file referenced by an inspection document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub uri: String,
    /// Set when the media already exists on this machine.
    pub local_path: Option<PathBuf>,
    pub length: Option<u64>,
}

/// Turns a raw payload into a document, given its schema pack.
pub trait InspectionFactory: Send + Sync {
    fn open(&self, pack: &Pack, payload: &Value) -> Result<Box<dyn InspectionDocument>, CollabError>;
}

/// A deserialized inspection.
pub trait InspectionDocument: Send + Sync {
    /// File stem of the materialized document, without extension.
    fn file_stem(&self) -> String;

    fn folder_name(&self) -> String;

    /// Grouping path segments; empty when the inspection is not grouped.
    fn folder_group(&self) -> Vec<String>;

    fn media(&self) -> Vec<MediaReference>;

    /// Point every media reference at `rewrite(reference)`.
    fn relocate_media(&mut self, rewrite: &dyn Fn(&MediaReference) -> String);

    fn save(&self, path: &Path) -> Result<(), CollabError>;

    /// File name for an individual report of this inspection.
    fn default_report_name(&self) -> String;
}

/// Report generator.
#[async_trait]
pub trait ReportProducer: Send + Sync {
    async fn individual(
        &self,
        document: &dyn InspectionDocument,
        report_ids: &[Uuid],
        destination: &Path,
    ) -> Result<(), ArtifactError>;

    async fn combined(
        &self,
        documents: &[&dyn InspectionDocument],
        report_ids: &[Uuid],
        destination: &Path,
    ) -> Result<(), ArtifactError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationProblem {
    pub severity: Severity,
    pub description: String,
}

/// Regulatory exchange database exporter.
#[async_trait]
pub trait ExchangeProducer: Send + Sync {
    async fn validate(
        &self,
        document: &dyn InspectionDocument,
    ) -> Result<Vec<ValidationProblem>, ArtifactError>;

    async fn export(
        &self,
        document: &dyn InspectionDocument,
        destination: &Path,
    ) -> Result<(), ArtifactError>;

    async fn export_combined(
        &self,
        documents: &[&dyn InspectionDocument],
        destination: &Path,
    ) -> Result<(), ArtifactError>;
}

/// A resolved download request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub deliverable_name: Option<String>,
    #[serde(default)]
    pub inspections: Vec<Value>,
    #[serde(default)]
    pub combined_exchange: bool,
    #[serde(default)]
    pub individual_exchange: bool,
    #[serde(default)]
    pub combined_report_ids: Vec<Uuid>,
    #[serde(default)]
    pub individual_report_ids: Vec<Uuid>,
    #[serde(default)]
    pub additional_properties: Map<String, Value>,
}

/// Every collaborator the engine needs, bundled for construction.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn SchemaRegistry>,
    pub packs: Arc<dyn PackSource>,
    pub factory: Arc<dyn InspectionFactory>,
    pub reports: Arc<dyn ReportProducer>,
    pub exchange: Arc<dyn ExchangeProducer>,
}

impl Collaborators {
    /// Bundle the host's seams with an [`HttpPackSource`] pointed at
    /// `settings.pack_endpoint`.
    pub fn new(
        settings: &Settings,
        client: Client,
        registry: Arc<dyn SchemaRegistry>,
        factory: Arc<dyn InspectionFactory>,
        reports: Arc<dyn ReportProducer>,
        exchange: Arc<dyn ExchangeProducer>,
    ) -> Self {
        Self {
            registry,
            packs: Arc::new(HttpPackSource::from_settings(client, settings)),
            factory,
            reports,
            exchange,
        }
    }
}
