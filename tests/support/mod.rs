#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use inspection_downloader::collab::{
    Collaborators, InspectionDocument, InspectionFactory, MediaReference, Pack, ReportProducer,
    SchemaRegistry, Severity, ValidationProblem, ExchangeProducer,
};
use inspection_downloader::download::Orchestrator;
use inspection_downloader::error::{ArtifactError, CollabError};
use inspection_downloader::inspection::{HttpPackSource, InspectionLoader};
use inspection_downloader::project::{Inspection, Project};
use inspection_downloader::status::StatusReporter;
use inspection_downloader::store::{ProjectCollection, ProjectHandle, ProjectStore};
use inspection_downloader::Settings;
use range_dl::Fetcher;
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PACK_ID: Uuid = Uuid::from_u128(0x5d3f1a2b_0c4e_4f6a_9b8c_7d6e5f4a3b2c);
pub const PACK_NAME: &str = "Sewer Pack";

pub struct FakeRegistry;

impl SchemaRegistry for FakeRegistry {
    fn find(&self, id: Uuid) -> Option<Pack> {
        (id == PACK_ID).then(|| Pack {
            id,
            name: PACK_NAME.into(),
            version: "1.0.0".into(),
            path: PathBuf::from("/packs/sewer"),
        })
    }

    /// Downloaded packs hold nothing but their id.
    fn install(&self, file: &Path) -> Result<Pack, CollabError> {
        let text = std::fs::read_to_string(file)?;
        let id = Uuid::parse_str(text.trim())
            .map_err(|_| CollabError::Failed(format!("cannot install {}", file.display())))?;
        Ok(Pack {
            id,
            name: "Downloaded Pack".into(),
            version: "2.0.0".into(),
            path: file.to_path_buf(),
        })
    }
}

/// Documents are plain JSON payloads:
/// `{ "name", "group": [..], "media": [{ "uri", "length", "local" }], "broken" }`.
pub struct FakeFactory;

impl InspectionFactory for FakeFactory {
    fn open(&self, _pack: &Pack, payload: &Value) -> Result<Box<dyn InspectionDocument>, CollabError> {
        if payload["broken"].as_bool().unwrap_or(false) {
            return Err(CollabError::Failed("unreadable payload".into()));
        }
        let media = payload["media"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|m| MediaReference {
                        uri: m["uri"].as_str().unwrap_or_default().to_string(),
                        local_path: m["local"].as_str().map(PathBuf::from),
                        length: m["length"].as_u64(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(FakeDocument {
            name: payload["name"].as_str().unwrap_or("Unnamed").to_string(),
            group: payload["group"]
                .as_array()
                .map(|g| g.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            media,
            relocated: Vec::new(),
        }))
    }
}

pub struct FakeDocument {
    name: String,
    group: Vec<String>,
    media: Vec<MediaReference>,
    relocated: Vec<String>,
}

impl InspectionDocument for FakeDocument {
    fn file_stem(&self) -> String {
        self.name.replace(' ', "_")
    }

    fn folder_name(&self) -> String {
        self.name.clone()
    }

    fn folder_group(&self) -> Vec<String> {
        self.group.clone()
    }

    fn media(&self) -> Vec<MediaReference> {
        self.media.clone()
    }

    fn relocate_media(&mut self, rewrite: &dyn Fn(&MediaReference) -> String) {
        self.relocated = self.media.iter().map(rewrite).collect();
    }

    fn save(&self, path: &Path) -> Result<(), CollabError> {
        let body = json!({ "name": self.name, "media": self.relocated });
        std::fs::write(path, body.to_string())?;
        Ok(())
    }

    fn default_report_name(&self) -> String {
        format!("{} report.pdf", self.name)
    }
}

/// Report and exchange producer that writes marker files and records calls.
///
/// Documents whose name contains `invalid` fail validation; `explode`
/// makes the export fail after writing a partial file.
#[derive(Default)]
pub struct Recorder {
    pub reports: Mutex<Vec<PathBuf>>,
    pub combined_reports: Mutex<Vec<(usize, PathBuf)>>,
    pub exports: Mutex<Vec<PathBuf>>,
    pub combined_exports: Mutex<Vec<(usize, PathBuf)>>,
}

#[async_trait]
impl ReportProducer for Recorder {
    async fn individual(
        &self,
        document: &dyn InspectionDocument,
        _report_ids: &[Uuid],
        destination: &Path,
    ) -> Result<(), ArtifactError> {
        tokio::fs::write(destination, format!("report for {}", document.folder_name())).await?;
        self.reports.lock().unwrap().push(destination.to_path_buf());
        Ok(())
    }

    async fn combined(
        &self,
        documents: &[&dyn InspectionDocument],
        _report_ids: &[Uuid],
        destination: &Path,
    ) -> Result<(), ArtifactError> {
        tokio::fs::write(destination, b"combined report").await?;
        self.combined_reports
            .lock()
            .unwrap()
            .push((documents.len(), destination.to_path_buf()));
        Ok(())
    }
}

#[async_trait]
impl ExchangeProducer for Recorder {
    async fn validate(
        &self,
        document: &dyn InspectionDocument,
    ) -> Result<Vec<ValidationProblem>, ArtifactError> {
        let mut problems = vec![ValidationProblem {
            severity: Severity::Warning,
            description: "missing weather".into(),
        }];
        if document.folder_name().contains("invalid") {
            problems.push(ValidationProblem {
                severity: Severity::Error,
                description: "pipe diameter out of range".into(),
            });
        }
        Ok(problems)
    }

    async fn export(
        &self,
        document: &dyn InspectionDocument,
        destination: &Path,
    ) -> Result<(), ArtifactError> {
        tokio::fs::write(destination, b"partial").await?;
        if document.folder_name().contains("explode") {
            return Err(ArtifactError::Failed("exporter crashed".into()));
        }
        self.exports.lock().unwrap().push(destination.to_path_buf());
        Ok(())
    }

    async fn export_combined(
        &self,
        documents: &[&dyn InspectionDocument],
        destination: &Path,
    ) -> Result<(), ArtifactError> {
        tokio::fs::write(destination, b"combined db").await?;
        self.combined_exports
            .lock()
            .unwrap()
            .push((documents.len(), destination.to_path_buf()));
        Ok(())
    }
}

pub fn collaborators(recorder: Arc<Recorder>) -> Collaborators {
    Collaborators {
        registry: Arc::new(FakeRegistry),
        packs: Arc::new(HttpPackSource::new(Client::new(), None)),
        factory: Arc::new(FakeFactory),
        reports: recorder.clone(),
        exchange: recorder,
    }
}

pub fn settings(root: &Path) -> Settings {
    let mut settings = Settings::with_root(root.join("settings"));
    settings.inspection_parallelism = Some(2);
    settings.file_parallelism = Some(2);
    settings.loading_settle_delay = Duration::from_millis(10);
    settings.restart_poll_interval = Duration::from_millis(10);
    settings.restart_timeout = Duration::from_secs(5);
    settings.reschedule_delay = Duration::from_secs(60);
    settings
}

pub fn payload(name: &str, media: &[String]) -> Value {
    json!({
        "$packId": PACK_ID.to_string(),
        "name": name,
        "media": media.iter().map(|uri| json!({ "uri": uri, "length": 5 })).collect::<Vec<_>>(),
    })
}

/// HEAD and GET for a small resource served in one response.
pub async fn mount_media(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.to_vec())
                .insert_header("content-length", body.len().to_string().as_str()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

pub async fn mount_missing(server: &MockServer, route: &str) {
    Mock::given(path(route))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

pub async fn wait_until(timeout: Duration, check: impl Fn() -> bool) {
    let started = Instant::now();
    while !check() {
        assert!(started.elapsed() < timeout, "condition not reached in {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Every engine component wired over a temporary settings root.
pub struct Harness {
    pub settings: Settings,
    pub projects: Arc<ProjectCollection>,
    pub store: Arc<ProjectStore>,
    pub status: StatusReporter,
    pub loader: Arc<InspectionLoader>,
    pub orchestrator: Arc<Orchestrator>,
    pub recorder: Arc<Recorder>,
    pub collab: Collaborators,
    pub data: PathBuf,
    root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let mut settings = settings(root.path());
        configure(&mut settings);

        let recorder = Arc::new(Recorder::default());
        let collab = Collaborators::new(
            &settings,
            Client::new(),
            Arc::new(FakeRegistry),
            Arc::new(FakeFactory),
            recorder.clone(),
            recorder.clone(),
        );
        let (events, _) = broadcast::channel(256);
        let store = Arc::new(ProjectStore::new(settings.settings_root.clone()));
        let projects = Arc::new(ProjectCollection::new());
        let status = StatusReporter::new(store.clone(), events);
        let fetcher = Fetcher::new(Client::new()).with_chunk_size(settings.chunk_size);
        let loader = Arc::new(InspectionLoader::new(
            collab.clone(),
            fetcher.clone(),
            status.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            settings.clone(),
            projects.clone(),
            status.clone(),
            loader.clone(),
            fetcher,
            collab.clone(),
        ));

        Self {
            settings,
            projects,
            store,
            status,
            loader,
            orchestrator,
            recorder,
            collab,
            data,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Persist a project with one inspection per payload, add it to the
    /// collection and resolve every inspection.
    pub async fn add_project(
        &self,
        payloads: Vec<Value>,
        configure: impl FnOnce(&mut Project),
    ) -> Arc<ProjectHandle> {
        let mut project = Project::new("Main St");
        project.download_path = Some(self.data.clone());
        project.inspections = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let name = format!("Inspection {}", i + 1);
                Inspection::new(name.clone(), self.data.join(name), payload)
            })
            .collect();
        configure(&mut project);

        let handle = Arc::new(self.store.create(project).await.unwrap());
        assert!(self.projects.insert(handle.clone()));
        let count = handle.read(|p| p.inspections.len());
        for index in 0..count {
            let _ = self
                .loader
                .load(&handle, index, &CancellationToken::new())
                .await;
        }
        handle
    }

    /// Descriptor as currently written on disk.
    pub fn on_disk(&self, handle: &ProjectHandle) -> Project {
        let text = std::fs::read_to_string(handle.descriptor_path()).unwrap();
        inspection_downloader::project::parse_descriptor(&text).unwrap()
    }
}
