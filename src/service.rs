//! Entry point tying the store, the job queue and the orchestrator together.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use log::{error, info, warn};
use range_dl::Fetcher;
use reqwest::Client;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::collab::{Collaborators, Manifest};
use crate::config::Settings;
use crate::download::Orchestrator;
use crate::error::{JobError, StoreError};
use crate::events::{DownloadEvent, EVENT_CHANNEL_CAPACITY};
use crate::inspection::InspectionLoader;
use crate::jobs::{JobBridge, JobId, JobQueue, JobRecord, JobSystem, QueueState};
use crate::project::{Inspection, InspectionState, Project};
use crate::status::StatusReporter;
use crate::store::{ProjectCollection, ProjectHandle, ProjectStore};

pub struct DownloadService {
    settings: Settings,
    projects: Arc<ProjectCollection>,
    store: Arc<ProjectStore>,
    status: StatusReporter,
    loader: Arc<InspectionLoader>,
    queue: Arc<JobQueue>,
    bridge: JobBridge,
    shutdown: CancellationToken,
}

impl DownloadService {
    /// Wire every component and start the job worker. Must be called from
    /// within a tokio runtime.
    pub fn start(settings: Settings, collab: Collaborators, client: Client) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Arc::new(ProjectStore::new(settings.settings_root.clone()));
        let projects = Arc::new(ProjectCollection::new());
        let status = StatusReporter::new(store.clone(), events);
        let fetcher = Fetcher::new(client).with_chunk_size(settings.chunk_size);
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
            collab,
        ));
        let queue = Arc::new(JobQueue::new(settings.max_concurrent_jobs));
        queue.start(orchestrator);

        let bridge = JobBridge::new(queue.clone(), status.clone(), loader.clone(), &settings);
        info!(
            "download_service: started with settings root {}",
            settings.settings_root.display()
        );

        Self {
            settings,
            projects,
            store,
            status,
            loader,
            queue,
            bridge,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.status.subscribe()
    }

    pub fn projects(&self) -> Vec<Arc<ProjectHandle>> {
        self.projects.snapshot()
    }

    pub fn find_project(&self, descriptor_path: &Path) -> Option<Arc<ProjectHandle>> {
        self.projects.find(descriptor_path)
    }

    pub fn jobs(&self, state: QueueState) -> Result<Vec<JobRecord>, JobError> {
        self.queue.jobs(state)
    }

    pub fn bridge(&self) -> &JobBridge {
        &self.bridge
    }

    /// Load every persisted project and make sure each has a download job.
    /// Returns how many projects were added.
    pub async fn load_downloads(&self) -> usize {
        let mut added = 0;
        for handle in self.store.load_all().await {
            if self.add_project(Arc::new(handle)).await {
                added += 1;
            }
        }
        added
    }

    /// Add a project to the collection and ensure its job. Returns `false`
    /// when the project or its descriptor is already present.
    pub async fn add_project(&self, handle: Arc<ProjectHandle>) -> bool {
        if !self.projects.insert(handle.clone()) {
            warn!(
                "add_project: {} ({}) already loaded",
                handle.id(),
                handle.descriptor_path().display()
            );
            return false;
        }
        if let Err(e) = self.bridge.ensure_project_job(&handle).await {
            error!(
                "add_project: {} job not ensured error={}",
                handle.descriptor_path().display(),
                e
            );
        }
        true
    }

    /// Create, persist and start downloading a project from a resolved manifest.
    pub async fn create_download(
        &self,
        manifest: Manifest,
        name: &str,
        data_folder: &Path,
    ) -> Result<Arc<ProjectHandle>, StoreError> {
        let mut project = Project::new(name);
        project.confirmation_time = Some(Utc::now());
        project.download_path = Some(data_folder.to_path_buf());
        project.deliverable_name = manifest.deliverable_name;
        project.additional_properties = manifest.additional_properties;
        project.combined_exchange = manifest.combined_exchange;
        project.individual_exchange = manifest.individual_exchange;
        project.combined_report_ids = manifest.combined_report_ids;
        project.individual_report_ids = manifest.individual_report_ids;
        project.inspections = manifest
            .inspections
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let inspection_name = format!("Inspection {}", i + 1);
                let path: PathBuf = data_folder.join(&inspection_name);
                Inspection {
                    project: Some(name.to_string()),
                    ..Inspection::new(inspection_name, path, payload)
                }
            })
            .collect();

        let handle = Arc::new(self.store.create(project).await?);
        if !self.projects.insert(handle.clone()) {
            warn!("create_download: {} already loaded", handle.id());
        }
        self.status.publish_project(&handle, None);

        let count = handle.read(|p| p.inspections.len());
        let loads = (0..count).map(|index| self.loader.load(&handle, index, &self.shutdown));
        for (index, result) in join_all(loads).await.into_iter().enumerate() {
            if let Err(e) = result {
                warn!("create_download: {} #{} load error={}", handle.id(), index, e);
            }
        }

        if let Err(e) = self.bridge.ensure_project_job(&handle).await {
            error!("create_download: {} job not ensured error={}", handle.id(), e);
        }
        Ok(handle)
    }

    /// Drop a project from the collection and cancel its jobs.
    pub fn remove_project(&self, descriptor_path: &Path) -> Option<Arc<ProjectHandle>> {
        let removed = self.projects.remove(descriptor_path)?;
        if let Err(e) = self.bridge.cancel_jobs_for_project(descriptor_path) {
            error!(
                "remove_project: {} jobs not cancelled error={}",
                descriptor_path.display(),
                e
            );
        }
        info!("remove_project: {}", descriptor_path.display());
        Some(removed)
    }

    pub async fn restart_project(&self, descriptor_path: &Path) -> Result<Option<JobId>, JobError> {
        let handle = self.require(descriptor_path)?;
        self.bridge.restart_project(&handle, &self.shutdown).await
    }

    /// Cancel the project's jobs; in-flight inspections end `Paused`.
    pub fn pause_project(&self, descriptor_path: &Path) -> Result<usize, JobError> {
        self.require(descriptor_path)?;
        self.bridge.cancel_jobs_for_project(descriptor_path)
    }

    pub async fn resume_project(&self, descriptor_path: &Path) -> Result<Option<JobId>, JobError> {
        let handle = self.require(descriptor_path)?;
        self.bridge.ensure_project_job(&handle).await
    }

    /// Cancel any in-flight resolution of one inspection and resolve it again.
    pub async fn reload_inspection(
        &self,
        descriptor_path: &Path,
        index: usize,
    ) -> Result<InspectionState, JobError> {
        let handle = self.require(descriptor_path)?;
        let state = self.loader.load(&handle, index, &self.shutdown).await?;
        self.bridge.ensure_project_job(&handle).await?;
        Ok(state)
    }

    /// Cancel everything in flight and wait for running jobs to persist.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown.cancel();
        self.queue.shutdown(timeout).await;
        info!("download_service: stopped");
    }

    fn require(&self, descriptor_path: &Path) -> Result<Arc<ProjectHandle>, JobError> {
        self.projects
            .find(descriptor_path)
            .ok_or_else(|| JobError::UnknownProject(descriptor_path.to_path_buf()))
    }
}

impl std::fmt::Debug for DownloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadService")
            .field("settings", &self.settings)
            .field("projects", &self.projects.len())
            .finish_non_exhaustive()
    }
}
