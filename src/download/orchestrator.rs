use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use log::{debug, error, info, warn};
use range_dl::{FetchError, FetchOutcome, Fetcher, Source};
use tokio_util::sync::CancellationToken;

use super::artifacts;
use super::types::{InspectionOutcome, ProjectOutcome};
use crate::collab::Collaborators;
use crate::config::Settings;
use crate::error::{DownloadError, FileError, InspectionError, LoadError};
use crate::inspection::InspectionLoader;
use crate::jobs::{JobKind, JobOutcome, JobRecord, JobRunner};
use crate::paths::resolve_download_path;
use crate::project::{FileEntry, InspectionState, Trigger};
use crate::status::StatusReporter;
use crate::store::{ProjectCollection, ProjectHandle};

pub struct Orchestrator {
    settings: Settings,
    projects: Arc<ProjectCollection>,
    status: StatusReporter,
    loader: Arc<InspectionLoader>,
    fetcher: Fetcher,
    collab: Collaborators,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        projects: Arc<ProjectCollection>,
        status: StatusReporter,
        loader: Arc<InspectionLoader>,
        fetcher: Fetcher,
        collab: Collaborators,
    ) -> Self {
        Self {
            settings,
            projects,
            status,
            loader,
            fetcher,
            collab,
        }
    }

    /// One download pass over the project persisted at `descriptor_path`.
    ///
    /// Safe to call repeatedly: complete inspections are skipped and partial
    /// files resume where they stopped.
    pub async fn download_project(
        &self,
        descriptor_path: &Path,
        token: &CancellationToken,
    ) -> Result<ProjectOutcome, DownloadError> {
        let Some(handle) = self.projects.find(descriptor_path) else {
            warn!(
                "download_project: {} is no longer loaded",
                descriptor_path.display()
            );
            return Ok(ProjectOutcome::Missing);
        };
        let (name, root, count) = handle.read(|p| {
            (
                p.name.clone(),
                p.download_path.clone(),
                p.inspections.len(),
            )
        });

        if let Some(root) = root.as_ref() {
            if !tokio::fs::metadata(root).await.is_ok_and(|m| m.is_dir()) {
                warn!(
                    "download_project: {} download path {} does not exist",
                    name,
                    root.display()
                );
                return Ok(ProjectOutcome::RootUnavailable);
            }
        }

        info!("download_project: {} start, {} inspection(s)", name, count);
        let limit = self.settings.inspection_limit(count);
        let results: Vec<Result<InspectionOutcome, InspectionError>> = stream::iter(0..count)
            .map(|index| self.download_inspection(&handle, index, token))
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut paused = false;
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(InspectionOutcome::Paused) => paused = true,
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }

        if paused || token.is_cancelled() {
            for e in &errors {
                warn!("download_project: {} error={}", name, e);
            }
            self.status.store().persist(&handle).await;
            self.status.publish_project(&handle, None);
            info!("download_project: {} paused", name);
            return Ok(ProjectOutcome::Paused);
        }

        if !errors.is_empty() {
            let err = DownloadError::InspectionsFailed {
                project: name,
                errors,
            };
            self.status.store().persist(&handle).await;
            self.status.publish_project(&handle, Some(err.to_string()));
            return Err(err);
        }

        if let Err(e) = artifacts::produce_combined(&self.collab, &handle).await {
            self.status.store().persist(&handle).await;
            self.status.publish_project(&handle, Some(e.to_string()));
            return Err(e);
        }

        self.status.store().persist(&handle).await;
        self.status.publish_project(&handle, None);
        info!("download_project: {} complete", name);
        Ok(ProjectOutcome::Complete)
    }

    async fn download_inspection(
        &self,
        handle: &ProjectHandle,
        index: usize,
        token: &CancellationToken,
    ) -> Result<InspectionOutcome, InspectionError> {
        if handle.read(|p| p.inspections[index].state) == InspectionState::Loading {
            // Unresolved inspections stay Loading across a cancellation.
            tokio::select! {
                _ = token.cancelled() => return Ok(InspectionOutcome::Paused),
                _ = tokio::time::sleep(self.settings.loading_settle_delay) => {}
            }
            match self.loader.load(handle, index, token).await {
                Err(LoadError::Cancelled) if token.is_cancelled() => {
                    return Ok(InspectionOutcome::Paused);
                }
                Err(e) => debug!("download_inspection: #{} load error={}", index, e),
                Ok(_) => {}
            }
        }

        let (name, state, dir) = handle.read(|p| {
            let inspection = &p.inspections[index];
            (
                inspection.name.clone(),
                inspection.state,
                inspection.download_path.clone(),
            )
        });
        match state {
            InspectionState::Complete => return Ok(InspectionOutcome::AlreadyComplete),
            InspectionState::Loading | InspectionState::Errored => {
                return Err(InspectionError::NotActionable { name, state });
            }
            _ => {}
        }

        if token.is_cancelled() {
            self.status
                .transition(handle, index, Trigger::Interrupted, None)
                .await?;
            return Ok(InspectionOutcome::Paused);
        }

        let Some(dir) = dir else {
            return Err(self
                .fail(handle, index, InspectionError::NoDownloadPath { name })
                .await);
        };

        self.status
            .transition(handle, index, Trigger::Started, None)
            .await?;
        if let Err(source) = tokio::fs::create_dir_all(&dir).await {
            return Err(self
                .fail(handle, index, InspectionError::Io { name, source })
                .await);
        }

        let (errors, paused) = self.transfer_files(handle, index, &dir, token).await;
        if !errors.is_empty() {
            return Err(self
                .fail(handle, index, InspectionError::FilesFailed { name, errors })
                .await);
        }
        if paused {
            self.status
                .transition(handle, index, Trigger::Interrupted, None)
                .await?;
            return Ok(InspectionOutcome::Paused);
        }

        if let Err(e) = artifacts::finish_inspection(&self.collab, handle, index, &dir).await {
            return Err(self.fail(handle, index, e).await);
        }
        self.status
            .transition(handle, index, Trigger::Finished, None)
            .await?;
        Ok(InspectionOutcome::Complete)
    }

    /// Transfer every non-sentinel file. Returns the failures and whether any
    /// transfer stopped on cancellation.
    async fn transfer_files(
        &self,
        handle: &ProjectHandle,
        index: usize,
        dir: &Path,
        token: &CancellationToken,
    ) -> (Vec<FileError>, bool) {
        let files: Vec<(usize, FileEntry)> = handle.read(|p| {
            p.inspections[index]
                .transferable_files()
                .map(|(file_index, file)| (file_index, file.clone()))
                .collect()
        });
        let limit = self.settings.file_limit(files.len());

        let results: Vec<Result<bool, FileError>> = stream::iter(files)
            .map(|(file_index, file)| async move {
                self.transfer_file(handle, index, file_index, &file, dir, token)
                    .await
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut errors = Vec::new();
        let mut paused = false;
        for result in results {
            match result {
                Ok(true) => {}
                Ok(false) => paused = true,
                Err(e) => errors.push(e),
            }
        }
        (errors, paused)
    }

    /// `Ok(false)` when the transfer paused on cancellation.
    async fn transfer_file(
        &self,
        handle: &ProjectHandle,
        index: usize,
        file_index: usize,
        file: &FileEntry,
        dir: &Path,
        token: &CancellationToken,
    ) -> Result<bool, FileError> {
        let fetch_error = |source: FetchError| FileError::Fetch {
            file: file.name.clone(),
            source,
        };
        let Some(download_path) = file.download_path.as_deref() else {
            return Err(FileError::NoDownloadPath {
                file: file.name.clone(),
            });
        };
        let destination: PathBuf = resolve_download_path(dir, download_path);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fetch_error(e.into()))?;
        }
        let source = Source::parse(&file.name).map_err(fetch_error)?;

        let outcome = self
            .fetcher
            .fetch(&source, &destination, file.size, token, |progress| {
                self.status.file_progress(handle, index, file_index, progress)
            })
            .await;

        match outcome {
            FetchOutcome::Complete { bytes } => {
                handle.update(|p| {
                    if let Some(entry) = p.inspections[index].files.get_mut(file_index) {
                        entry.downloaded_size = bytes;
                        entry.size = Some(bytes);
                    }
                });
                Ok(true)
            }
            FetchOutcome::Paused => Ok(false),
            FetchOutcome::Errored(source) => Err(fetch_error(source)),
        }
    }

    async fn fail(
        &self,
        handle: &ProjectHandle,
        index: usize,
        error: InspectionError,
    ) -> InspectionError {
        if let Err(e) = self
            .status
            .transition(handle, index, Trigger::Failed, Some(error.to_string()))
            .await
        {
            debug!("download_inspection: #{} failure not recorded: {}", index, e);
        }
        error
    }
}

#[async_trait]
impl JobRunner for Orchestrator {
    async fn run(&self, job: &JobRecord, token: CancellationToken) -> JobOutcome {
        match job.kind {
            JobKind::DownloadProject => {
                match self.download_project(&job.project_path, &token).await {
                    Ok(ProjectOutcome::RootUnavailable) => {
                        JobOutcome::Reschedule(self.settings.reschedule_delay)
                    }
                    Ok(_) => JobOutcome::Done,
                    Err(e) => {
                        error!(
                            "download_project: {} failed error={}",
                            job.project_path.display(),
                            e
                        );
                        JobOutcome::Failed(e.to_string())
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("projects", &self.projects.len())
            .finish_non_exhaustive()
    }
}
