//! Project-keyed view over the job system.
//!
//! Guarantees at most one download job per project descriptor across the
//! enqueued, processing and scheduled queues.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use super::types::{JobId, JobKind, JobRecord, JobSystem, QueueState};
use crate::config::Settings;
use crate::error::JobError;
use crate::inspection::InspectionLoader;
use crate::paths::same_path;
use crate::project::{InspectionState, Trigger};
use crate::status::StatusReporter;
use crate::store::ProjectHandle;

pub struct JobBridge {
    jobs: Arc<dyn JobSystem>,
    status: StatusReporter,
    loader: Arc<InspectionLoader>,
    poll_interval: Duration,
    restart_timeout: Duration,
    // Lookup and submission must not interleave between callers.
    submit_lock: tokio::sync::Mutex<()>,
}

impl JobBridge {
    pub fn new(
        jobs: Arc<dyn JobSystem>,
        status: StatusReporter,
        loader: Arc<InspectionLoader>,
        settings: &Settings,
    ) -> Self {
        Self {
            jobs,
            status,
            loader,
            poll_interval: settings.restart_poll_interval,
            restart_timeout: settings.restart_timeout,
            submit_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Download jobs targeting `descriptor_path`, in any queue.
    pub fn find_jobs_for_project(&self, descriptor_path: &Path) -> Result<Vec<JobRecord>, JobError> {
        let mut found = Vec::new();
        for state in QueueState::ALL {
            found.extend(self.jobs.jobs(state)?.into_iter().filter(|job| {
                job.kind == JobKind::DownloadProject && same_path(&job.project_path, descriptor_path)
            }));
        }
        Ok(found)
    }

    /// Submit a download job unless the project already has one.
    ///
    /// Returns the new job id, or `None` when nothing was submitted. A failed
    /// job lookup submits nothing.
    pub async fn ensure_project_job(&self, handle: &ProjectHandle) -> Result<Option<JobId>, JobError> {
        let path = handle.descriptor_path();
        if handle.read(|p| p.inspections.is_empty()) {
            debug!("ensure_project_job: {} has no inspections", path.display());
            return Ok(None);
        }

        let _guard = self.submit_lock.lock().await;
        let existing = match self.find_jobs_for_project(path) {
            Ok(existing) => existing,
            Err(e) => {
                error!(
                    "ensure_project_job: job lookup for {} failed error={}. Download will NOT be queued",
                    path.display(),
                    e
                );
                return Err(e);
            }
        };
        if let Some(job) = existing.first() {
            debug!(
                "ensure_project_job: {} already has job #{} ({})",
                path.display(),
                job.id,
                job.state
            );
            return Ok(None);
        }

        let queued = handle.update(|p| {
            p.inspections
                .iter_mut()
                .filter(|i| {
                    matches!(
                        i.state,
                        InspectionState::Staged
                            | InspectionState::Queued
                            | InspectionState::Processing
                            | InspectionState::Paused
                    )
                })
                .filter_map(|i| i.fire(Trigger::Enqueued).ok())
                .count()
        });
        self.status.store().persist(handle).await;
        self.status.publish_project(handle, None);

        let id = self.jobs.enqueue(JobKind::DownloadProject, path)?;
        info!(
            "ensure_project_job: {} job #{} submitted, {} inspection(s) queued",
            path.display(),
            id,
            queued
        );
        Ok(Some(id))
    }

    /// Delete or cancel every job for the project; returns how many were hit.
    pub fn cancel_jobs_for_project(&self, descriptor_path: &Path) -> Result<usize, JobError> {
        let jobs = self.find_jobs_for_project(descriptor_path)?;
        let mut cancelled = 0;
        for job in &jobs {
            if self.jobs.delete(job.id)? {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(
                "cancel_project_jobs: {} cancelled {} job(s)",
                descriptor_path.display(),
                cancelled
            );
        }
        Ok(cancelled)
    }

    /// Cancel existing jobs, wait for them to leave the queues, reset and
    /// reload every non-complete inspection, then submit one fresh job.
    pub async fn restart_project(
        &self,
        handle: &ProjectHandle,
        token: &CancellationToken,
    ) -> Result<Option<JobId>, JobError> {
        let path = handle.descriptor_path();
        let started = Instant::now();
        loop {
            let jobs = self.find_jobs_for_project(path)?;
            if jobs.is_empty() {
                break;
            }
            for job in &jobs {
                self.jobs.delete(job.id)?;
            }
            let waited = started.elapsed();
            if waited >= self.restart_timeout {
                warn!(
                    "restart_project: {} still has {} job(s) after {:?}",
                    path.display(),
                    jobs.len(),
                    waited
                );
                return Err(JobError::StillRunning {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let targets: Vec<(usize, InspectionState)> = handle.read(|p| {
            p.inspections
                .iter()
                .enumerate()
                .filter(|(_, i)| i.state != InspectionState::Complete)
                .map(|(index, i)| (index, i.state))
                .collect()
        });
        info!(
            "restart_project: {} resetting {} inspection(s)",
            path.display(),
            targets.len()
        );

        for (index, state) in &targets {
            if *state != InspectionState::Loading {
                if let Err(e) = self
                    .status
                    .transition(handle, *index, Trigger::Restarted, None)
                    .await
                {
                    debug!("restart_project: #{} not reset: {}", index, e);
                }
            }
        }

        let loads = targets
            .iter()
            .map(|(index, _)| self.loader.load(handle, *index, token));
        for (result, (index, _)) in join_all(loads).await.into_iter().zip(&targets) {
            if let Err(e) = result {
                warn!("restart_project: {} #{} reload error={}", path.display(), index, e);
            }
        }

        self.ensure_project_job(handle).await
    }
}

impl std::fmt::Debug for JobBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobBridge")
            .field("poll_interval", &self.poll_interval)
            .field("restart_timeout", &self.restart_timeout)
            .finish_non_exhaustive()
    }
}
