//! State transitions with their side effects: log, persist, publish.

use std::sync::Arc;

use log::{info, warn};
use range_dl::TransferProgress;
use tokio::sync::broadcast;

use crate::error::TransitionError;
use crate::events::{DownloadEvent, FileProgress, InspectionStatusChanged, ProjectStatusChanged};
use crate::project::{InspectionState, Trigger};
use crate::store::{ProjectHandle, ProjectStore};

#[derive(Debug, Clone)]
pub struct StatusReporter {
    store: Arc<ProjectStore>,
    events: broadcast::Sender<DownloadEvent>,
}

impl StatusReporter {
    pub fn new(store: Arc<ProjectStore>, events: broadcast::Sender<DownloadEvent>) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Fire `trigger` on inspection `index`, then persist and publish.
    pub async fn transition(
        &self,
        handle: &ProjectHandle,
        index: usize,
        trigger: Trigger,
        error: Option<String>,
    ) -> Result<InspectionState, TransitionError> {
        let fired = handle.update(|p| {
            p.inspections
                .get_mut(index)
                .map(|inspection| (inspection.name.clone(), inspection.fire(trigger)))
        });
        let (name, state) = match fired {
            Some((name, Ok(state))) => (name, state),
            Some((name, Err(e))) => {
                warn!(
                    "inspection_status: {} #{} {} rejected {:?}: {}",
                    handle.id(),
                    index,
                    name,
                    trigger,
                    e
                );
                return Err(e);
            }
            None => {
                warn!("inspection_status: {} #{} missing", handle.id(), index);
                return Err(TransitionError {
                    from: InspectionState::default(),
                    trigger,
                });
            }
        };

        match error.as_ref() {
            Some(err) => warn!(
                "inspection_status: {} #{} {} -> {} error={}",
                handle.id(),
                index,
                name,
                state,
                err
            ),
            None => info!(
                "inspection_status: {} #{} {} -> {}",
                handle.id(),
                index,
                name,
                state
            ),
        }

        self.store.persist(handle).await;
        let _ = self
            .events
            .send(DownloadEvent::InspectionStatus(InspectionStatusChanged {
                project_id: handle.id(),
                inspection: index,
                name,
                status: state,
                error,
            }));
        self.publish_project(handle, None);
        Ok(state)
    }

    /// Record live bytes for one file. Called after every chunk.
    pub fn file_progress(
        &self,
        handle: &ProjectHandle,
        index: usize,
        file_index: usize,
        progress: TransferProgress,
    ) {
        let name = handle.update(|p| {
            let file = p
                .inspections
                .get_mut(index)
                .and_then(|i| i.files.get_mut(file_index))?;
            file.downloaded_size = progress.downloaded;
            if progress.total.is_some() {
                file.size = progress.total;
            }
            Some(file.name.clone())
        });
        let Some(file) = name else {
            return;
        };

        let percent = match progress.total {
            Some(total) if total > 0 => {
                ((progress.downloaded as f64 / total as f64) * 100.0).min(100.0) as u32
            }
            _ => 0,
        };
        let _ = self.events.send(DownloadEvent::FileProgress(FileProgress {
            project_id: handle.id(),
            inspection: index,
            file,
            percent,
            downloaded_bytes: progress.downloaded,
            total_bytes: progress.total,
        }));
    }

    /// Publish the project rollup computed from its current tree.
    pub fn publish_project(&self, handle: &ProjectHandle, error: Option<String>) {
        let (status, progress, total_bytes) =
            handle.read(|p| (p.state(), p.progress(), p.total_size()));
        let _ = self
            .events
            .send(DownloadEvent::ProjectStatus(ProjectStatusChanged {
                project_id: handle.id(),
                status,
                progress,
                total_bytes,
                error,
            }));
    }
}
