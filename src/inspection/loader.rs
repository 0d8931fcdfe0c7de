//! Resolves an inspection payload into a name and a file list.
//!
//! Resolution of one inspection is serialized against itself: starting a new
//! load cancels the one in flight. Different inspections load concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, info};
use range_dl::{Fetcher, Source};
use reqwest::Url;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::collab::{Collaborators, Pack};
use crate::error::LoadError;
use crate::paths::{default_download_path, sanitize_file_name};
use crate::project::{FileEntry, InspectionState, Trigger, PACK_ID_KEY, SENTINEL_EXTENSION};
use crate::status::StatusReporter;
use crate::store::ProjectHandle;

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub name: String,
    pub files: Vec<FileEntry>,
}

type LoadKey = (Uuid, usize);

pub struct InspectionLoader {
    collab: Collaborators,
    fetcher: Fetcher,
    status: StatusReporter,
    in_flight: Mutex<HashMap<LoadKey, (u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl InspectionLoader {
    pub fn new(collab: Collaborators, fetcher: Fetcher, status: StatusReporter) -> Self {
        Self {
            collab,
            fetcher,
            status,
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Move inspection `index` through `Loading` and resolve it.
    ///
    /// Ends in `Staged` on success and `Errored` on a resolution failure. A
    /// cancelled load leaves the inspection in `Loading` with no files, so the
    /// next download pass resolves it again. A load superseded by a newer one
    /// returns [`LoadError::Cancelled`] without touching the inspection.
    pub async fn load(
        &self,
        handle: &ProjectHandle,
        index: usize,
        parent: &CancellationToken,
    ) -> Result<InspectionState, LoadError> {
        let key = (handle.id(), index);
        let (generation, token) = self.register(key, parent);

        let current = handle.read(|p| p.inspections.get(index).map(|i| i.state));
        match current {
            None => {
                self.unregister(key, generation);
                return Err(LoadError::InspectionMissing(index));
            }
            Some(InspectionState::Loading) => {
                handle.update(|p| p.inspections[index].files.clear());
            }
            Some(_) => {
                // Reloaded clears the file list and is allowed from every state.
                if let Err(e) = self
                    .status
                    .transition(handle, index, Trigger::Reloaded, None)
                    .await
                {
                    debug!("load_inspection: {} #{} reload rejected: {}", handle.id(), index, e);
                }
            }
        }

        let payload = handle.read(|p| p.inspections[index].json.clone());
        let result = self.resolve(&payload, &token).await;
        let superseded = !self.unregister(key, generation);

        if superseded {
            debug!("load_inspection: {} #{} superseded", handle.id(), index);
            return Err(LoadError::Cancelled);
        }

        match result {
            Ok(resolution) => {
                info!(
                    "load_inspection: {} #{} resolved as {} with {} file(s)",
                    handle.id(),
                    index,
                    resolution.name,
                    resolution.files.len()
                );
                handle.update(|p| {
                    let inspection = &mut p.inspections[index];
                    inspection.name = resolution.name;
                    inspection.files = resolution.files;
                });
                self.status
                    .transition(handle, index, Trigger::Resolved, None)
                    .await
                    .map_err(|_| LoadError::Cancelled)
            }
            Err(LoadError::Cancelled) => {
                info!("load_inspection: {} #{} cancelled, left loading", handle.id(), index);
                self.status.store().persist(handle).await;
                Err(LoadError::Cancelled)
            }
            Err(e) => {
                if let Err(rejected) = self
                    .status
                    .transition(handle, index, Trigger::ResolveFailed, Some(e.to_string()))
                    .await
                {
                    debug!("load_inspection: {} #{} {}", handle.id(), index, rejected);
                }
                Err(e)
            }
        }
    }

    /// Resolve a payload without touching any project.
    pub async fn resolve(
        &self,
        payload: &Value,
        token: &CancellationToken,
    ) -> Result<Resolution, LoadError> {
        let is_empty = match payload {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Err(LoadError::EmptyPayload);
        }
        let pack_id = payload
            .get(PACK_ID_KEY)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or(LoadError::MissingPackId)?;

        let pack = self.pack(pack_id, token).await?;
        if token.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let document = self.collab.factory.open(&pack, payload)?;

        let group: Vec<String> = document
            .folder_group()
            .iter()
            .filter(|segment| !segment.trim().is_empty())
            .map(|segment| sanitize_file_name(segment))
            .collect();
        let name = if group.is_empty() {
            sanitize_file_name(&document.folder_name())
        } else {
            group.join("/")
        };

        let sentinel = format!("{}{}", document.file_stem(), SENTINEL_EXTENSION);
        let mut files = vec![FileEntry {
            download_path: Some(default_download_path(&sentinel)),
            ..FileEntry::new(sentinel, None)
        }];

        for media in document.media() {
            if token.is_cancelled() {
                return Err(LoadError::Cancelled);
            }

            let local = match media.local_path.as_ref() {
                Some(path) => tokio::fs::metadata(path)
                    .await
                    .ok()
                    .filter(|m| m.is_file())
                    .map(|m| (path.clone(), m.len())),
                None => None,
            };

            let entry = match local {
                Some((path, len)) => {
                    let absolute = std::path::absolute(&path).unwrap_or(path);
                    let name = Url::from_file_path(&absolute)
                        .map(|u| u.to_string())
                        .unwrap_or_else(|_| absolute.display().to_string());
                    FileEntry::new(name, Some(len))
                }
                None => {
                    let size = match media.length.filter(|len| *len > 0) {
                        Some(len) => Some(len),
                        None => self.probe_size(&media.uri, token).await?,
                    };
                    FileEntry::new(media.uri.clone(), size)
                }
            };
            files.push(FileEntry {
                download_path: Some(default_download_path(&entry.name)),
                ..entry
            });
        }

        Ok(Resolution { name, files })
    }

    /// Installed pack, or downloaded from the pack source and installed.
    async fn pack(&self, id: Uuid, token: &CancellationToken) -> Result<Pack, LoadError> {
        if let Some(pack) = self.collab.registry.find(id) {
            return Ok(pack);
        }

        let staging = tempfile::Builder::new().prefix("pack-").tempdir()?;
        let download = staging.path().join(format!("{}.pack", id));
        tokio::select! {
            _ = token.cancelled() => return Err(LoadError::Cancelled),
            fetched = self.collab.packs.fetch_pack(id, &download, token) => fetched?,
        }
        let pack = self.collab.registry.install(&download)?;
        info!("install_pack: {} {} v{}", pack.id, pack.name, pack.version);
        Ok(pack)
    }

    /// Size from a metadata probe; probe failures leave the size unknown.
    async fn probe_size(
        &self,
        uri: &str,
        token: &CancellationToken,
    ) -> Result<Option<u64>, LoadError> {
        let Ok(Source::Http(url)) = Source::parse(uri) else {
            return Ok(None);
        };
        tokio::select! {
            _ = token.cancelled() => Err(LoadError::Cancelled),
            info = self.fetcher.probe(&url) => match info {
                Ok(info) => Ok(info.size),
                Err(e) => {
                    debug!("probe_size: {} error={}", url, e);
                    Ok(None)
                }
            },
        }
    }

    fn register(&self, key: LoadKey, parent: &CancellationToken) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let token = parent.child_token();
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((_, previous)) = in_flight.insert(key, (generation, token.clone())) {
            previous.cancel();
        }
        (generation, token)
    }

    /// Returns `false` when a newer load has replaced this one.
    fn unregister(&self, key: LoadKey, generation: u64) -> bool {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match in_flight.get(&key) {
            Some((current, _)) if *current == generation => {
                in_flight.remove(&key);
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for InspectionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectionLoader")
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}
