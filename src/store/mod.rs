//! Project descriptors on disk.
//!
//! Every project lives in its own directory under the settings root with an
//! `info.json` descriptor. The directory tree is the source of truth; the
//! in-memory [`ProjectCollection`] is a cache flushed back with
//! [`ProjectStore::persist`].

mod collection;

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::error::StoreError;
use crate::paths::sanitize_file_name;
use crate::project::{parse_descriptor, render_descriptor, Project, DESCRIPTOR_FILE_NAME};

pub use collection::{ProjectCollection, ProjectHandle};

/// Attempts at finding a free project directory name
const MAX_DIR_SUFFIX: usize = 100;

// One writer at a time across every descriptor in the process
lazy_static::lazy_static! {
    static ref DESCRIPTOR_WRITE_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
}

#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the immediate sub-directories of the settings root.
    ///
    /// Directories without a descriptor, unreadable descriptors and repeated
    /// project ids are skipped; one bad project never blocks the rest.
    pub async fn load_all(&self) -> Vec<ProjectHandle> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("load_projects: {} does not exist", self.root.display());
                return Vec::new();
            }
            Err(e) => {
                error!("load_projects: cannot read {} error={}", self.root.display(), e);
                return Vec::new();
            }
        };

        let mut dirs = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        dirs.push(entry.path());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("load_projects: directory scan stopped early error={}", e);
                    break;
                }
            }
        }
        dirs.sort();

        let mut seen = HashSet::new();
        let mut projects = Vec::new();
        for dir in dirs {
            let descriptor = dir.join(DESCRIPTOR_FILE_NAME);
            match read_descriptor(&descriptor).await {
                Ok(Some(project)) => {
                    if !seen.insert(project.id) {
                        warn!(
                            "load_projects: duplicate project id {} in {}",
                            project.id,
                            descriptor.display()
                        );
                        continue;
                    }
                    projects.push(ProjectHandle::new(project, descriptor));
                }
                Ok(None) => debug!("load_projects: no descriptor in {}", dir.display()),
                Err(e) => warn!(
                    "load_projects: skipping {} error={}",
                    descriptor.display(),
                    e
                ),
            }
        }

        info!(
            "load_projects: {} project(s) from {}",
            projects.len(),
            self.root.display()
        );
        projects
    }

    /// Write the descriptor, logging and swallowing failures.
    pub async fn persist(&self, handle: &ProjectHandle) {
        if let Err(e) = self.try_persist(handle).await {
            error!(
                "persist_project: {} error={}",
                handle.descriptor_path().display(),
                e
            );
        }
    }

    /// Render under the write lock so the last writer holds the newest tree.
    pub async fn try_persist(&self, handle: &ProjectHandle) -> Result<(), StoreError> {
        let _guard = DESCRIPTOR_WRITE_LOCK.lock().await;
        let text = handle.read(render_descriptor)?;
        write_replacing(handle.descriptor_path(), text.as_bytes()).await
    }

    /// Give a new project its own directory, named after its confirmation
    /// time, and write the first descriptor.
    pub async fn create(&self, project: Project) -> Result<ProjectHandle, StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let stamp = project
            .confirmation_time
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d %H-%M-%S")
            .to_string();
        let base = sanitize_file_name(&stamp);

        let mut dir = self.root.join(&base);
        let mut suffix = 1;
        loop {
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::AlreadyExists && suffix < MAX_DIR_SUFFIX => {
                    suffix += 1;
                    dir = self.root.join(format!("{} ({})", base, suffix));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(StoreError::AlreadyExists(dir));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let handle = ProjectHandle::new(project, dir.join(DESCRIPTOR_FILE_NAME));
        self.try_persist(&handle).await?;
        info!(
            "create_project: {} at {}",
            handle.id(),
            handle.descriptor_path().display()
        );
        Ok(handle)
    }
}

async fn read_descriptor(path: &Path) -> Result<Option<Project>, StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(parse_descriptor(&text)?))
}

/// Write to a sibling temp file, then rename over the descriptor.
async fn write_replacing(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, bytes).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}
