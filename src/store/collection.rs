//! In-memory project collection shared by loaders, jobs and the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use uuid::Uuid;

use crate::paths::same_path;
use crate::project::Project;

/// One loaded project plus the descriptor it is persisted to.
///
/// Access goes through closures so no lock is ever held across an await.
#[derive(Debug)]
pub struct ProjectHandle {
    id: Uuid,
    descriptor_path: PathBuf,
    project: Mutex<Project>,
}

impl ProjectHandle {
    pub fn new(project: Project, descriptor_path: PathBuf) -> Self {
        Self {
            id: project.id,
            descriptor_path,
            project: Mutex::new(project),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn descriptor_path(&self) -> &Path {
        &self.descriptor_path
    }

    /// Directory holding the descriptor.
    pub fn project_dir(&self) -> &Path {
        self.descriptor_path
            .parent()
            .unwrap_or(self.descriptor_path.as_path())
    }

    pub fn read<R>(&self, f: impl FnOnce(&Project) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Project) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> Project {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Project> {
        self.project
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Ordered, concurrency-safe set of projects, unique by id and by descriptor path.
#[derive(Debug, Default)]
pub struct ProjectCollection {
    items: RwLock<Vec<Arc<ProjectHandle>>>,
}

impl ProjectCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a project; returns `false` when its id or descriptor is already present.
    pub fn insert(&self, handle: Arc<ProjectHandle>) -> bool {
        let mut items = self
            .items
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let duplicate = items.iter().any(|existing| {
            existing.id() == handle.id()
                || same_path(existing.descriptor_path(), handle.descriptor_path())
        });
        if duplicate {
            return false;
        }
        items.push(handle);
        true
    }

    pub fn remove(&self, descriptor_path: &Path) -> Option<Arc<ProjectHandle>> {
        let mut items = self
            .items
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let index = items
            .iter()
            .position(|h| same_path(h.descriptor_path(), descriptor_path))?;
        Some(items.remove(index))
    }

    pub fn find(&self, descriptor_path: &Path) -> Option<Arc<ProjectHandle>> {
        self.snapshot()
            .into_iter()
            .find(|h| same_path(h.descriptor_path(), descriptor_path))
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<Arc<ProjectHandle>> {
        self.snapshot().into_iter().find(|h| h.id() == id)
    }

    /// Copy of the current members; iteration never blocks writers.
    pub fn snapshot(&self) -> Vec<Arc<ProjectHandle>> {
        self.items
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.items
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
