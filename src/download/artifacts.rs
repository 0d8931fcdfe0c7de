//! Local inspection documents plus the reports and exchange databases built
//! from them.

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};

use crate::collab::{Collaborators, InspectionDocument, MediaReference, Pack, Severity};
use crate::error::{ArtifactError, CollabError, DownloadError, InspectionError, LoadError};
use crate::paths::{file_name_from_uri, resolve_download_path, sanitize_file_name};
use crate::project::{Inspection, SENTINEL_EXTENSION};
use crate::store::ProjectHandle;

/// Materialize the inspection document next to its media and produce the
/// individual artifacts the project asks for. Paths of everything written
/// are recorded on the inspection.
pub(super) async fn finish_inspection(
    collab: &Collaborators,
    handle: &ProjectHandle,
    index: usize,
    dir: &Path,
) -> Result<(), InspectionError> {
    let (inspection, report_ids, individual_exchange) = handle.read(|p| {
        (
            p.inspections[index].clone(),
            p.individual_report_ids.clone(),
            p.individual_exchange,
        )
    });
    let name = inspection.name.clone();
    let collab_error = |source: CollabError| InspectionError::Collab {
        name: name.clone(),
        source,
    };
    let artifact_error = |source: ArtifactError| InspectionError::Artifact {
        name: name.clone(),
        source,
    };

    let (pack, mut document) = open_document(collab, &inspection).map_err(|e| match e {
        OpenError::NoPackId => InspectionError::Load {
            name: name.clone(),
            source: LoadError::MissingPackId,
        },
        OpenError::Collab(source) => collab_error(source),
    })?;

    let missing = missing_media(&inspection, document.media().len(), dir).await;
    if !missing.is_empty() {
        return Err(InspectionError::MediaMissing {
            name: name.clone(),
            missing,
        });
    }

    let local_paths = local_media_paths(&inspection);
    document.relocate_media(&|media: &MediaReference| {
        local_paths
            .get(media.uri.as_str())
            .cloned()
            .unwrap_or_else(|| file_name_from_uri(&media.uri))
    });

    let data_path = dir.join(format!("{}{}", document.file_stem(), SENTINEL_EXTENSION));
    document.save(&data_path).map_err(collab_error)?;
    let data_len = tokio::fs::metadata(&data_path).await.map(|m| m.len()).ok();
    info!("inspection_document: {} saved to {}", name, data_path.display());

    let mut report_path = None;
    if !report_ids.is_empty() {
        let path = dir.join(sanitize_file_name(&document.default_report_name()));
        collab
            .reports
            .individual(document.as_ref(), &report_ids, &path)
            .await
            .map_err(artifact_error)?;
        info!("inspection_report: {} -> {}", name, path.display());
        report_path = Some(path);
    }

    let mut exchange_path = None;
    if individual_exchange {
        let problems = collab
            .exchange
            .validate(document.as_ref())
            .await
            .map_err(artifact_error)?;
        let mut blocking = Vec::new();
        for problem in problems {
            match problem.severity {
                Severity::Error => blocking.push(problem.description),
                Severity::Warning => {
                    warn!("inspection_exchange: {} warning={}", name, problem.description)
                }
            }
        }
        if !blocking.is_empty() {
            return Err(artifact_error(ArtifactError::InvalidData { problems: blocking }));
        }

        let path = dir.join(format!("{}.mdb", sanitize_file_name(&pack.name)));
        export_or_remove(&path, collab.exchange.export(document.as_ref(), &path))
            .await
            .map_err(artifact_error)?;
        info!("inspection_exchange: {} -> {}", name, path.display());
        exchange_path = Some(path);
    }

    handle.update(|p| {
        let inspection = &mut p.inspections[index];
        if let Some(sentinel) = inspection.files.iter_mut().find(|f| f.is_sentinel()) {
            sentinel.size = data_len;
            sentinel.downloaded_size = data_len.unwrap_or_default();
        }
        inspection.data_complete_path = Some(data_path);
        inspection.report_complete_path = report_path;
        inspection.exchange_complete_path = exchange_path;
    });
    Ok(())
}

/// Combined report and combined exchange database across every inspection,
/// each gated by its project flag.
pub(super) async fn produce_combined(
    collab: &Collaborators,
    handle: &ProjectHandle,
) -> Result<(), DownloadError> {
    let project = handle.snapshot();
    let wants_report = !project.combined_report_ids.is_empty();
    if !wants_report && !project.combined_exchange {
        return Ok(());
    }
    let collab_error = |source: CollabError| DownloadError::Collab {
        project: project.name.clone(),
        source,
    };
    let artifact_error = |source: ArtifactError| DownloadError::CombinedArtifact {
        project: project.name.clone(),
        source,
    };

    let mut documents: Vec<Box<dyn InspectionDocument>> = Vec::new();
    for inspection in &project.inspections {
        let (_, mut document) = open_document(collab, inspection).map_err(|e| match e {
            OpenError::NoPackId => collab_error(CollabError::Failed(format!(
                "inspection {} has no pack id",
                inspection.name
            ))),
            OpenError::Collab(source) => collab_error(source),
        })?;

        let folder = inspection
            .download_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| sanitize_file_name(&inspection.name));
        let local_paths = local_media_paths(inspection);
        document.relocate_media(&|media: &MediaReference| {
            let file = local_paths
                .get(media.uri.as_str())
                .cloned()
                .unwrap_or_else(|| file_name_from_uri(&media.uri));
            format!("{}/{}", folder, file)
        });
        documents.push(document);
    }
    let borrowed: Vec<&dyn InspectionDocument> = documents.iter().map(|d| d.as_ref()).collect();

    if wants_report {
        let path = project
            .combined_report_path()
            .ok_or_else(|| collab_error(CollabError::Failed("project has no download path".into())))?;
        collab
            .reports
            .combined(&borrowed, &project.combined_report_ids, &path)
            .await
            .map_err(artifact_error)?;
        info!("project_report: {} -> {}", project.name, path.display());
    }

    if project.combined_exchange {
        let path = project
            .combined_exchange_path()
            .ok_or_else(|| collab_error(CollabError::Failed("project has no download path".into())))?;
        export_or_remove(&path, collab.exchange.export_combined(&borrowed, &path))
            .await
            .map_err(artifact_error)?;
        info!("project_exchange: {} -> {}", project.name, path.display());
    }
    Ok(())
}

enum OpenError {
    NoPackId,
    Collab(CollabError),
}

fn open_document(
    collab: &Collaborators,
    inspection: &Inspection,
) -> Result<(Pack, Box<dyn InspectionDocument>), OpenError> {
    let id = inspection.pack_id().ok_or(OpenError::NoPackId)?;
    let pack = collab
        .registry
        .find(id)
        .ok_or(OpenError::Collab(CollabError::PackMissing(id)))?;
    let document = collab
        .factory
        .open(&pack, &inspection.json)
        .map_err(OpenError::Collab)?;
    Ok((pack, document))
}

/// Media URI to its path relative to the inspection directory.
fn local_media_paths(inspection: &Inspection) -> HashMap<&str, String> {
    inspection
        .files
        .iter()
        .filter(|f| !f.is_sentinel())
        .filter_map(|f| {
            let path = f.download_path.as_deref()?;
            let relative = path
                .strip_prefix("./")
                .or_else(|| path.strip_prefix(".\\"))
                .unwrap_or(path);
            Some((f.name.as_str(), relative.replace('\\', "/")))
        })
        .collect()
}

/// Media the document references that have no transferred file on disk.
///
/// Every media reference maps to one non-sentinel file entry, so an entry
/// count below `media_count` means the file list was never resolved.
async fn missing_media(inspection: &Inspection, media_count: usize, dir: &Path) -> Vec<String> {
    let mut missing = Vec::new();
    let mut present = 0;
    for (_, file) in inspection.transferable_files() {
        let on_disk = match file.download_path.as_deref() {
            Some(path) => tokio::fs::metadata(resolve_download_path(dir, path))
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            None => false,
        };
        if on_disk {
            present += 1;
        } else {
            missing.push(file.name.clone());
        }
    }
    if missing.is_empty() && present < media_count {
        missing.push(format!("{} unresolved reference(s)", media_count - present));
    }
    missing
}

/// Await an export; a failed export leaves no partial file behind.
async fn export_or_remove<F>(path: &Path, export: F) -> Result<(), ArtifactError>
where
    F: std::future::Future<Output = Result<(), ArtifactError>>,
{
    match export.await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Err(remove) = tokio::fs::remove_file(path).await {
                if remove.kind() != std::io::ErrorKind::NotFound {
                    warn!("export_cleanup: {} error={}", path.display(), remove);
                }
            }
            Err(e)
        }
    }
}
