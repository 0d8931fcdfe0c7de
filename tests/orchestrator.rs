mod support;

use std::time::Duration;

use inspection_downloader::download::ProjectOutcome;
use inspection_downloader::error::{DownloadError, InspectionError};
use inspection_downloader::jobs::{JobKind, JobOutcome, JobRecord, JobRunner, QueueState};
use inspection_downloader::project::InspectionState;
use serde_json::json;
use support::{mount_media, mount_missing, payload, Harness, PACK_NAME};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn states(project: &inspection_downloader::project::Project) -> Vec<InspectionState> {
    project.inspections.iter().map(|i| i.state).collect()
}

#[tokio::test]
async fn failed_inspection_keeps_siblings_complete_and_blocks_combined_artifacts() {
    let server = MockServer::start().await;
    mount_media(&server, "/one.mp4", b"first").await;
    mount_missing(&server, "/two.mp4").await;
    mount_media(&server, "/three.mp4", b"third").await;

    let h = Harness::new();
    let handle = h
        .add_project(
            vec![
                payload("Pipe 1", &[format!("{}/one.mp4", server.uri())]),
                payload("Pipe 2", &[format!("{}/two.mp4", server.uri())]),
                payload("Pipe 3", &[format!("{}/three.mp4", server.uri())]),
            ],
            |p| {
                p.combined_exchange = true;
                p.combined_report_ids = vec![Uuid::new_v4()];
            },
        )
        .await;

    let result = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await;

    match result {
        Err(DownloadError::InspectionsFailed { errors, .. }) => {
            assert_eq!(errors.len(), 1);
            assert!(matches!(errors[0], InspectionError::FilesFailed { .. }));
        }
        other => panic!("expected aggregated failure, got {:?}", other),
    }

    let expected = vec![
        InspectionState::Complete,
        InspectionState::Errored,
        InspectionState::Complete,
    ];
    assert_eq!(handle.read(states), expected);
    assert_eq!(states(&h.on_disk(&handle)), expected);

    assert!(h.recorder.combined_reports.lock().unwrap().is_empty());
    assert!(h.recorder.combined_exports.lock().unwrap().is_empty());
    let project = handle.snapshot();
    assert!(!project.combined_exchange_path().unwrap().exists());
    assert!(!project.combined_report_path().unwrap().exists());
}

#[tokio::test]
async fn complete_pass_materializes_documents_and_every_artifact() {
    let server = MockServer::start().await;
    mount_media(&server, "/media/Pipe%20A.mp4", b"aaaaa").await;
    mount_media(&server, "/media/b.mp4", b"bbbbb").await;

    let h = Harness::new();
    let handle = h
        .add_project(
            vec![
                payload("Pipe 1", &[format!("{}/media/Pipe%20A.mp4", server.uri())]),
                payload("Pipe 2", &[format!("{}/media/b.mp4", server.uri())]),
            ],
            |p| {
                p.deliverable_name = Some("Phase 2".into());
                p.individual_exchange = true;
                p.individual_report_ids = vec![Uuid::new_v4()];
                p.combined_exchange = true;
                p.combined_report_ids = vec![Uuid::new_v4()];
            },
        )
        .await;

    let outcome = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ProjectOutcome::Complete);

    let project = handle.snapshot();
    assert_eq!(project.state(), InspectionState::Complete);
    assert!((project.progress() - 1.0).abs() < f64::EPSILON);

    let first = &project.inspections[0];
    assert_eq!(first.name, "Pipe 1");
    let dir = h.data.join("Inspection 1");
    assert_eq!(std::fs::read(dir.join("Pipe A.mp4")).unwrap(), b"aaaaa");
    assert_eq!(first.data_complete_path.as_deref(), Some(dir.join("Pipe_1.ptdx").as_path()));
    assert_eq!(
        first.exchange_complete_path.as_deref(),
        Some(dir.join(format!("{}.mdb", PACK_NAME)).as_path())
    );
    assert_eq!(
        first.report_complete_path.as_deref(),
        Some(dir.join("Pipe 1 report.pdf").as_path())
    );

    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("Pipe_1.ptdx")).unwrap()).unwrap();
    assert_eq!(document["media"], json!(["Pipe A.mp4"]));

    assert_eq!(h.recorder.reports.lock().unwrap().len(), 2);
    assert_eq!(h.recorder.exports.lock().unwrap().len(), 2);
    let combined = h.recorder.combined_exports.lock().unwrap().clone();
    assert_eq!(combined, vec![(2, h.data.join("Phase 2.mdb"))]);
    assert!(h.data.join("Phase 2.pdf").exists());

    // The sentinel document is produced locally, never requested.
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.iter().all(|r| !r.url.path().ends_with(".ptdx")));

    assert_eq!(
        states(&h.on_disk(&handle)),
        vec![InspectionState::Complete, InspectionState::Complete]
    );
}

#[tokio::test]
async fn cancellation_mid_transfer_persists_paused() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/large.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", "4000")
                .insert_header("accept-ranges", "bytes"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/large.bin"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(vec![7u8; 1000])
                .insert_header("content-range", "bytes 0-999/4000")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let h = Harness::with_settings(|s| s.chunk_size = 1000);
    let handle = h
        .add_project(
            vec![
                payload("Pipe 1", &[format!("{}/large.bin", server.uri())]),
                payload("Pipe 2", &[format!("{}/large.bin", server.uri())]),
            ],
            |_| {},
        )
        .await;

    let token = CancellationToken::new();
    let (outcome, _) = tokio::join!(
        h.orchestrator
            .download_project(handle.descriptor_path(), &token),
        async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        }
    );

    assert_eq!(outcome.unwrap(), ProjectOutcome::Paused);
    let expected = vec![InspectionState::Paused, InspectionState::Paused];
    assert_eq!(handle.read(states), expected);
    assert_eq!(states(&h.on_disk(&handle)), expected);
}

#[tokio::test]
async fn cancelled_before_start_leaves_complete_inspections_alone() {
    let server = MockServer::start().await;
    mount_media(&server, "/a.mp4", b"aaaaa").await;

    let h = Harness::new();
    let handle = h
        .add_project(
            vec![
                payload("Pipe 1", &[format!("{}/a.mp4", server.uri())]),
                payload("Pipe 2", &[format!("{}/a.mp4", server.uri())]),
            ],
            |_| {},
        )
        .await;
    handle.update(|p| p.inspections[0].state = InspectionState::Complete);

    let token = CancellationToken::new();
    token.cancel();
    let outcome = h
        .orchestrator
        .download_project(handle.descriptor_path(), &token)
        .await
        .unwrap();

    assert_eq!(outcome, ProjectOutcome::Paused);
    assert_eq!(
        states(&h.on_disk(&handle)),
        vec![InspectionState::Complete, InspectionState::Paused]
    );
}

#[tokio::test]
async fn failed_validation_errors_the_inspection_without_an_exchange_file() {
    let server = MockServer::start().await;
    mount_media(&server, "/a.mp4", b"aaaaa").await;

    let h = Harness::new();
    let handle = h
        .add_project(
            vec![payload("invalid pipe", &[format!("{}/a.mp4", server.uri())])],
            |p| p.individual_exchange = true,
        )
        .await;

    let result = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await;
    assert!(result.is_err());
    assert_eq!(handle.read(states), vec![InspectionState::Errored]);
    assert!(!h.data.join("Inspection 1").join(format!("{}.mdb", PACK_NAME)).exists());
    assert!(h.recorder.exports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_export_removes_partial_database() {
    let server = MockServer::start().await;
    mount_media(&server, "/a.mp4", b"aaaaa").await;

    let h = Harness::new();
    let handle = h
        .add_project(
            vec![payload("explode", &[format!("{}/a.mp4", server.uri())])],
            |p| p.individual_exchange = true,
        )
        .await;

    let result = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await;
    assert!(result.is_err());
    assert_eq!(handle.read(states), vec![InspectionState::Errored]);
    assert!(!h.data.join("Inspection 1").join(format!("{}.mdb", PACK_NAME)).exists());
}

#[tokio::test]
async fn errored_inspection_is_not_retried_by_a_later_pass() {
    let server = MockServer::start().await;
    mount_missing(&server, "/gone.mp4").await;

    let h = Harness::new();
    let handle = h
        .add_project(vec![payload("Pipe 1", &[format!("{}/gone.mp4", server.uri())])], |_| {})
        .await;

    let token = CancellationToken::new();
    assert!(h
        .orchestrator
        .download_project(handle.descriptor_path(), &token)
        .await
        .is_err());
    let requests_after_first = server.received_requests().await.unwrap_or_default().len();

    match h
        .orchestrator
        .download_project(handle.descriptor_path(), &token)
        .await
    {
        Err(DownloadError::InspectionsFailed { errors, .. }) => {
            assert!(matches!(
                errors[0],
                InspectionError::NotActionable {
                    state: InspectionState::Errored,
                    ..
                }
            ));
        }
        other => panic!("expected not-actionable failure, got {:?}", other),
    }
    assert_eq!(
        server.received_requests().await.unwrap_or_default().len(),
        requests_after_first
    );
}

#[tokio::test]
async fn local_media_is_copied_into_the_inspection_directory() {
    let h = Harness::new();
    let source = h.root().join("camera").join("clip.mpg");
    std::fs::create_dir_all(source.parent().unwrap()).unwrap();
    std::fs::write(&source, b"local video").unwrap();

    let local = json!({
        "$packId": support::PACK_ID.to_string(),
        "name": "Pipe 1",
        "media": [{ "uri": "clip.mpg", "local": source.to_string_lossy() }],
    });
    let handle = h.add_project(vec![local], |_| {}).await;

    let files = handle.read(|p| p.inspections[0].files.clone());
    assert_eq!(files.len(), 2);
    assert!(files[0].is_sentinel());
    assert!(files[1].name.starts_with("file://"));
    assert_eq!(files[1].size, Some(11));

    let outcome = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ProjectOutcome::Complete);
    assert_eq!(
        std::fs::read(h.data.join("Inspection 1").join("clip.mpg")).unwrap(),
        b"local video"
    );
}

#[tokio::test]
async fn unavailable_download_root_asks_for_a_reschedule() {
    let h = Harness::new();
    let handle = h
        .add_project(vec![payload("Pipe 1", &[])], |p| {
            p.download_path = Some(std::path::PathBuf::from("/unplugged-drive/deliverables"));
        })
        .await;

    let outcome = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ProjectOutcome::RootUnavailable);

    let job = JobRecord {
        id: 1,
        kind: JobKind::DownloadProject,
        project_path: handle.descriptor_path().to_path_buf(),
        state: QueueState::Processing,
    };
    assert_eq!(
        h.orchestrator.run(&job, CancellationToken::new()).await,
        JobOutcome::Reschedule(h.settings.reschedule_delay)
    );
    assert_eq!(handle.read(states), vec![InspectionState::Staged]);
}

#[tokio::test]
async fn removed_project_is_a_no_op() {
    let h = Harness::new();
    let handle = h.add_project(vec![payload("Pipe 1", &[])], |_| {}).await;
    h.projects.remove(handle.descriptor_path());

    let outcome = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ProjectOutcome::Missing);
}

#[tokio::test]
async fn cancelled_reload_is_resolved_again_before_transfer() {
    let server = MockServer::start().await;
    mount_media(&server, "/a.mp4", b"aaaaa").await;

    let h = Harness::new();
    let handle = h
        .add_project(vec![payload("Pipe 1", &[format!("{}/a.mp4", server.uri())])], |_| {})
        .await;

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(h.loader.load(&handle, 0, &cancelled).await.is_err());
    assert_eq!(handle.read(states), vec![InspectionState::Loading]);
    assert!(handle.read(|p| p.inspections[0].files.is_empty()));

    // A cancelled pass leaves the unresolved inspection alone.
    let outcome = h
        .orchestrator
        .download_project(handle.descriptor_path(), &cancelled)
        .await
        .unwrap();
    assert_eq!(outcome, ProjectOutcome::Paused);
    assert_eq!(states(&h.on_disk(&handle)), vec![InspectionState::Loading]);

    let outcome = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ProjectOutcome::Complete);
    assert_eq!(handle.read(|p| p.inspections[0].files.len()), 2);
    assert_eq!(
        std::fs::read(h.data.join("Inspection 1").join("a.mp4")).unwrap(),
        b"aaaaa"
    );
}

#[tokio::test]
async fn inspection_without_its_media_on_disk_is_not_completed() {
    let server = MockServer::start().await;
    mount_media(&server, "/a.mp4", b"aaaaa").await;

    let h = Harness::new();
    let handle = h
        .add_project(vec![payload("Pipe 1", &[format!("{}/a.mp4", server.uri())])], |_| {})
        .await;
    handle.update(|p| p.inspections[0].files.retain(|f| f.is_sentinel()));

    let result = h
        .orchestrator
        .download_project(handle.descriptor_path(), &CancellationToken::new())
        .await;
    match result {
        Err(DownloadError::InspectionsFailed { errors, .. }) => {
            assert!(matches!(errors[0], InspectionError::MediaMissing { .. }));
        }
        other => panic!("expected missing media, got {:?}", other),
    }
    assert_eq!(handle.read(states), vec![InspectionState::Errored]);
    assert!(!h.data.join("Inspection 1").join("Pipe_1.ptdx").exists());
}
