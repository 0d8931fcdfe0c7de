mod support;

use std::time::Duration;

use inspection_downloader::collab::Manifest;
use inspection_downloader::events::DownloadEvent;
use inspection_downloader::jobs::QueueState;
use inspection_downloader::project::{parse_descriptor, InspectionState};
use inspection_downloader::DownloadService;
use reqwest::Client;
use serde_json::json;
use support::{collaborators, mount_media, payload, settings, wait_until, Recorder};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn total_jobs(service: &DownloadService) -> usize {
    QueueState::ALL
        .iter()
        .map(|state| service.jobs(*state).unwrap().len())
        .sum()
}

#[tokio::test]
async fn created_download_runs_to_completion() {
    let server = MockServer::start().await;
    mount_media(&server, "/a.mp4", b"aaaaa").await;
    mount_media(&server, "/b.mp4", b"bbbbb").await;

    let root = tempfile::tempdir().unwrap();
    let data = root.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    let recorder = Arc::new(Recorder::default());
    let service = DownloadService::start(
        settings(root.path()),
        collaborators(recorder.clone()),
        Client::new(),
    );
    let mut events = service.subscribe();

    let manifest = Manifest {
        deliverable_name: Some("North basin".into()),
        inspections: vec![
            payload("Pipe 1", &[format!("{}/a.mp4", server.uri())]),
            payload("Pipe 2", &[format!("{}/b.mp4", server.uri())]),
        ],
        combined_exchange: true,
        ..Manifest::default()
    };
    let handle = service
        .create_download(manifest, "North basin", &data)
        .await
        .unwrap();

    wait_until(Duration::from_secs(10), || {
        handle.read(|p| p.state()) == InspectionState::Complete
    })
    .await;
    wait_until(Duration::from_secs(10), || total_jobs(&service) == 0).await;

    assert!(data.join("Inspection 1").join("a.mp4").exists());
    assert!(data.join("Inspection 2").join("b.mp4").exists());
    assert!(data.join("North basin.mdb").exists());
    assert_eq!(recorder.combined_exports.lock().unwrap().len(), 1);

    let text = std::fs::read_to_string(handle.descriptor_path()).unwrap();
    let on_disk = parse_descriptor(&text).unwrap();
    assert_eq!(on_disk.name, "North basin");
    assert!(on_disk.confirmation_time.is_some());
    assert!(on_disk
        .inspections
        .iter()
        .all(|i| i.state == InspectionState::Complete));
    assert_eq!(on_disk.inspections[0].project.as_deref(), Some("North basin"));

    let mut saw_complete = false;
    while let Ok(event) = events.try_recv() {
        if let DownloadEvent::ProjectStatus(status) = event {
            saw_complete |= status.status == InspectionState::Complete;
        }
    }
    assert!(saw_complete);

    service.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn shutdown_leaves_in_flight_work_paused_on_disk() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/slow.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", "4000")
                .insert_header("accept-ranges", "bytes"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow.mp4"))
        .respond_with(ResponseTemplate::new(206).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let data = root.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    let mut config = settings(root.path());
    config.chunk_size = 1000;
    let service = DownloadService::start(
        config,
        collaborators(Arc::new(Recorder::default())),
        Client::new(),
    );

    let manifest = Manifest {
        inspections: vec![payload("Pipe 1", &[format!("{}/slow.mp4", server.uri())])],
        ..Manifest::default()
    };
    let handle = service
        .create_download(manifest, "Slow", &data)
        .await
        .unwrap();
    wait_until(Duration::from_secs(10), || {
        handle.read(|p| p.inspections[0].state) == InspectionState::Processing
    })
    .await;

    service.shutdown(Duration::from_secs(5)).await;

    let text = std::fs::read_to_string(handle.descriptor_path()).unwrap();
    let on_disk = parse_descriptor(&text).unwrap();
    assert_eq!(on_disk.inspections[0].state, InspectionState::Paused);
}

#[tokio::test]
async fn loading_persisted_projects_submits_one_job_each() {
    let root = tempfile::tempdir().unwrap();
    let config = settings(root.path());
    let pack = support::PACK_ID.to_string();
    for (dir, id) in [("2024-05-01 10-00-00", uuid::Uuid::new_v4()), ("2024-05-02 09-30-00", uuid::Uuid::new_v4())] {
        let project_dir = config.settings_root.join(dir);
        std::fs::create_dir_all(&project_dir).unwrap();
        let descriptor = json!({
            "Id": id,
            "Name": dir,
            // Missing drive: jobs reschedule instead of running.
            "DownloadPath": "/unplugged-drive/deliverables",
            "Inspections": [{
                "State": "Paused",
                "Name": "Inspection 1",
                "DownloadPath": "/unplugged-drive/deliverables/Inspection 1",
                "Json": { "$packId": pack, "name": "Pipe 1" },
                "Files": [{ "Name": "Pipe_1.ptdx", "DownloadPath": "./Pipe_1.ptdx" }]
            }]
        });
        std::fs::write(project_dir.join("info.json"), descriptor.to_string()).unwrap();
    }
    std::fs::create_dir_all(config.settings_root.join("corrupt")).unwrap();
    std::fs::write(config.settings_root.join("corrupt").join("info.json"), "{ nope").unwrap();

    let service = DownloadService::start(
        config,
        collaborators(Arc::new(Recorder::default())),
        Client::new(),
    );
    assert_eq!(service.load_downloads().await, 2);
    // A second scan adds nothing and submits nothing.
    assert_eq!(service.load_downloads().await, 0);

    wait_until(Duration::from_secs(10), || {
        service.jobs(QueueState::Scheduled).unwrap().len() == 2
    })
    .await;
    for project in service.projects() {
        let jobs = service
            .bridge()
            .find_jobs_for_project(project.descriptor_path())
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }
    assert_eq!(total_jobs(&service), 2);

    service.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn removing_a_project_cancels_its_job() {
    let root = tempfile::tempdir().unwrap();
    let service = DownloadService::start(
        settings(root.path()),
        collaborators(Arc::new(Recorder::default())),
        Client::new(),
    );

    let manifest = Manifest {
        inspections: vec![payload("Pipe 1", &[])],
        ..Manifest::default()
    };
    // Download root missing, so the job parks in the scheduled queue.
    let handle = service
        .create_download(manifest, "Gone", &root.path().join("missing"))
        .await
        .unwrap();
    wait_until(Duration::from_secs(10), || {
        service.jobs(QueueState::Scheduled).unwrap().len() == 1
    })
    .await;

    assert!(service.remove_project(handle.descriptor_path()).is_some());
    assert_eq!(total_jobs(&service), 0);
    assert!(service.find_project(handle.descriptor_path()).is_none());

    service.shutdown(Duration::from_secs(5)).await;
}
