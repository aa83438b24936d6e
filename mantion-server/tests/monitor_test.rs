// Monitor startup against a replayed image directory

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use mantion_core::{CameraConfig, CameraSource, MonitorConfig};
use mantion_server::Monitor;
use std::path::Path;
use tokio::runtime::Handle;
use tower::ServiceExt;

fn config_in(dir: &Path, cameras: Vec<CameraConfig>) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.cameras = cameras;
    // Nothing listens here; every cycle sees a detector fault and no presence
    config.detection.endpoint = "http://127.0.0.1:9/detect".to_string();
    config.detection.timeout_ms = 200;
    config.storage.database_path = dir.join("detections.db");
    config.capture.output_dir = dir.join("detections");
    config.alarm.sound_path = dir.join("alarm.wav");
    config.session.cycle_delay_ms = 20;
    config
}

fn write_frames(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    image::RgbImage::from_pixel(32, 24, image::Rgb([40, 40, 40]))
        .save(dir.join("frame_000.png"))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_starts_cameras_and_serves_them() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("frames");
    write_frames(&frames);
    let config = config_in(
        dir.path(),
        vec![CameraConfig {
            id: "line_a".to_string(),
            source: CameraSource::Images(frames),
        }],
    );

    let handle = Handle::current();
    let monitor = tokio::task::spawn_blocking(move || Monitor::start(&config, handle))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(monitor.hub().cameras_active(), 1);

    let response = monitor
        .router()
        .oneshot(Request::builder().uri("/api/cameras").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let cameras: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(cameras[0]["camera_id"], "line_a");
    assert_eq!(cameras[0]["state"], "RUNNING");

    let hub = monitor.hub().clone();
    monitor.shutdown().await;
    assert_eq!(hub.cameras_active(), 0);
    assert!(dir.path().join("detections.db").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_fails_when_no_camera_starts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(
        dir.path(),
        vec![CameraConfig {
            id: "line_a".to_string(),
            source: CameraSource::Images(dir.path().join("missing")),
        }],
    );

    let handle = Handle::current();
    let result = tokio::task::spawn_blocking(move || Monitor::start(&config, handle))
        .await
        .unwrap();
    let err = result.err().expect("startup should fail");
    assert!(err.to_string().contains("could be started"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_without_cameras_still_serves() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), Vec::new());

    let handle = Handle::current();
    let monitor = tokio::task::spawn_blocking(move || Monitor::start(&config, handle))
        .await
        .unwrap()
        .unwrap();

    let response = monitor
        .router()
        .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    monitor.shutdown().await;
}
