use image::{ Rgb, RgbImage };

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use lpr_capture::backends::ScriptedReader;
use lpr_capture::config::CameraConfig;
use lpr_capture::{ CaptureSession, DetectionInput, DetectionOutcome, DetectionWorker, DisplayState, LogStore, PlateDetector, TextCandidate };

const WAIT: Duration = Duration::from_secs(5);

fn plate_detector(text: &str) -> Arc<PlateDetector> {
    let candidate = TextCandidate {
        polygon: vec![(4.0, 4.0), (28.0, 4.0), (28.0, 14.0), (4.0, 14.0)],
        text: text.to_string(),
        confidence: 0.87,
    };
    Arc::new(PlateDetector::new(Box::new(ScriptedReader::new(vec![candidate]))))
}

#[test]
fn image_file_to_log() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("car.png");
    RgbImage::from_pixel(40, 30, Rgb([120, 130, 140])).save(&image_path).unwrap();

    let log_store = Arc::new(LogStore::new(dir.path().join("log.csv")));
    let (worker, completions) = DetectionWorker::new(plate_detector("KA 01 AB 1234"), Arc::clone(&log_store), WAIT);
    worker.submit(DetectionInput::Path(image_path));

    let mut display = DisplayState::default();
    display.apply(completions.recv_timeout(WAIT).unwrap());
    assert_eq!(display.status(), "[Vehicle] Plate: KA01AB1234");
    assert_eq!(display.image().unwrap().dimensions(), (40, 30));

    let records = log_store.recent().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].plate_text, "KA01AB1234");
}

#[test]
fn camera_still_to_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = CameraConfig {
        device: "stub://integration".to_string(),
        width: 48,
        height: 32,
        target_fps: 100,
        retry_backoff_ms: 5,
    };
    let (notify_tx, notify_rx) = mpsc::sync_channel(1);
    let mut session = CaptureSession::new(config).with_notifier(notify_tx);
    session.start().unwrap();
    notify_rx.recv_timeout(WAIT).unwrap();
    let still = session.capture_still().unwrap();
    session.stop();
    assert!(!session.is_running());

    let log_store = Arc::new(LogStore::new(dir.path().join("log.csv")));
    let (worker, completions) = DetectionWorker::new(plate_detector("XYZ9999"), Arc::clone(&log_store), WAIT);
    worker.submit(DetectionInput::Frame(still));

    let completion = completions.recv_timeout(WAIT).unwrap();
    match completion.outcome {
        DetectionOutcome::Success(result) => {
            assert_eq!(result.plate_text, "XYZ9999");
            assert_eq!(result.annotated_image.dimensions(), (48, 32));
        }
        DetectionOutcome::Failure(reason) => panic!("detection failed: {}", reason),
    }
    assert_eq!(log_store.read_all().unwrap()[0].plate_text, "XYZ9999");
}

#[test]
fn log_keeps_append_order() {
    let dir = tempfile::tempdir().unwrap();
    let log_store = LogStore::new(dir.path().join("log.csv"));
    log_store.append("ABC1234").unwrap();
    log_store.append("XYZ9999").unwrap();

    let records = log_store.read_all().unwrap();
    let plates: Vec<&str> = records.iter().map(|r| r.plate_text.as_str()).collect();
    assert_eq!(plates, vec!["ABC1234", "XYZ9999"]);
    assert!(records[0].timestamp <= records[1].timestamp);
}
