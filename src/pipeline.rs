//! Background detection.
//!
//! Detection never runs on the caller's thread. `DetectionWorker::submit` hands the
//! image to a fresh thread and returns a request id at once; the outcome arrives later
//! on the worker's completion channel. Every failure inside the pipeline is folded into
//! `DetectionOutcome::Failure`, whose user facing text is always the same generic
//! message. The detail goes to the log only.

use std::fmt;
use std::panic::{ self, AssertUnwindSafe };
use std::path::PathBuf;
use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::mpsc::{ self, Receiver, RecvTimeoutError, Sender };
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::detector::{ DetectionResult, Frame, PlateDetector };
use crate::error::LprError;
use crate::log_store::LogStore;

pub const FAILED_MESSAGE: &str = "Detection failed.";

/// What to run detection on.
#[derive(Debug, Clone)]
pub enum DetectionInput {
    Path(PathBuf),
    Frame(Frame),
}

#[derive(Debug)]
pub enum FailureReason {
    Error(LprError),
    TimedOut(Duration),
    /// the detection thread panicked
    Crashed,
}

#[derive(Debug)]
pub enum DetectionOutcome {
    Success(DetectionResult),
    Failure(FailureReason),
}

/// A finished request, tagged with the id `submit` returned for it.
#[derive(Debug)]
pub struct Completion {
    pub request_id: u64,
    pub outcome: DetectionOutcome,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Error(e) => e.fmt(f),
            FailureReason::TimedOut(limit) => write!(f, "no result within {:?}", limit),
            FailureReason::Crashed => f.write_str("detection thread panicked"),
        }
    }
}

impl DetectionOutcome {
    /// The one line shown to the user.
    pub fn status_message(&self) -> String {
        match self {
            DetectionOutcome::Success(result) => format!("[{}] Plate: {}", result.vehicle_class, result.plate_text),
            DetectionOutcome::Failure(_) => FAILED_MESSAGE.to_string(),
        }
    }
}

/// Run one detection on the current thread and log the plate.
///
/// A log write failure is reported but does not turn a detection into a failure.
pub fn run_detection(detector: &PlateDetector, log_store: &LogStore, input: &DetectionInput) -> DetectionOutcome {
    match detect_input(detector, input) {
        Ok(result) => {
            record(log_store, &result);
            DetectionOutcome::Success(result)
        }
        Err(e) => {
            log::error!("Detection failed: {}", e);
            DetectionOutcome::Failure(FailureReason::Error(e))
        }
    }
}

fn detect_input(detector: &PlateDetector, input: &DetectionInput) -> Result<DetectionResult, LprError> {
    match input {
        DetectionInput::Path(path) => detector.detect_path(path),
        DetectionInput::Frame(frame) => detector.detect(frame),
    }
}

fn record(log_store: &LogStore, result: &DetectionResult) {
    match log_store.append(&result.plate_text) {
        Ok(record) => log::info!("logged {} at {}", record.plate_text, record.timestamp),
        Err(e) => log::error!("{} (detection result kept)", e),
    }
}

/// Runs detections on background threads, each bounded by a timeout.
///
/// Requests are never cancelled. When several are in flight they all complete and the
/// consumer decides what to show; see `DisplayState`.
pub struct DetectionWorker {
    detector: Arc<PlateDetector>,
    log_store: Arc<LogStore>,
    timeout: Duration,
    next_id: AtomicU64,
    completions: Sender<Completion>,
}

impl DetectionWorker {

    pub fn new(detector: Arc<PlateDetector>, log_store: Arc<LogStore>, timeout: Duration) -> (Self, Receiver<Completion>) {
        let (completions, rx) = mpsc::channel();
        let worker = Self {
            detector,
            log_store,
            timeout,
            next_id: AtomicU64::new(1),
            completions,
        };
        (worker, rx)
    }

    /// Queue `input` for detection and return its request id.
    pub fn submit(&self, input: DetectionInput) -> u64 {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let detector = Arc::clone(&self.detector);
        let log_store = Arc::clone(&self.log_store);
        let completions = self.completions.clone();
        let timeout = self.timeout;

        let spawned = thread::Builder::new()
            .name(format!("lpr-detect-{}", request_id))
            .spawn(move || {
                let outcome = supervise(detector, log_store, input, timeout);
                let _ = completions.send(Completion { request_id, outcome });
            });
        if let Err(e) = spawned {
            log::error!("Detection failed: could not start detection thread: {}", e);
            let outcome = DetectionOutcome::Failure(FailureReason::Error(e.into()));
            let _ = self.completions.send(Completion { request_id, outcome });
        }
        request_id
    }
}

/// Detect on a helper thread and wait for it at most `timeout`. Logging happens here,
/// after the wait, so a detection that overran is never recorded.
fn supervise(detector: Arc<PlateDetector>, log_store: Arc<LogStore>, input: DetectionInput, timeout: Duration) -> DetectionOutcome {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("lpr-ocr".to_string())
        .spawn(move || {
            let detected = panic::catch_unwind(AssertUnwindSafe(|| detect_input(&detector, &input)));
            let _ = tx.send(detected);
        });
    if let Err(e) = spawned {
        log::error!("Detection failed: could not start ocr thread: {}", e);
        return DetectionOutcome::Failure(FailureReason::Error(e.into()));
    }

    let reason = match rx.recv_timeout(timeout) {
        Ok(Ok(Ok(result))) => {
            record(&log_store, &result);
            return DetectionOutcome::Success(result);
        }
        Ok(Ok(Err(e))) => FailureReason::Error(e),
        Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => FailureReason::Crashed,
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("ocr still running after {:?}, its result will be dropped", timeout);
            FailureReason::TimedOut(timeout)
        }
    };
    log::error!("Detection failed: {}", reason);
    DetectionOutcome::Failure(reason)
}

/// What the display currently shows. Completions are applied as they arrive and the
/// last one applied wins, whichever request it belongs to.
#[derive(Debug, Default)]
pub struct DisplayState {
    shown_request: Option<u64>,
    status: String,
    image: Option<Frame>,
}

impl DisplayState {

    pub fn apply(&mut self, completion: Completion) {
        self.shown_request = Some(completion.request_id);
        self.status = completion.outcome.status_message();
        // a failure keeps whatever image was up before
        if let DetectionOutcome::Success(result) = completion.outcome {
            self.image = Some(result.annotated_image);
        }
    }

    pub fn shown_request(&self) -> Option<u64> {
        self.shown_request
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn image(&self) -> Option<&Frame> {
        self.image.as_ref()
    }
}
