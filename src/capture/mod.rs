//! Camera capture session.
//!
//! A running session owns one background thread which owns the device. The thread keeps
//! overwriting a single latest-frame slot; readers copy out of that slot under its lock.
//! The slot is lossy by design: a slow reader only ever sees the newest frame, never a
//! backlog.

use image::imageops::{ self, FilterType };

use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::mpsc::SyncSender;
use std::sync::{ Arc, Mutex, MutexGuard };
use std::thread::{ self, JoinHandle };
use std::time::Duration;

use crate::config::CameraConfig;
use crate::detector::Frame;
use crate::error::LprError;

mod source;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use source::{ open_device, FrameSource, SyntheticSource };

/// Sent after every frame that lands in the latest-frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReady {
    pub sequence: u64,
}

struct Shared {
    running: AtomicBool,
    latest: Mutex<Option<Frame>>,
    frames: AtomicU64,
}

impl Shared {
    fn latest(&self) -> MutexGuard<'_, Option<Frame>> {
        // a frame is replaced wholesale, a poisoned slot still holds a complete one
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct CaptureSession {
    config: CameraConfig,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<Box<dyn FrameSource>>>,
    notifier: Option<SyncSender<FrameReady>>,
}

impl CaptureSession {

    pub fn new(config: CameraConfig) -> Self {
        let shared = Shared {
            running: AtomicBool::new(false),
            latest: Mutex::new(None),
            frames: AtomicU64::new(0),
        };
        Self { config, shared: Arc::new(shared), worker: None, notifier: None }
    }

    /// Receive `FrameReady` notices for published frames.
    ///
    /// Notices are dropped while the channel is full, so a slow consumer sees at most
    /// `bound` stale notices and the frame slot itself is never queued.
    pub fn with_notifier(mut self, notifier: SyncSender<FrameReady>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Open the configured device and start acquiring.
    ///
    /// A session that is already running is stopped first, so at most one device is
    /// ever open. If the device cannot be opened the session stays idle.
    pub fn start(&mut self) -> Result<(), LprError> {
        self.stop();
        *self.shared.latest() = None;
        let source = open_device(&self.config)?;
        self.start_with(source)
    }

    /// Start acquiring from an already opened source.
    pub fn start_with(&mut self, source: Box<dyn FrameSource>) -> Result<(), LprError> {
        self.stop();
        *self.shared.latest() = None;
        self.shared.running.store(true, Ordering::Release);

        let name = source.name();
        let shared = Arc::clone(&self.shared);
        let notifier = self.notifier.clone();
        let backoff = self.config.retry_backoff();
        let spawned = thread::Builder::new()
            .name("lpr-capture".to_string())
            .spawn(move || acquisition_loop(source, shared, notifier, backoff));
        match spawned {
            Ok(worker) => {
                log::info!("capture session started on {}", name);
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop acquiring and release the device. Does nothing when idle.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.join() {
            Ok(source) => {
                log::info!("capture session stopped, released {}", source.name());
                drop(source);
            }
            Err(_) => log::error!("capture thread panicked, device dropped with it"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Frames published since the session was created.
    pub fn frames_captured(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    /// Copy of the newest frame.
    pub fn capture_still(&self) -> Result<Frame, LprError> {
        self.shared.latest().clone().ok_or_else(LprError::no_frame)
    }

    /// Newest frame scaled for display, if there is one.
    pub fn preview(&self, width: u32, height: u32) -> Option<Frame> {
        let frame = self.shared.latest().clone()?;
        Some(imageops::resize(&frame, width, height, FilterType::Triangle))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquisition_loop(
    mut source: Box<dyn FrameSource>,
    shared: Arc<Shared>,
    notifier: Option<SyncSender<FrameReady>>,
    backoff: Duration,
) -> Box<dyn FrameSource> {
    while shared.running.load(Ordering::Acquire) {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("frame read from {} failed: {}", source.name(), e);
                if !backoff.is_zero() {
                    thread::sleep(backoff);
                }
                continue;
            }
        };
        *shared.latest() = Some(frame);
        let sequence = shared.frames.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(notifier) = &notifier {
            // a full channel means an unread notice is pending; nobody listening is fine too
            let _ = notifier.try_send(FrameReady { sequence });
        }
    }
    source
}


#[cfg(test)]
mod test {

    use super::*;
    use crate::error::LprErrorKind;
    use image::{ Rgb, RgbImage };
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{ self, Receiver, Sender };
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn config(device: &str) -> CameraConfig {
        CameraConfig {
            device: device.to_string(),
            width: 16,
            height: 12,
            target_fps: 200,
            retry_backoff_ms: 1,
        }
    }

    fn solid(v: u8) -> Frame {
        RgbImage::from_pixel(16, 12, Rgb([v, v, v]))
    }

    /// Hands out whatever the test pushes, blocking in between.
    struct GatedSource {
        frames: Receiver<Result<Frame, LprError>>,
        dropped: Arc<AtomicBool>,
    }

    impl FrameSource for GatedSource {
        fn name(&self) -> String {
            "gated".to_string()
        }

        fn read_frame(&mut self) -> Result<Frame, LprError> {
            match self.frames.recv() {
                Ok(frame) => frame,
                Err(_) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "gate closed").into()),
            }
        }
    }

    impl Drop for GatedSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    fn gated() -> (Box<dyn FrameSource>, Sender<Result<Frame, LprError>>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel();
        let dropped = Arc::new(AtomicBool::new(false));
        let source = GatedSource { frames: rx, dropped: Arc::clone(&dropped) };
        (Box::new(source), tx, dropped)
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let mut session = CaptureSession::new(config("stub://idle"));
        session.stop();
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    fn double_stop_after_start_is_safe() {
        let mut session = CaptureSession::new(config("stub://twice"));
        session.start().unwrap();
        assert!(session.is_running());
        session.stop();
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    fn still_capture_needs_a_frame() {
        let (notify_tx, notify_rx) = mpsc::sync_channel(1);
        let mut session = CaptureSession::new(config("stub://gated")).with_notifier(notify_tx);
        let (source, frames, _) = gated();
        session.start_with(source).unwrap();

        let err = session.capture_still().unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::NoFrameAvailable));
        assert!(session.preview(8, 6).is_none());

        frames.send(Ok(solid(7))).unwrap();
        assert_eq!(notify_rx.recv_timeout(WAIT).unwrap(), FrameReady { sequence: 1 });
        assert_eq!(session.capture_still().unwrap(), solid(7));
        assert_eq!(session.preview(8, 6).unwrap().dimensions(), (8, 6));

        drop(frames);
        session.stop();
    }

    #[test]
    fn latest_frame_is_overwritten_not_queued() {
        let (notify_tx, notify_rx) = mpsc::sync_channel(1);
        let mut session = CaptureSession::new(config("stub://gated")).with_notifier(notify_tx);
        let (source, frames, _) = gated();
        session.start_with(source).unwrap();

        for v in 1..=3 {
            frames.send(Ok(solid(v))).unwrap();
            notify_rx.recv_timeout(WAIT).unwrap();
        }
        assert_eq!(session.capture_still().unwrap(), solid(3));
        assert_eq!(session.frames_captured(), 3);

        drop(frames);
        session.stop();
    }

    #[test]
    fn read_failures_do_not_end_the_session() {
        let (notify_tx, notify_rx) = mpsc::sync_channel(1);
        let mut session = CaptureSession::new(config("stub://gated")).with_notifier(notify_tx);
        let (source, frames, _) = gated();
        session.start_with(source).unwrap();

        frames.send(Err(LprError::backend("glitch"))).unwrap();
        frames.send(Err(LprError::backend("glitch"))).unwrap();
        frames.send(Ok(solid(9))).unwrap();
        assert_eq!(notify_rx.recv_timeout(WAIT).unwrap().sequence, 1);
        assert!(session.is_running());
        assert_eq!(session.capture_still().unwrap(), solid(9));

        drop(frames);
        session.stop();
    }

    #[test]
    fn restarting_releases_the_previous_device() {
        let mut session = CaptureSession::new(config("stub://gated"));
        let (first, first_frames, first_dropped) = gated();
        session.start_with(first).unwrap();
        first_frames.send(Ok(solid(1))).unwrap();
        drop(first_frames);

        let (second, second_frames, second_dropped) = gated();
        session.start_with(second).unwrap();
        assert!(first_dropped.load(Ordering::Acquire));
        assert!(!second_dropped.load(Ordering::Acquire));
        // a fresh session starts without a frame
        assert!(session.capture_still().is_err());

        drop(second_frames);
        session.stop();
        assert!(second_dropped.load(Ordering::Acquire));
    }

    #[test]
    fn stub_device_delivers_frames() {
        let (notify_tx, notify_rx) = mpsc::sync_channel(1);
        let mut session = CaptureSession::new(config("stub://live")).with_notifier(notify_tx);
        session.start().unwrap();
        notify_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(session.capture_still().unwrap().dimensions(), (16, 12));
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn unavailable_device_leaves_session_idle() {
        let mut session = CaptureSession::new(config("/dev/video-missing"));
        let err = session.start().unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::DeviceUnavailable(_)));
        assert!(!session.is_running());
    }

    #[test]
    fn busy_retry_without_backoff_still_stops() {
        struct Broken(Arc<AtomicUsize>);
        impl FrameSource for Broken {
            fn name(&self) -> String {
                "broken".to_string()
            }
            fn read_frame(&mut self) -> Result<Frame, LprError> {
                self.0.fetch_add(1, Ordering::AcqRel);
                Err(LprError::backend("no signal"))
            }
        }

        let reads = Arc::new(AtomicUsize::new(0));
        let mut session = CaptureSession::new(CameraConfig { retry_backoff_ms: 0, ..config("stub://broken") });
        session.start_with(Box::new(Broken(Arc::clone(&reads)))).unwrap();
        while reads.load(Ordering::Acquire) < 10 {
            thread::yield_now();
        }
        session.stop();
        assert_eq!(session.frames_captured(), 0);
    }

    #[test]
    fn slow_consumer_gets_no_backlog_of_notices() {
        let (notify_tx, notify_rx) = mpsc::sync_channel(1);
        let mut session = CaptureSession::new(config("stub://gated")).with_notifier(notify_tx);
        let (source, frames, _) = gated();
        session.start_with(source).unwrap();

        for v in 1..=5 {
            frames.send(Ok(solid(v))).unwrap();
        }
        let deadline = Instant::now() + WAIT;
        while session.frames_captured() < 5 && Instant::now() < deadline {
            thread::yield_now();
        }
        assert_eq!(session.frames_captured(), 5);
        assert_eq!(session.capture_still().unwrap(), solid(5));

        drop(frames);
        session.stop();
        // only the first notice fit, the rest were dropped
        assert_eq!(notify_rx.try_iter().collect::<Vec<_>>(), vec![FrameReady { sequence: 1 }]);
    }

    #[test]
    fn stop_returns_while_the_device_is_silent() {
        /// A camera that never delivers, but whose reads give up after a short timeout.
        struct Silent(Receiver<Frame>, Sender<Frame>);
        impl FrameSource for Silent {
            fn name(&self) -> String {
                "silent".to_string()
            }
            fn read_frame(&mut self) -> Result<Frame, LprError> {
                self.0.recv_timeout(Duration::from_millis(20))
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no buffer").into())
            }
        }

        let (tx, rx) = mpsc::channel();
        let mut session = CaptureSession::new(config("stub://silent"));
        session.start_with(Box::new(Silent(rx, tx))).unwrap();
        thread::sleep(Duration::from_millis(50));

        let stopping = Instant::now();
        session.stop();
        assert!(stopping.elapsed() < Duration::from_secs(1));
        assert!(!session.is_running());
        assert_eq!(session.frames_captured(), 0);
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn failed_restart_drops_the_previous_frame() {
        let (notify_tx, notify_rx) = mpsc::sync_channel(1);
        let mut session = CaptureSession::new(config("/dev/video-missing")).with_notifier(notify_tx);
        let (source, frames, _) = gated();
        session.start_with(source).unwrap();
        frames.send(Ok(solid(4))).unwrap();
        notify_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(session.capture_still().unwrap(), solid(4));
        drop(frames);

        assert!(session.start().is_err());
        assert!(!session.is_running());
        let err = session.capture_still().unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::NoFrameAvailable));
    }
}
