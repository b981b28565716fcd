//! License plate capture: read a plate from an image file or a live camera, outline it,
//! and keep an append-only log of every reading.

pub mod backends;
pub mod capture;
pub mod config;
pub mod detector;
pub mod error;
pub mod log_store;
pub mod pipeline;
#[cfg(feature = "backend-tensorflow")]
pub mod utils;

pub use capture::{ CaptureSession, FrameReady, FrameSource };
pub use config::Config;
pub use detector::{ DetectionResult, Frame, PlateDetector, TextCandidate, NOT_FOUND };
pub use error::{ LprError, LprErrorKind };
pub use log_store::{ LogRecord, LogStore };
pub use pipeline::{ Completion, DetectionInput, DetectionOutcome, DetectionWorker, DisplayState };
