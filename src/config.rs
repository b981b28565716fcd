use serde::Deserialize;

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use crate::error::LprError;

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV: &str = "LPR_CAPTURE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_path: PathBuf,
    /// where the camera command writes the still it detects from
    pub capture_path: PathBuf,
    pub ocr: OcrConfig,
    pub detection: DetectionConfig,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    Tesseract,
    Tensorflow,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub backend: OcrBackend,
    pub tesseract_cmd: String,
    pub language: String,
    pub detect_model: PathBuf,
    pub ocr_model: PathBuf,
    pub fine_mapping_model: PathBuf,
    /// plate boxes from the detection graph scoring at or below this are dropped
    pub score_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub timeout_secs: u64,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device node, or `stub://<name>` for the synthetic source
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// pause after a failed read; 0 retries immediately
    pub retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("log.csv"),
            capture_path: PathBuf::from("captured_frame.jpg"),
            ocr: OcrConfig::default(),
            detection: DetectionConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackend::Tesseract,
            tesseract_cmd: "tesseract".to_string(),
            language: "eng".to_string(),
            detect_model: PathBuf::from("./models/detect.pb"),
            ocr_model: PathBuf::from("./models/ocr_plate_all_gru.pb"),
            fine_mapping_model: PathBuf::from("./models/fine_mapping.pb"),
            score_threshold: 0.6,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { timeout_secs: 30, font_path: None }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 15,
            retry_backoff_ms: 20,
        }
    }
}

impl Config {

    /// Load from `path`, falling back to `$LPR_CAPTURE_CONFIG`, then to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, LprError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                log::info!("loading config from {}", path.display());
                let raw = fs::read_to_string(&path)?;
                Self::from_toml(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, LprError> {
        Ok(toml::from_str(raw)?)
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CameraConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
