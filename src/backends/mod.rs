//! OCR backends.
//!
//! A backend turns a grayscale image into text candidates. The detector only relies on
//! the order candidates come back in, so backends must report them in reading order
//! of their own choosing and never re-rank by confidence.

use image::GrayImage;

use crate::config::{ OcrBackend, OcrConfig };
use crate::detector::TextCandidate;
use crate::error::LprError;

pub mod tesseract;
#[cfg(feature = "backend-tensorflow")]
pub mod tf;

pub use tesseract::TesseractReader;
#[cfg(feature = "backend-tensorflow")]
pub use tf::TfReader;

pub trait TextReader: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn read_text(&self, img: &GrayImage) -> Result<Vec<TextCandidate>, LprError>;
}

pub fn from_config(config: &OcrConfig) -> Result<Box<dyn TextReader>, LprError> {
    match config.backend {
        OcrBackend::Tesseract => Ok(Box::new(TesseractReader::new(&config.tesseract_cmd, &config.language))),
        #[cfg(feature = "backend-tensorflow")]
        OcrBackend::Tensorflow => Ok(Box::new(TfReader::new(
            &config.detect_model,
            &config.ocr_model,
            &config.fine_mapping_model,
            config.score_threshold,
        )?)),
        #[cfg(not(feature = "backend-tensorflow"))]
        OcrBackend::Tensorflow => Err(LprError::backend("built without the backend-tensorflow feature")),
    }
}

/// Returns the same candidates, or the same failure, for every image.
pub struct ScriptedReader {
    candidates: Vec<TextCandidate>,
    failure: Option<String>,
}

impl ScriptedReader {

    pub fn new(candidates: Vec<TextCandidate>) -> Self {
        Self { candidates, failure: None }
    }

    pub fn failing(msg: impl Into<String>) -> Self {
        Self { candidates: Vec::new(), failure: Some(msg.into()) }
    }
}

impl TextReader for ScriptedReader {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn read_text(&self, _img: &GrayImage) -> Result<Vec<TextCandidate>, LprError> {
        match &self.failure {
            Some(msg) => Err(LprError::backend(msg.clone())),
            None => Ok(self.candidates.clone()),
        }
    }
}
