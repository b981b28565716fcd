use image::{ GrayImage, Rgb, RgbImage };
use imageproc::drawing;
use once_cell::sync::OnceCell;
use rusttype::{ Font, Scale };

use std::fs;
use std::path::{ Path, PathBuf };
use std::sync::Arc;

use crate::backends::{ self, TextReader };
use crate::config::Config;
use crate::error::{ LprError, LprErrorKind };

/// A decoded colour image, height x width x 3, 8 bits per channel.
pub type Frame = RgbImage;

pub const NOT_FOUND: &str = "Not Found";
pub const DEFAULT_VEHICLE_CLASS: &str = "Vehicle";

const MIN_PLATE_LEN: usize = 6;
const MAX_PLATE_LEN: usize = 12;
const MIN_CONFIDENCE: f32 = 0.4;

const POLYGON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LABEL_SCALE: f32 = 24.0;
const LABEL_OFFSET: i32 = 10;

/// Fonts tried, in order, when `detection.font_path` is unset.
pub const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
];

static SHARED: OnceCell<Arc<PlateDetector>> = OnceCell::new();

/// One text region reported by an OCR backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TextCandidate {
    /// vertices in image coordinates, in drawing order
    pub polygon: Vec<(f32, f32)>,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub plate_text: String,
    /// full size input, with the plate outlined when one was found
    pub annotated_image: Frame,
    pub vehicle_class: String,
}

impl DetectionResult {
    pub fn found(&self) -> bool {
        self.plate_text != NOT_FOUND
    }
}

pub struct PlateDetector {
    reader: Box<dyn TextReader>,
    font: Option<Font<'static>>,
}

impl PlateDetector {

    pub fn new(reader: Box<dyn TextReader>) -> Self {
        Self { reader, font: None }
    }

    /// Label the accepted plate with text rendered in this font.
    pub fn with_font(mut self, font: Font<'static>) -> Self {
        self.font = Some(font);
        self
    }

    /// Build a detector from config: backend plus optional label font.
    pub fn from_config(config: &Config) -> Result<Self, LprError> {
        let reader = backends::from_config(&config.ocr)?;
        let detector = Self::new(reader);
        if let Some(path) = &config.detection.font_path {
            return Ok(detector.with_font(load_font(path)?));
        }
        match system_font_path().map(load_font) {
            Some(Ok(font)) => Ok(detector.with_font(font)),
            Some(Err(e)) => {
                log::warn!("system font unusable ({}), plates will be outlined without a label", e);
                Ok(detector)
            }
            None => {
                log::warn!("no font_path configured and no system font found, plates will be outlined without a label");
                Ok(detector)
            }
        }
    }

    /// The process wide detector. The backend is initialised on first use only;
    /// later calls ignore `config`.
    pub fn shared(config: &Config) -> Result<Arc<PlateDetector>, LprError> {
        SHARED.get_or_try_init(|| {
            log::info!("initialising {:?} ocr backend", config.ocr.backend);
            Self::from_config(config).map(Arc::new)
        }).map(Arc::clone)
    }

    pub fn detect_path(&self, path: impl AsRef<Path>) -> Result<DetectionResult, LprError> {
        let frame = load_frame(path)?;
        self.detect(&frame)
    }

    /// Recognize one frame
    pub fn detect(&self, frame: &Frame) -> Result<DetectionResult, LprError> {
        let gray: GrayImage = image::imageops::grayscale(frame);
        let candidates = self.reader.read_text(&gray)?;
        log::debug!("{} backend returned {} candidates", self.reader.name(), candidates.len());

        let mut annotated_image = frame.clone();
        let plate_text = match select_plate(&candidates) {
            Some((plate_text, candidate)) => {
                self.annotate(&mut annotated_image, &candidate.polygon, &plate_text);
                plate_text
            }
            None => NOT_FOUND.to_string(),
        };

        Ok(DetectionResult {
            plate_text,
            annotated_image,
            vehicle_class: DEFAULT_VEHICLE_CLASS.to_string(),
        })
    }

    fn annotate(&self, img: &mut Frame, polygon: &[(f32, f32)], text: &str) {
        draw_closed_polygon(img, polygon, POLYGON_COLOR);
        let (Some(font), Some(&(x, y))) = (&self.font, polygon.first()) else {
            return;
        };
        // draw_text_mut takes the top of the text box, so lift it by its height too
        let top = y as i32 - LABEL_OFFSET - LABEL_SCALE as i32;
        drawing::draw_text_mut(img, LABEL_COLOR, x as i32, top, Scale::uniform(LABEL_SCALE), font, text);
    }
}

/// Decode an image file into a frame.
pub fn load_frame(path: impl AsRef<Path>) -> Result<Frame, LprError> {
    let img = image::open(path.as_ref())?;
    Ok(img.to_rgb8())
}

pub fn load_font(path: impl AsRef<Path>) -> Result<Font<'static>, LprError> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    Font::try_from_vec(data)
        .ok_or_else(|| LprErrorKind::Font(format!("{} is not a usable font", path.display())).into())
}

/// First entry of [`SYSTEM_FONTS`] present on this machine.
pub fn system_font_path() -> Option<PathBuf> {
    SYSTEM_FONTS.iter().map(PathBuf::from).find(|path| path.is_file())
}

/// Strip surrounding whitespace and inner spaces from recognized text.
pub fn clean_text(text: &str) -> String {
    text.trim().chars().filter(|c| *c != ' ').collect()
}

pub fn is_plate_like(text: &str) -> bool {
    let len = text.chars().count();
    (MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&len)
        && text.chars().any(char::is_alphabetic)
        && text.chars().any(|c| c.is_ascii_digit())
}

/// First candidate, in backend order, that reads like a plate.
///
/// This is first-match on purpose: a later candidate with higher confidence never
/// replaces an earlier one that already qualifies.
pub fn select_plate(candidates: &[TextCandidate]) -> Option<(String, &TextCandidate)> {
    candidates.iter().find_map(|candidate| {
        let text = clean_text(&candidate.text);
        if candidate.confidence > MIN_CONFIDENCE && is_plate_like(&text) {
            Some((text, candidate))
        } else {
            None
        }
    })
}

/// Closed outline with a 2px stroke.
fn draw_closed_polygon(img: &mut Frame, polygon: &[(f32, f32)], color: Rgb<u8>) {
    if polygon.len() < 2 {
        return;
    }
    let edges = polygon.iter().zip(polygon.iter().cycle().skip(1));
    for (&(x0, y0), &(x1, y1)) in edges {
        // second pass shifted by one pixel across the dominant direction
        let (dx, dy) = if (x1 - x0).abs() >= (y1 - y0).abs() { (0.0, 1.0) } else { (1.0, 0.0) };
        drawing::draw_line_segment_mut(img, (x0, y0), (x1, y1), color);
        drawing::draw_line_segment_mut(img, (x0 + dx, y0 + dy), (x1 + dx, y1 + dy), color);
    }
}
