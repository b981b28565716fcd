#[cfg(feature = "backend-tensorflow")]
use tensorflow::Status;
use image::ImageError;

use std::error::Error;
use std::fmt;
use std::io::Error as IOError;

#[derive(Debug)]
pub struct LprError(LprErrorKind);

#[derive(Debug)]
pub enum LprErrorKind {
    IOError(IOError),
    /// image missing, unreadable or not decodable
    ImageDecode(ImageError),
    ImageEncode(ImageError),
    /// camera could not be opened
    DeviceUnavailable(String),
    /// still capture requested before the camera delivered a frame
    NoFrameAvailable,
    LogWrite(csv::Error),
    Config(toml::de::Error),
    /// the OCR backend failed or produced output we could not read
    Backend(String),
    Font(String),
    #[cfg(feature = "backend-tensorflow")]
    TensorflowError(Status),
}

impl LprError {
    pub fn kind(&self) -> &LprErrorKind {
        &self.0
    }

    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self(LprErrorKind::DeviceUnavailable(msg.into()))
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self(LprErrorKind::Backend(msg.into()))
    }

    pub fn log_write(e: impl Into<csv::Error>) -> Self {
        Self(LprErrorKind::LogWrite(e.into()))
    }

    pub fn image_encode(e: ImageError) -> Self {
        Self(LprErrorKind::ImageEncode(e))
    }

    pub fn no_frame() -> Self {
        Self(LprErrorKind::NoFrameAvailable)
    }
}

impl<T> From<T> for LprError
where T:  Into<LprErrorKind>
{
    fn from(e: T) -> Self {
        Self(e.into())
    }
}

impl fmt::Display for LprError {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            LprErrorKind::IOError(e) => e.fmt(f),
            LprErrorKind::ImageDecode(e) => write!(f, "could not decode image: {}", e),
            LprErrorKind::ImageEncode(e) => write!(f, "could not write image: {}", e),
            LprErrorKind::DeviceUnavailable(msg) => write!(f, "camera unavailable: {}", msg),
            LprErrorKind::NoFrameAvailable => f.write_str("no frame captured yet"),
            LprErrorKind::LogWrite(e) => write!(f, "could not write plate log: {}", e),
            LprErrorKind::Config(e) => write!(f, "invalid config: {}", e),
            LprErrorKind::Backend(msg) => write!(f, "ocr backend: {}", msg),
            LprErrorKind::Font(msg) => write!(f, "font: {}", msg),
            #[cfg(feature = "backend-tensorflow")]
            LprErrorKind::TensorflowError(e) => e.fmt(f),
        }
    }
}

impl Error for LprError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.kind() {
            LprErrorKind::IOError(e) => Some(e),
            LprErrorKind::ImageDecode(e) => Some(e),
            LprErrorKind::ImageEncode(e) => Some(e),
            LprErrorKind::LogWrite(e) => Some(e),
            LprErrorKind::Config(e) => Some(e),
            #[cfg(feature = "backend-tensorflow")]
            LprErrorKind::TensorflowError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IOError> for LprErrorKind {
    fn from(e: IOError) -> Self {
        Self::IOError(e)
    }
}

impl From<ImageError> for LprErrorKind {
    fn from(e: ImageError) -> Self {
        Self::ImageDecode(e)
    }
}

impl From<toml::de::Error> for LprErrorKind {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e)
    }
}

#[cfg(feature = "backend-tensorflow")]
impl From<Status> for LprErrorKind {
    fn from(e: Status) -> Self {
        Self::TensorflowError(e)
    }
}
