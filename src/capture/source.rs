use image::{ Rgb, RgbImage };

use std::thread;
use std::time::{ Duration, Instant };

use crate::config::CameraConfig;
use crate::detector::Frame;
use crate::error::LprError;

/// A camera, or anything else that hands out frames one at a time.
///
/// `read_frame` may block until the device has a frame. Implementations must only
/// return complete frames; a short or garbled buffer is an error, never a frame.
pub trait FrameSource: Send {
    fn name(&self) -> String;

    fn read_frame(&mut self) -> Result<Frame, LprError>;
}

/// Open the device named by `config.device`.
///
/// `stub://...` gives a synthetic source; anything else is treated as a V4L2 node.
pub fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>, LprError> {
    if config.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    open_v4l2(config)
}

#[cfg(feature = "camera-v4l2")]
fn open_v4l2(config: &CameraConfig) -> Result<Box<dyn FrameSource>, LprError> {
    Ok(Box::new(super::v4l2::V4l2Source::open(config)?))
}

#[cfg(not(feature = "camera-v4l2"))]
fn open_v4l2(config: &CameraConfig) -> Result<Box<dyn FrameSource>, LprError> {
    Err(LprError::device_unavailable(format!(
        "{}: built without the camera-v4l2 feature", config.device
    )))
}

/// Moving gradient frames at the configured size and rate.
pub struct SyntheticSource {
    device: String,
    width: u32,
    height: u32,
    interval: Duration,
    frame_count: u32,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: &CameraConfig) -> Self {
        let interval = if config.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / config.target_fps
        };
        Self {
            device: config.device.clone(),
            width: config.width,
            height: config.height,
            interval,
            frame_count: 0,
            last_frame_at: None,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> String {
        format!("{} (synthetic)", self.device)
    }

    fn read_frame(&mut self) -> Result<Frame, LprError> {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
        self.frame_count = self.frame_count.wrapping_add(1);

        let shift = self.frame_count;
        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = (x.wrapping_add(y).wrapping_add(shift) % 256) as u8;
            Rgb([v, v / 2, 255 - v])
        }))
    }
}


#[cfg(test)]
mod test {

    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 32,
            height: 24,
            target_fps: 0,
            retry_backoff_ms: 0,
        }
    }

    #[test]
    fn stub_device_produces_frames_of_configured_size() {
        let mut source = open_device(&stub_config()).unwrap();
        let first = source.read_frame().unwrap();
        let second = source.read_frame().unwrap();
        assert_eq!(first.dimensions(), (32, 24));
        assert_ne!(first, second);
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn real_device_needs_the_feature() {
        let config = CameraConfig { device: "/dev/video0".to_string(), ..stub_config() };
        let err = open_device(&config).err().unwrap();
        assert!(matches!(err.kind(), crate::error::LprErrorKind::DeviceUnavailable(_)));
    }
}
