//! V4L2 camera source.
//!
//! Frames are requested as packed RGB at the configured size. Drivers may settle on a
//! different size; whatever the driver reports is what every buffer is checked against.

use image::RgbImage;
use ouroboros::self_referencing;

use std::time::Duration;

use super::FrameSource;
use crate::config::CameraConfig;
use crate::detector::Frame;
use crate::error::LprError;

const MAX_READ_TIMEOUT: Duration = Duration::from_secs(1);

pub struct V4l2Source {
    device_path: String,
    state: V4l2State,
    width: u32,
    height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

impl V4l2Source {

    pub fn open(config: &CameraConfig) -> Result<Self, LprError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let unavailable = |what: &str, err: std::io::Error| {
            LprError::device_unavailable(format!("{}: {}: {}", config.device, what, err))
        };

        let device = v4l::Device::with_path(&config.device).map_err(|e| unavailable("open", e))?;
        let mut format = device.format().map_err(|e| unavailable("read format", e))?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", config.device, err);
                device.format().map_err(|e| unavailable("read format", e))?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(LprError::device_unavailable(format!(
                "{}: device does not offer RGB3 frames (got {})", config.device, format.fourcc
            )));
        }

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", config.device, err);
            }
        }

        let timeout = read_timeout(config.target_fps);
        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream = v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)?;
                // a stalled camera surfaces as TimedOut instead of blocking stop()
                stream.set_timeout(timeout);
                Ok::<_, std::io::Error>(stream)
            },
        }
        .try_build()
        .map_err(|e| unavailable("map buffers", e))?;

        log::info!("V4l2Source: opened {} ({}x{})", config.device, format.width, format.height);
        Ok(Self {
            device_path: config.device.clone(),
            state,
            width: format.width,
            height: format.height,
        })
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> String {
        self.device_path.clone()
    }

    fn read_frame(&mut self) -> Result<Frame, LprError> {
        use v4l::io::traits::CaptureStream;

        let expected = (self.width * self.height * 3) as usize;
        let pixels = self.state.with_stream_mut(|stream| {
            let (buf, meta) = stream.next()?;
            let used = (meta.bytesused as usize).min(buf.len());
            Ok::<_, std::io::Error>(buf[..used].to_vec())
        })?;
        if pixels.len() != expected {
            return Err(invalid_frame(format!(
                "{}: short frame, {} of {} bytes", self.device_path, pixels.len(), expected
            )));
        }
        RgbImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| invalid_frame(format!("{}: frame does not fit {}x{}", self.device_path, self.width, self.height)))
    }
}

/// How long one dequeue may wait: two frame intervals, never more than a second.
fn read_timeout(target_fps: u32) -> Duration {
    if target_fps == 0 {
        return MAX_READ_TIMEOUT;
    }
    (Duration::from_secs(2) / target_fps).min(MAX_READ_TIMEOUT)
}

fn invalid_frame(msg: String) -> LprError {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg).into()
}


#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn read_timeout_tracks_frame_rate() {
        assert_eq!(read_timeout(0), MAX_READ_TIMEOUT);
        assert_eq!(read_timeout(1), MAX_READ_TIMEOUT);
        assert_eq!(read_timeout(2), MAX_READ_TIMEOUT);
        assert_eq!(read_timeout(20), Duration::from_millis(100));
        assert_eq!(read_timeout(200), Duration::from_millis(10));
    }
}
