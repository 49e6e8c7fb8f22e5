//! Local V4L2 capture device source (feature `ingest-v4l2`).

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::FrameSource;
use crate::frame::Frame;

pub struct DeviceSource {
    path: String,
    target_fps: u32,
    state: Option<DeviceState>,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceSource {
    pub fn new(path: String, target_fps: u32) -> Self {
        Self {
            path,
            target_fps,
            state: None,
            last_frame_at: None,
            active_width: 0,
            active_height: 0,
        }
    }
}

impl FrameSource for DeviceSource {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open capture device {}", self.path))?;
        let mut format = device.format().context("read capture format")?;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = device
            .set_format(&format)
            .context("set capture format")?;
        if &format.fourcc.repr != b"RGB3" {
            return Err(anyhow!(
                "device {} does not support RGB3 capture",
                self.path
            ));
        }

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("failed to set fps on {}: {}", self.path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create capture buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "connected to capture device {} ({}x{})",
            self.path,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("capture device not connected")?;
        let min_interval = if self.target_fps == 0 {
            Duration::from_millis(0)
        } else {
            Duration::from_millis((1000 / self.target_fps).max(1) as u64)
        };

        loop {
            let pixels = {
                let (buf, _meta) = state
                    .with_mut(|fields| fields.stream.next())
                    .context("capture device frame")?;
                buf.to_vec()
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }
            self.last_frame_at = Some(now);

            let image =
                image::RgbImage::from_raw(self.active_width, self.active_height, pixels)
                    .ok_or_else(|| anyhow!("capture buffer size does not match device format"))?;
            return Ok(Some(Frame::from_image(image)));
        }
    }
}
