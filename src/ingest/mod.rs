//! Frame ingestion sources.
//!
//! A source yields decoded frames one at a time. `connect` fails fast when
//! the upstream is unreachable so the viewer gets an error instead of a
//! silent empty stream, and `next_frame` returns `Ok(None)` when a finite
//! stream ends cleanly.
//!
//! Camera identifier resolution:
//! - a single ASCII digit selects a local capture device (`/dev/video<N>`,
//!   feature `ingest-v4l2`)
//! - `stub://` selects the synthetic source
//! - anything else is treated as a host and fetched from
//!   `http://<identifier>/video`

use anyhow::Result;

use crate::frame::Frame;

#[cfg(feature = "ingest-v4l2")]
pub mod device;
pub mod http;
pub mod stub;

#[cfg(feature = "ingest-v4l2")]
pub use device::DeviceSource;
pub use http::HttpMjpegSource;
pub use stub::StubSource;

pub trait FrameSource: Send {
    /// Establish the upstream connection. Must fail if the source is
    /// unreachable rather than deferring the error to `next_frame`.
    fn connect(&mut self) -> Result<()>;

    /// The next decoded frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Map a camera identifier to a concrete source.
pub fn resolve_source(identifier: &str, target_fps: u32) -> Result<Box<dyn FrameSource>> {
    let mut chars = identifier.chars();
    if let (Some(digit), None) = (chars.next(), chars.next()) {
        if digit.is_ascii_digit() {
            return device_source(digit, target_fps);
        }
    }
    if identifier.starts_with("stub://") {
        return Ok(Box::new(StubSource::synthetic(
            crate::frame::DEFAULT_WIDTH,
            crate::frame::DEFAULT_HEIGHT,
        )));
    }
    let source = HttpMjpegSource::new(&format!("http://{}/video", identifier), target_fps)?;
    Ok(Box::new(source))
}

#[cfg(feature = "ingest-v4l2")]
fn device_source(digit: char, target_fps: u32) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(DeviceSource::new(
        format!("/dev/video{}", digit),
        target_fps,
    )))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn device_source(digit: char, _target_fps: u32) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "camera '{}' selects a local capture device, which requires the ingest-v4l2 feature",
        digit
    ))
}
