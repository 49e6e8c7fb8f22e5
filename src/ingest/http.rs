//! HTTP camera source.
//!
//! Handles both multipart MJPEG endpoints and plain snapshot endpoints.
//! MJPEG frames are carved out of the byte stream by scanning for JPEG
//! SOI/EOI markers, which tolerates arbitrary multipart boundary text
//! between frames.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use url::Url;

use super::FrameSource;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct HttpMjpegSource {
    url: Url,
    target_fps: u32,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpMjpegSource {
    pub fn new(url: &str, target_fps: u32) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid camera url {}", url))?;
        Ok(Self {
            url,
            target_fps,
            stream: None,
            last_frame_at: None,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

impl FrameSource for HttpMjpegSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(self.url.as_str())
            .call()
            .with_context(|| format!("connect to camera stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        log::info!("connected to camera stream {}", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let stream = self
            .stream
            .as_mut()
            .context("http source not connected; call connect() first")?;
        let min_interval = frame_interval(self.target_fps);
        loop {
            let jpeg_bytes = match stream {
                HttpStream::Mjpeg(stream) => match stream.read_next_jpeg()? {
                    Some(bytes) => bytes,
                    None => return Ok(None),
                },
                HttpStream::SingleJpeg => fetch_single_jpeg(self.url.as_str())?,
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }
            self.last_frame_at = Some(now);
            return Ok(Some(Frame::from_jpeg(&jpeg_bytes)?));
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// The next complete JPEG payload, or `None` once the stream ends.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // Keep a bounded buffer even if the stream never closes a frame.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow::anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Locate one complete JPEG (SOI through EOI, inclusive) in the buffer.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn malformed_camera_url_is_rejected() {
        assert!(HttpMjpegSource::new("http://192.168.1.20/video", 10).is_ok());
        assert!(HttpMjpegSource::new("not a url", 10).is_err());
    }

    #[test]
    fn jpeg_bounds_span_soi_to_eoi() {
        let buffer = [
            b'-', b'-', 0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0xFF, 0xD9, b'\r', b'\n',
        ];
        assert_eq!(find_jpeg_bounds(&buffer), Some((2, 9)));
    }

    #[test]
    fn incomplete_jpeg_has_no_bounds() {
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00, 0x01]), None);
        assert_eq!(find_jpeg_bounds(&[0x00, 0x01, 0xFF, 0xD9]), None);
    }

    #[test]
    fn mjpeg_stream_extracts_frames_between_boundaries() {
        let jpeg_a = Frame::solid(8, 8, [10, 20, 30]).to_jpeg().unwrap();
        let jpeg_b = Frame::solid(8, 8, [200, 100, 0]).to_jpeg().unwrap();

        let mut multipart = Vec::new();
        for jpeg in [&jpeg_a, &jpeg_b] {
            multipart.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            multipart.extend_from_slice(jpeg);
            multipart.extend_from_slice(b"\r\n");
        }

        let mut stream = MjpegStream::new(Box::new(Cursor::new(multipart)));
        assert_eq!(stream.read_next_jpeg().unwrap(), Some(jpeg_a));
        assert_eq!(stream.read_next_jpeg().unwrap(), Some(jpeg_b));
        assert_eq!(stream.read_next_jpeg().unwrap(), None);
    }
}
