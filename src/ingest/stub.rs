//! Stub frame source for tests and hardware-free deployments.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::frame::Frame;

pub struct StubSource {
    script: Script,
    connected: bool,
    fail_connect: bool,
    fail_after_script: bool,
}

enum Script {
    /// Scripted frames; the stream ends when they run out.
    Frames(VecDeque<Frame>),
    /// Endless synthetic scene with a moving bar.
    Synthetic { width: u32, height: u32, tick: u64 },
}

impl StubSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            script: Script::Frames(frames.into()),
            connected: false,
            fail_connect: false,
            fail_after_script: false,
        }
    }

    pub fn synthetic(width: u32, height: u32) -> Self {
        Self {
            script: Script::Synthetic {
                width,
                height,
                tick: 0,
            },
            connected: false,
            fail_connect: false,
            fail_after_script: false,
        }
    }

    /// A source whose `connect` always fails.
    pub fn unreachable() -> Self {
        Self {
            script: Script::Frames(VecDeque::new()),
            connected: false,
            fail_connect: true,
            fail_after_script: false,
        }
    }

    /// A source that delivers `frames` and then errors on the next read,
    /// like a camera dropping its transport mid-stream.
    pub fn dropping_after(frames: Vec<Frame>) -> Self {
        Self {
            script: Script::Frames(frames.into()),
            connected: false,
            fail_connect: false,
            fail_after_script: true,
        }
    }
}

impl FrameSource for StubSource {
    fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(anyhow!("stub source is unreachable"));
        }
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("stub source not connected; call connect() first"));
        }
        match &mut self.script {
            Script::Frames(frames) => match frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None if self.fail_after_script => {
                    Err(anyhow!("stub source lost its transport"))
                }
                None => Ok(None),
            },
            Script::Synthetic {
                width,
                height,
                tick,
            } => {
                let mut frame = Frame::solid(*width, *height, [40, 40, 40]);
                let bar_x = ((*tick * 8) % u64::from(*width)) as u32;
                let bar_w = (*width - bar_x).min(8);
                for y in 0..*height {
                    for x in bar_x..bar_x + bar_w {
                        frame.image_mut().put_pixel(x, y, image::Rgb([220, 220, 220]));
                    }
                }
                *tick += 1;
                Ok(Some(frame))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_ends_cleanly() {
        let mut source = StubSource::new(vec![Frame::solid(4, 4, [0, 0, 0])]);
        source.connect().unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn unreachable_source_fails_on_connect() {
        let mut source = StubSource::unreachable();
        assert!(source.connect().is_err());
    }

    #[test]
    fn dropping_source_errors_after_its_frames() {
        let mut source = StubSource::dropping_after(vec![Frame::solid(4, 4, [0, 0, 0])]);
        source.connect().unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn synthetic_scene_changes_between_frames() {
        let mut source = StubSource::synthetic(64, 16);
        source.connect().unwrap();
        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();
        assert_ne!(a.image().as_raw(), b.image().as_raw());
    }
}
