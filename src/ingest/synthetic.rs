//! Synthetic frame source (`stub://`).

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::frame::{Frame, RGB_CHANNELS};

pub const DEFAULT_WIDTH: u32 = 64;
pub const DEFAULT_HEIGHT: u32 = 48;

/// Deterministic frames of a fixed count. Pixel content depends only on the
/// frame index and position.
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    count: usize,
    width: u32,
    height: u32,
    next_index: usize,
}

impl SyntheticSource {
    pub fn new(count: usize, width: u32, height: u32) -> Self {
        Self {
            count,
            width,
            height,
            next_index: 0,
        }
    }

    /// Parse `stub://<count>`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub uri: {}", uri))?;
        let count: usize = rest
            .trim_end_matches('/')
            .parse()
            .map_err(|_| anyhow!("stub uri must be stub://<frame count>, got {}", uri))?;
        Ok(Self::new(count, DEFAULT_WIDTH, DEFAULT_HEIGHT))
    }

    fn generate_pixels(&self, index: usize) -> Vec<u8> {
        let len = self.width as usize * self.height as usize * RGB_CHANNELS;
        (0..len).map(|i| ((i + index) % 256) as u8).collect()
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index >= self.count {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        let frame = Frame::new(index, self.width, self.height, self.generate_pixels(index))?;
        Ok(Some(frame))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.count)
    }

    fn describe(&self) -> String {
        format!("stub://{} ({}x{})", self.count, self.width, self.height)
    }
}
