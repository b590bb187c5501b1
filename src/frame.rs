//! Decoded video frames.
//!
//! - `Frame`: RGB8 pixels plus the frame index assigned by the source.
//!
//! Frames are handed to detector backends by reference and are never written
//! to disk by the core.

use crate::error::TrackError;

/// Bytes per RGB8 pixel.
pub const RGB_CHANNELS: usize = 3;

/// One decoded frame in packed RGB8 layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Position of this frame in its source, starting at 0.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap decoded pixels. Fails when `data` does not match `width * height * 3`.
    pub fn new(index: usize, width: u32, height: u32, data: Vec<u8>) -> Result<Self, TrackError> {
        let expected = expected_len(width, height)
            .ok_or_else(|| TrackError::InvalidFrame("frame dimensions overflow".to_string()))?;
        if data.len() != expected {
            return Err(TrackError::InvalidFrame(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            index,
            width,
            height,
            data,
        })
    }

    /// Uniform frame of a single colour.
    pub fn solid(index: usize, width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, TrackError> {
        let len = expected_len(width, height)
            .ok_or_else(|| TrackError::InvalidFrame("frame dimensions overflow".to_string()))?;
        let data = rgb.iter().copied().cycle().take(len).collect();
        Self::new(index, width, height, data)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// RGB value at `(x, y)`, if inside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }
}

fn expected_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_length() {
        let err = Frame::new(0, 4, 4, vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, TrackError::InvalidFrame(_)));
    }

    #[test]
    fn solid_frame_reads_back_colour() {
        let frame = Frame::solid(7, 3, 2, [10, 20, 30]).unwrap();
        assert_eq!(frame.index, 7);
        assert_eq!(frame.pixels().len(), 18);
        assert_eq!(frame.pixel(2, 1), Some([10, 20, 30]));
        assert_eq!(frame.pixel(3, 0), None);
    }
}
