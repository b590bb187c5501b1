//! Still-image sequence source.
//!
//! Reads every `.png`, `.jpg` and `.jpeg` file of a local directory, sorted by
//! file name, decoding one image per `next_frame` call. Name frames with
//! zero-padded numbers (`frame_000123.png`) so lexical order is frame order.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::FrameSource;
use crate::frame::Frame;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let files = list_frames(dir)?;
        log::info!(
            "ImageSequenceSource: {} frames in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next_index: 0,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

/// Frame image files of `dir`, sorted by file name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| anyhow!("failed to read frame dir {}: {}", dir.display(), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_frame {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next_index) else {
            return Ok(None);
        };
        let image = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        let frame = Frame::new(self.next_index, width, height, image.into_raw())?;
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn reads_frames_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("frame_002.png", 20u8), ("frame_000.png", 0), ("frame_001.png", 10)] {
            RgbImage::from_pixel(3, 2, Rgb([shade, shade, shade]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.len_hint(), Some(3));
        let mut shades = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!((frame.width, frame.height), (3, 2));
            assert_eq!(frame.index, shades.len());
            shades.push(frame.pixel(0, 0).unwrap()[0]);
        }
        assert_eq!(shades, vec![0, 10, 20]);
    }
}
