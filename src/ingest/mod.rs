//! Frame ingestion sources.
//!
//! This module provides sources of decoded frames for the detection stage:
//! - Synthetic source (`stub://<count>`) for tests and dry runs
//! - Still-image sequences in a local directory (feature: overlay)
//!
//! Sources are local only. Every source numbers its frames from 0 in the order
//! it yields them, which is the frame index the rest of the crate aligns on.

#[cfg(feature = "overlay")]
pub mod file;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[cfg(feature = "overlay")]
pub use file::ImageSequenceSource;
pub use synthetic::SyntheticSource;

/// A finite, ordered stream of frames.
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Total frame count when known up front.
    fn len_hint(&self) -> Option<usize> {
        None
    }

    /// Short description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Open a frame source by URI.
///
/// `stub://<count>` yields synthetic frames; a local directory yields its
/// still images in file-name order.
pub fn open_source(uri: &str) -> Result<Box<dyn FrameSource>> {
    if uri.trim().is_empty() {
        return Err(anyhow!("frame source uri is empty"));
    }
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::from_uri(uri)?));
    }
    if uri.contains("://") {
        return Err(anyhow!(
            "frame sources only support local paths and stub:// (got {})",
            uri
        ));
    }
    let path = std::path::Path::new(uri);
    if !path.is_dir() {
        return Err(anyhow!(
            "{} is not a frame directory; extract the video to still images first",
            uri
        ));
    }
    open_directory(path)
}

#[cfg(feature = "overlay")]
fn open_directory(path: &std::path::Path) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(ImageSequenceSource::open(path)?))
}

#[cfg(not(feature = "overlay"))]
fn open_directory(path: &std::path::Path) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "reading frames from {} requires the overlay feature",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_stub_sources() {
        let mut source = open_source("stub://3").unwrap();
        assert_eq!(source.len_hint(), Some(3));
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn rejects_remote_and_missing_sources() {
        assert!(open_source("").is_err());
        assert!(open_source("rtsp://camera/stream").is_err());
        assert!(open_source("/definitely/not/here").is_err());
    }
}
