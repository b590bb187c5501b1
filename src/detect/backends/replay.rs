use std::path::Path;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};
use crate::frame::Frame;

/// Replays recorded detector output, one list per frame index.
///
/// Frames past the end of the recording yield no detections. Used for tests,
/// offline reprocessing, and dry runs without a model.
#[derive(Clone, Debug, Default)]
pub struct ReplayBackend {
    frames: Vec<Vec<Detection>>,
    calls: usize,
}

impl ReplayBackend {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames, calls: 0 }
    }

    /// Load a recording: a JSON array with one array of detections per frame.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read replay file {}: {}", path.display(), e))?;
        let frames: Vec<Vec<Detection>> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid replay file {}: {}", path.display(), e))?;
        log::info!(
            "ReplayBackend: loaded {} frames from {}",
            frames.len(),
            path.display()
        );
        Ok(Self::new(frames))
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of `infer` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn supports(&self, class: ObjectClass) -> bool {
        matches!(class, ObjectClass::Player | ObjectClass::Ball)
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(self.frames.get(frame.index).cloned().unwrap_or_default())
    }
}
