//! Per-class detection pipelines.
//!
//! A pipeline runs a detector backend frame by frame and keeps only the
//! detections of its target class:
//!
//! - players are keyed by track id; detections without an id are dropped and a
//!   repeated id keeps its highest-confidence box.
//! - the ball collapses to the single `BALL_TRACK_ID` slot, keeping the
//!   highest-confidence ball detection. Equal confidence keeps the first one
//!   the backend returned.
//!
//! Boxes that fail `BoundingBox::is_valid` are dropped before either rule.

use std::collections::btree_map::Entry;

use anyhow::anyhow;

use crate::detect::{Detection, ObjectClass, SharedBackend};
use crate::error::TrackError;
use crate::frame::Frame;
use crate::{DetectionSequence, FrameDetections, BALL_TRACK_ID};

/// Detection pipeline for one target class.
#[derive(Clone)]
pub struct DetectionPipeline {
    backend: SharedBackend,
    target: ObjectClass,
}

impl DetectionPipeline {
    pub fn new(backend: SharedBackend, target: ObjectClass) -> Self {
        Self { backend, target }
    }

    pub fn player(backend: SharedBackend) -> Self {
        Self::new(backend, ObjectClass::Player)
    }

    pub fn ball(backend: SharedBackend) -> Self {
        Self::new(backend, ObjectClass::Ball)
    }

    pub fn target(&self) -> ObjectClass {
        self.target
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Keep this pipeline's class from one frame of detector output.
    pub fn filter(&self, frame_index: usize, detections: &[Detection]) -> FrameDetections {
        match self.target {
            ObjectClass::Ball => filter_ball(frame_index, detections),
            class => filter_tracked(class, frame_index, detections),
        }
    }

    /// Detect a single frame (streaming use).
    pub fn detect_one(&self, frame: &Frame) -> Result<FrameDetections, TrackError> {
        let detections = infer(&self.backend, frame)?;
        Ok(self.filter(frame.index, &detections))
    }

    /// Detect every frame. Entry `i` of the result belongs to `frames[i]`.
    pub fn detect(&self, frames: &[Frame]) -> Result<DetectionSequence, TrackError> {
        let mut sequence = DetectionSequence::with_capacity(frames.len());
        for (position, frame) in frames.iter().enumerate() {
            let detections = infer(&self.backend, frame)?;
            sequence.push(self.filter(position, &detections))?;
        }
        log::debug!(
            "{:?} pipeline: {} of {} frames with detections",
            self.target,
            sequence.frames_with_detections(),
            sequence.len()
        );
        Ok(sequence)
    }
}

/// Run a shared backend on one frame, mapping failures to `AdapterFailure`.
pub fn infer(backend: &SharedBackend, frame: &Frame) -> Result<Vec<Detection>, TrackError> {
    let mut guard = backend.lock().map_err(|_| TrackError::AdapterFailure {
        frame_index: frame.index,
        source: anyhow!("backend lock poisoned"),
    })?;
    guard
        .infer(frame)
        .map_err(|source| TrackError::AdapterFailure {
            frame_index: frame.index,
            source,
        })
}

fn filter_tracked(class: ObjectClass, frame_index: usize, detections: &[Detection]) -> FrameDetections {
    let mut out = FrameDetections::new(frame_index);
    let mut confidence = std::collections::BTreeMap::new();
    for det in detections.iter().filter(|d| d.class == class) {
        if !det.bbox.is_valid() {
            log::debug!("frame {}: dropping invalid {:?} box {:?}", frame_index, class, det.bbox);
            continue;
        }
        let Some(track_id) = det.track_id else {
            log::debug!("frame {}: dropping untracked {:?} detection", frame_index, class);
            continue;
        };
        match confidence.entry(track_id) {
            Entry::Vacant(slot) => {
                slot.insert(det.confidence);
                out.insert(track_id, det.bbox);
            }
            Entry::Occupied(mut slot) => {
                if det.confidence > *slot.get() {
                    slot.insert(det.confidence);
                    out.insert(track_id, det.bbox);
                }
            }
        }
    }
    out
}

fn filter_ball(frame_index: usize, detections: &[Detection]) -> FrameDetections {
    let mut best: Option<&Detection> = None;
    let mut candidates = 0usize;
    for det in detections.iter().filter(|d| d.class == ObjectClass::Ball) {
        if !det.bbox.is_valid() {
            log::debug!("frame {}: dropping invalid ball box {:?}", frame_index, det.bbox);
            continue;
        }
        candidates += 1;
        if best.map_or(true, |b| det.confidence > b.confidence) {
            best = Some(det);
        }
    }
    if candidates > 1 {
        log::debug!(
            "frame {}: {} ball detections, keeping highest confidence",
            frame_index,
            candidates
        );
    }

    let mut out = FrameDetections::new(frame_index);
    if let Some(det) = best {
        out.insert(BALL_TRACK_ID, det.bbox);
    }
    out
}
