//! Rally Tracker
//!
//! Post-processing core for racket-sport match video: turns raw per-frame
//! detector output into a complete ball trajectory and a small, stable set of
//! in-play player identities.
//!
//! # Architecture
//!
//! Detector backend -> {player, ball} pipelines -> (detection cache) ->
//! ball interpolation / player selection -> overlay rendering.
//!
//! The core keeps three invariants:
//!
//! 1. **Frame alignment**: entry `i` of a `DetectionSequence` is frame `i`.
//!    Frames without detections hold an empty map, never a missing entry.
//! 2. **No fabrication**: a detector failure yields an error or an empty frame,
//!    never a made-up box.
//! 3. **Atomic cache**: a partially written cache entry is never returned.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames handed to detectors
//! - `ingest`: frame sources (synthetic, still-image sequences)
//! - `detect`: detector backend trait, shared handles, backends, IoU tracker
//! - `pipeline`: per-class filtering of detector output
//! - `interpolate`: ball trajectory gap filling
//! - `select`: court-proximity player selection
//! - `storage`: detection cache
//! - `session`: full-video and streaming orchestration
//! - Core types: `BoundingBox`, `FrameDetections`, `DetectionSequence`

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod config;
pub mod court;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod interpolate;
pub mod pipeline;
#[cfg(feature = "overlay")]
pub mod render;
pub mod select;
pub mod session;
pub mod storage;

pub use court::{CourtKeypoint, CourtKeypoints};
pub use detect::{Detection, DetectorBackend, IouTracker, ObjectClass};
pub use error::TrackError;
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SyntheticSource};
pub use interpolate::{interpolate, interpolate_positions};
pub use pipeline::DetectionPipeline;
pub use select::{retain_selected, select_players};
pub use session::{AdapterFailurePolicy, FrameReport, MatchSession, MatchTracks};
pub use storage::{
    CacheKey, DetectionCache, InMemoryDetectionCache, JsonFileDetectionCache,
    SqliteDetectionCache, TrackKind,
};

/// Track identifier assigned by the upstream tracker.
pub type TrackId = u32;

/// Fixed slot used for the single tracked ball.
pub const BALL_TRACK_ID: TrackId = 1;

// -------------------- Bounding Boxes --------------------

/// Axis-aligned box in pixel coordinates.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Finite coordinates with `x1 <= x2` and `y1 <= y2`.
    ///
    /// Detectors do not guarantee this; invalid boxes are treated as absent.
    pub fn is_valid(&self) -> bool {
        self.coords().iter().all(|v| v.is_finite()) && self.x1 <= self.x2 && self.y1 <= self.y2
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union; 0.0 when either box has no area.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    pub fn coords(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(c: [f64; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        b.coords()
    }
}

/// Ball slot for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BallPosition {
    Present(BoundingBox),
    Absent,
}

impl BallPosition {
    /// Present only when the box is valid.
    pub fn known(&self) -> Option<BoundingBox> {
        match self {
            BallPosition::Present(b) if b.is_valid() => Some(*b),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, BallPosition::Present(_))
    }
}

impl From<Option<BoundingBox>> for BallPosition {
    fn from(b: Option<BoundingBox>) -> Self {
        match b {
            Some(b) => BallPosition::Present(b),
            None => BallPosition::Absent,
        }
    }
}

// -------------------- Per-frame Detections --------------------

/// Boxes of one class in one frame, keyed by track id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDetections {
    pub frame_index: usize,
    pub boxes: BTreeMap<TrackId, BoundingBox>,
}

impl FrameDetections {
    pub fn new(frame_index: usize) -> Self {
        Self {
            frame_index,
            boxes: BTreeMap::new(),
        }
    }

    pub fn with_boxes(frame_index: usize, boxes: BTreeMap<TrackId, BoundingBox>) -> Self {
        Self { frame_index, boxes }
    }

    pub fn insert(&mut self, track_id: TrackId, bbox: BoundingBox) -> Option<BoundingBox> {
        self.boxes.insert(track_id, bbox)
    }

    pub fn get(&self, track_id: TrackId) -> Option<&BoundingBox> {
        self.boxes.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &BoundingBox)> {
        self.boxes.iter().map(|(id, b)| (*id, b))
    }

    /// The ball slot of a ball-class frame.
    pub fn ball(&self) -> BallPosition {
        self.boxes.get(&BALL_TRACK_ID).copied().into()
    }
}

// -------------------- Detection Sequences --------------------

/// Frame-aligned sequence of per-frame detections for one class.
///
/// Entry `i` always carries `frame_index == i`; `push` rejects anything else.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSequence {
    entries: Vec<FrameDetections>,
}

impl DetectionSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(frames: usize) -> Self {
        Self {
            entries: Vec::with_capacity(frames),
        }
    }

    /// Build from per-frame maps; frame indices follow list position.
    pub fn from_maps<I>(maps: I) -> Self
    where
        I: IntoIterator<Item = BTreeMap<TrackId, BoundingBox>>,
    {
        let entries = maps
            .into_iter()
            .enumerate()
            .map(|(frame_index, boxes)| FrameDetections { frame_index, boxes })
            .collect();
        Self { entries }
    }

    /// Build a ball sequence from per-frame positions.
    pub fn from_ball_positions(positions: &[BallPosition]) -> Self {
        Self::from_maps(positions.iter().map(|p| {
            let mut boxes = BTreeMap::new();
            if let BallPosition::Present(b) = p {
                boxes.insert(BALL_TRACK_ID, *b);
            }
            boxes
        }))
    }

    /// Append the next frame. The entry must carry the next frame index.
    pub fn push(&mut self, entry: FrameDetections) -> Result<(), TrackError> {
        let expected = self.entries.len();
        if entry.frame_index != expected {
            return Err(TrackError::FrameOutOfOrder {
                expected,
                got: entry.frame_index,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, frame_index: usize) -> Option<&FrameDetections> {
        self.entries.get(frame_index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameDetections> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[FrameDetections] {
        &self.entries
    }

    /// Number of frames holding at least one box.
    pub fn frames_with_detections(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_empty()).count()
    }

    pub fn ball_positions(&self) -> Vec<BallPosition> {
        self.entries.iter().map(FrameDetections::ball).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl<'a> IntoIterator for &'a DetectionSequence {
    type Item = &'a FrameDetections;
    type IntoIter = std::slice::Iter<'a, FrameDetections>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// Persisted as a JSON array of `{ "<track id>": [x1, y1, x2, y2] }`, one per frame.
impl Serialize for DetectionSequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|e| &e.boxes))
    }
}

impl<'de> Deserialize<'de> for DetectionSequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let maps = Vec::<BTreeMap<TrackId, BoundingBox>>::deserialize(deserializer)?;
        Ok(Self::from_maps(maps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(v: f64) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, v, v)
    }

    #[test]
    fn bounding_box_validity() {
        assert!(bx(10.0).is_valid());
        assert!(BoundingBox::new(5.0, 5.0, 5.0, 5.0).is_valid());
        assert!(!BoundingBox::new(10.0, 0.0, 5.0, 5.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f64::NAN, 5.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f64::INFINITY, 5.0).is_valid());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = bx(10.0);
        assert_eq!(a.iou(&a), 1.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        let half = BoundingBox::new(0.0, 0.0, 10.0, 5.0);
        assert_eq!(a.iou(&half), 0.5);
    }

    #[test]
    fn sequence_push_enforces_frame_alignment() {
        let mut seq = DetectionSequence::new();
        seq.push(FrameDetections::new(0)).unwrap();
        let err = seq.push(FrameDetections::new(2)).unwrap_err();
        assert!(matches!(
            err,
            TrackError::FrameOutOfOrder {
                expected: 1,
                got: 2
            }
        ));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn sequence_json_uses_track_id_maps() {
        let mut frame = FrameDetections::new(0);
        frame.insert(3, BoundingBox::new(1.5, 2.0, 10.25, 20.0));
        let mut seq = DetectionSequence::new();
        seq.push(frame).unwrap();
        seq.push(FrameDetections::new(1)).unwrap();

        let json = seq.to_json().unwrap();
        assert_eq!(json, r#"[{"3":[1.5,2.0,10.25,20.0]},{}]"#);

        let back = DetectionSequence::from_json(&json).unwrap();
        assert_eq!(back, seq);
        assert_eq!(back.get(1).unwrap().frame_index, 1);
    }

    #[test]
    fn ball_positions_follow_ball_slot() {
        let seq = DetectionSequence::from_ball_positions(&[
            BallPosition::Present(bx(4.0)),
            BallPosition::Absent,
        ]);
        assert_eq!(
            seq.ball_positions(),
            vec![BallPosition::Present(bx(4.0)), BallPosition::Absent]
        );
        assert_eq!(seq.frames_with_detections(), 1);
    }
}
