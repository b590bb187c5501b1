//! Greedy IoU tracker for backends that do not assign track ids.
//!
//! Detections that already carry a track id pass through untouched. The rest
//! are matched per class against live tracks by descending IoU; unmatched
//! detections open new tracks. Ids start at 1 and are never reused within a
//! session, so a reacquired object gets a fresh id.

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};
use crate::frame::Frame;
use crate::{BoundingBox, TrackId};

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.3;
pub const DEFAULT_MAX_AGE: u32 = 30;

#[derive(Clone, Debug)]
struct LiveTrack {
    id: TrackId,
    class: ObjectClass,
    bbox: BoundingBox,
    frames_lost: u32,
}

/// Wraps a backend and fills in missing track ids.
pub struct IouTracker<B> {
    inner: B,
    iou_threshold: f64,
    max_age: u32,
    tracks: Vec<LiveTrack>,
    next_id: TrackId,
}

impl<B: DetectorBackend> IouTracker<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_age: DEFAULT_MAX_AGE,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Minimum IoU for a detection to continue a track.
    pub fn with_iou_threshold(mut self, threshold: f64) -> Self {
        self.iou_threshold = threshold;
        self
    }

    /// Frames a track may go unmatched before it is dropped.
    pub fn with_max_age(mut self, max_age: u32) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Assign ids to one frame's detections.
    pub fn assign(&mut self, mut detections: Vec<Detection>) -> Vec<Detection> {
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (t_idx, track) in self.tracks.iter().enumerate() {
            for (d_idx, det) in detections.iter().enumerate() {
                if det.track_id.is_some() || det.class != track.class || !det.bbox.is_valid() {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.iou_threshold {
                    pairs.push((iou, t_idx, d_idx));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| self.tracks[a.1].id.cmp(&self.tracks[b.1].id))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_matched = vec![false; detections.len()];
        for (_, t_idx, d_idx) in pairs {
            if track_matched[t_idx] || det_matched[d_idx] {
                continue;
            }
            track_matched[t_idx] = true;
            det_matched[d_idx] = true;
            let track = &mut self.tracks[t_idx];
            track.bbox = detections[d_idx].bbox;
            track.frames_lost = 0;
            detections[d_idx].track_id = Some(track.id);
        }

        for (t_idx, matched) in track_matched.iter().enumerate() {
            if !matched {
                self.tracks[t_idx].frames_lost += 1;
            }
        }
        let max_age = self.max_age;
        self.tracks.retain(|t| t.frames_lost <= max_age);

        for (d_idx, det) in detections.iter_mut().enumerate() {
            if det_matched[d_idx] || det.track_id.is_some() || !det.bbox.is_valid() {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            det.track_id = Some(id);
            self.tracks.push(LiveTrack {
                id,
                class: det.class,
                bbox: det.bbox,
                frames_lost: 0,
            });
        }

        detections
    }
}

impl<B: DetectorBackend> DetectorBackend for IouTracker<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn supports(&self, class: ObjectClass) -> bool {
        self.inner.supports(class)
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let detections = self.inner.infer(frame)?;
        Ok(self.assign(detections))
    }

    fn warm_up(&mut self) -> Result<()> {
        self.inner.warm_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ReplayBackend;

    fn player(x: f64, track_id: Option<TrackId>) -> Detection {
        Detection::new(
            ObjectClass::Player,
            track_id,
            BoundingBox::new(x, 0.0, x + 10.0, 20.0),
            0.9,
        )
    }

    fn ids(dets: &[Detection]) -> Vec<Option<TrackId>> {
        dets.iter().map(|d| d.track_id).collect()
    }

    #[test]
    fn keeps_ids_for_overlapping_boxes() {
        let mut tracker = IouTracker::new(ReplayBackend::default());
        let first = tracker.assign(vec![player(0.0, None), player(100.0, None)]);
        assert_eq!(ids(&first), vec![Some(1), Some(2)]);

        let second = tracker.assign(vec![player(101.0, None), player(1.0, None)]);
        assert_eq!(ids(&second), vec![Some(2), Some(1)]);
    }

    #[test]
    fn passes_through_existing_ids() {
        let mut tracker = IouTracker::new(ReplayBackend::default());
        let out = tracker.assign(vec![player(0.0, Some(42))]);
        assert_eq!(ids(&out), vec![Some(42)]);
        assert_eq!(tracker.live_tracks(), 0);
    }

    #[test]
    fn expired_tracks_are_not_reused() {
        let mut tracker = IouTracker::new(ReplayBackend::default()).with_max_age(1);
        tracker.assign(vec![player(0.0, None)]);
        tracker.assign(vec![]);
        tracker.assign(vec![]);
        assert_eq!(tracker.live_tracks(), 0);

        let out = tracker.assign(vec![player(0.0, None)]);
        assert_eq!(ids(&out), vec![Some(2)]);
    }

    #[test]
    fn classes_are_tracked_separately() {
        let mut tracker = IouTracker::new(ReplayBackend::default());
        tracker.assign(vec![player(0.0, None)]);
        let ball = Detection::new(
            ObjectClass::Ball,
            None,
            BoundingBox::new(0.0, 0.0, 10.0, 20.0),
            0.5,
        );
        let out = tracker.assign(vec![ball]);
        assert_eq!(ids(&out), vec![Some(2)]);
    }

    #[test]
    fn infer_runs_inner_backend() {
        let replay = ReplayBackend::new(vec![vec![player(0.0, None)], vec![player(2.0, None)]]);
        let mut tracker = IouTracker::new(replay);
        let f0 = Frame::solid(0, 2, 2, [0, 0, 0]).unwrap();
        let f1 = Frame::solid(1, 2, 2, [0, 0, 0]).unwrap();
        assert_eq!(ids(&tracker.infer(&f0).unwrap()), vec![Some(1)]);
        assert_eq!(ids(&tracker.infer(&f1).unwrap()), vec![Some(1)]);
        assert_eq!(tracker.inner().calls(), 2);
    }
}
