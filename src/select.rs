//! Court-proximity player selection.
//!
//! The tracker usually reports more people than are in play (spectators,
//! coaches, ball kids). Players standing closest to the court keypoints are
//! taken as the in-play ones. Selection is per frame and stateless; it does not
//! carry identities across frames.

use crate::court::CourtKeypoint;
use crate::error::TrackError;
use crate::{BoundingBox, DetectionSequence, FrameDetections, TrackId};

/// Smallest distance from the box center to any keypoint; +inf without keypoints.
pub fn court_distance(keypoints: &[CourtKeypoint], bbox: &BoundingBox) -> f64 {
    let (cx, cy) = bbox.center();
    keypoints
        .iter()
        .map(|k| k.distance_to(cx, cy))
        .fold(f64::INFINITY, f64::min)
}

/// Valid candidates ranked by court distance, then track id.
pub fn rank_players(keypoints: &[CourtKeypoint], detections: &FrameDetections) -> Vec<(TrackId, f64)> {
    let mut ranked: Vec<(TrackId, f64)> = detections
        .iter()
        .filter(|(_, b)| b.is_valid())
        .map(|(id, b)| (id, court_distance(keypoints, b)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Choose the `n` players nearest the court, nearest first.
pub fn select_players(
    keypoints: &[CourtKeypoint],
    detections: &FrameDetections,
    n: usize,
) -> Result<Vec<TrackId>, TrackError> {
    if n == 0 {
        return Err(TrackError::InvalidArgument(
            "player count must be positive".to_string(),
        ));
    }
    let ranked = rank_players(keypoints, detections);
    if ranked.len() < n {
        return Err(TrackError::InsufficientCandidates {
            requested: n,
            available: ranked.len(),
        });
    }
    Ok(ranked.into_iter().take(n).map(|(id, _)| id).collect())
}

/// Keep only the selected players in every frame.
///
/// Frames with fewer than `n` valid candidates keep all of them. The result
/// has the same length as the input.
pub fn retain_selected(
    keypoints: &[CourtKeypoint],
    sequence: &DetectionSequence,
    n: usize,
) -> Result<DetectionSequence, TrackError> {
    if n == 0 {
        return Err(TrackError::InvalidArgument(
            "player count must be positive".to_string(),
        ));
    }
    let mut out = DetectionSequence::with_capacity(sequence.len());
    let mut short_frames = 0usize;
    for entry in sequence {
        let ranked = rank_players(keypoints, entry);
        if ranked.len() < n {
            short_frames += 1;
        }
        let mut kept = FrameDetections::new(entry.frame_index);
        for (id, _) in ranked.into_iter().take(n) {
            if let Some(b) = entry.get(id) {
                kept.insert(id, *b);
            }
        }
        out.push(kept)?;
    }
    if short_frames > 0 {
        log::debug!(
            "player selection: {} of {} frames had fewer than {} candidates",
            short_frames,
            sequence.len(),
            n
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centered(cx: f64, cy: f64) -> BoundingBox {
        BoundingBox::new(cx - 1.0, cy - 1.0, cx + 1.0, cy + 1.0)
    }

    fn frame(players: &[(TrackId, f64, f64)]) -> FrameDetections {
        let mut f = FrameDetections::new(0);
        for &(id, cx, cy) in players {
            f.insert(id, centered(cx, cy));
        }
        f
    }

    #[test]
    fn picks_nearest_players_in_distance_order() {
        let keypoints = [CourtKeypoint::new(0.0, 0.0)];
        let players = frame(&[(9, 100.0, 100.0), (4, 5.0, 5.0), (2, 1.0, 1.0)]);
        assert_eq!(select_players(&keypoints, &players, 2).unwrap(), vec![2, 4]);
    }

    #[test]
    fn uses_nearest_of_several_keypoints() {
        let keypoints = [CourtKeypoint::new(0.0, 0.0), CourtKeypoint::new(200.0, 0.0)];
        let players = frame(&[(1, 50.0, 0.0), (2, 195.0, 0.0), (3, 100.0, 0.0)]);
        assert_eq!(select_players(&keypoints, &players, 2).unwrap(), vec![2, 1]);
    }

    #[test]
    fn equal_distance_breaks_ties_by_track_id() {
        let keypoints = [CourtKeypoint::new(0.0, 0.0)];
        let players = frame(&[(8, 3.0, 4.0), (5, -3.0, -4.0), (6, 4.0, 3.0)]);
        assert_eq!(select_players(&keypoints, &players, 3).unwrap(), vec![5, 6, 8]);
    }

    #[test]
    fn too_few_candidates_fails() {
        let keypoints = [CourtKeypoint::new(0.0, 0.0)];
        let players = frame(&[(1, 1.0, 1.0)]);
        let err = select_players(&keypoints, &players, 2).unwrap_err();
        assert!(matches!(
            err,
            TrackError::InsufficientCandidates {
                requested: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn invalid_boxes_are_not_candidates() {
        let keypoints = [CourtKeypoint::new(0.0, 0.0)];
        let mut players = frame(&[(1, 1.0, 1.0)]);
        players.insert(2, BoundingBox::new(5.0, 5.0, 0.0, 0.0));
        assert!(select_players(&keypoints, &players, 2).is_err());
    }

    #[test]
    fn zero_players_is_rejected() {
        let players = frame(&[(1, 1.0, 1.0)]);
        assert!(matches!(
            select_players(&[], &players, 0),
            Err(TrackError::InvalidArgument(_))
        ));
    }

    #[test]
    fn without_keypoints_order_falls_back_to_track_id() {
        let players = frame(&[(3, 1.0, 1.0), (1, 50.0, 50.0)]);
        assert_eq!(select_players(&[], &players, 2).unwrap(), vec![1, 3]);
    }

    #[test]
    fn retain_selected_filters_every_frame() {
        let keypoints = [CourtKeypoint::new(0.0, 0.0)];
        let mut f0 = frame(&[(1, 1.0, 1.0), (2, 2.0, 2.0), (3, 300.0, 300.0)]);
        f0.frame_index = 0;
        let mut f1 = frame(&[(3, 300.0, 300.0)]);
        f1.frame_index = 1;
        let mut seq = DetectionSequence::new();
        seq.push(f0).unwrap();
        seq.push(f1).unwrap();
        seq.push(FrameDetections::new(2)).unwrap();

        let out = retain_selected(&keypoints, &seq, 2).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.get(0).unwrap().boxes.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(out.get(1).unwrap().boxes.keys().copied().collect::<Vec<_>>(), vec![3]);
        assert!(out.get(2).unwrap().is_empty());
    }
}
