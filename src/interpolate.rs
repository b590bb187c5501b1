//! Ball trajectory gap filling.
//!
//! Each of the four box coordinates is an independent series indexed by frame.
//! Interior gaps are filled linearly between the nearest known neighbours,
//! leading gaps take the first known box and trailing gaps the last one.
//! The output depends only on the known boxes and their frame positions.

use crate::error::TrackError;
use crate::{BallPosition, BoundingBox, DetectionSequence};

/// Fill every gap of a ball sequence.
///
/// Every entry of the result holds the ball slot. Fails with
/// `InsufficientData` when no frame has a valid ball box.
pub fn interpolate(sequence: &DetectionSequence) -> Result<DetectionSequence, TrackError> {
    let filled = interpolate_positions(&sequence.ball_positions())?;
    let positions: Vec<BallPosition> = filled.into_iter().map(BallPosition::Present).collect();
    Ok(DetectionSequence::from_ball_positions(&positions))
}

/// Fill every gap of a per-frame ball position series.
///
/// Present-but-invalid boxes count as gaps.
pub fn interpolate_positions(positions: &[BallPosition]) -> Result<Vec<BoundingBox>, TrackError> {
    let known: Vec<(usize, BoundingBox)> = positions
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.known().map(|b| (i, b)))
        .collect();

    let (Some(&(first_idx, first)), Some(&(last_idx, last))) = (known.first(), known.last()) else {
        return Err(TrackError::InsufficientData);
    };

    let mut out = Vec::with_capacity(positions.len());
    out.extend(std::iter::repeat(first).take(first_idx));

    for pair in known.windows(2) {
        let (a_idx, a) = pair[0];
        let (b_idx, b) = pair[1];
        out.push(a);
        let span = (b_idx - a_idx) as f64;
        for i in (a_idx + 1)..b_idx {
            let t = (i - a_idx) as f64 / span;
            out.push(lerp_box(&a, &b, t));
        }
    }
    out.push(last);

    out.extend(std::iter::repeat(last).take(positions.len() - last_idx - 1));
    debug_assert_eq!(out.len(), positions.len());
    Ok(out)
}

fn lerp_box(a: &BoundingBox, b: &BoundingBox, t: f64) -> BoundingBox {
    BoundingBox::new(
        lerp(a.x1, b.x1, t),
        lerp(a.y1, b.y1, t),
        lerp(a.x2, b.x2, t),
        lerp(a.y2, b.y2, t),
    )
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use BallPosition::{Absent, Present};

    fn sq(v: f64) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, v, v)
    }

    #[test]
    fn interior_gap_is_linear() {
        let out = interpolate_positions(&[
            Present(sq(10.0)),
            Absent,
            Absent,
            Absent,
            Present(sq(50.0)),
        ])
        .unwrap();
        assert_eq!(out, vec![sq(10.0), sq(20.0), sq(30.0), sq(40.0), sq(50.0)]);
    }

    #[test]
    fn leading_gap_is_back_filled() {
        let out =
            interpolate_positions(&[Absent, Absent, Present(sq(20.0)), Present(sq(30.0))]).unwrap();
        assert_eq!(out, vec![sq(20.0), sq(20.0), sq(20.0), sq(30.0)]);
    }

    #[test]
    fn trailing_gap_is_forward_filled() {
        let out =
            interpolate_positions(&[Present(sq(10.0)), Present(sq(20.0)), Absent, Absent]).unwrap();
        assert_eq!(out, vec![sq(10.0), sq(20.0), sq(20.0), sq(20.0)]);
    }

    #[test]
    fn coordinates_interpolate_independently() {
        let a = BoundingBox::new(0.0, 100.0, 10.0, 110.0);
        let b = BoundingBox::new(20.0, 80.0, 40.0, 90.0);
        let out = interpolate_positions(&[Present(a), Absent, Present(b)]).unwrap();
        assert_eq!(out[1], BoundingBox::new(10.0, 90.0, 25.0, 100.0));
    }

    #[test]
    fn single_known_value_fills_everything() {
        let out = interpolate_positions(&[Absent, Present(sq(5.0)), Absent]).unwrap();
        assert_eq!(out, vec![sq(5.0); 3]);
    }

    #[test]
    fn invalid_boxes_count_as_gaps() {
        let bad = BoundingBox::new(10.0, 0.0, 0.0, 10.0);
        let out = interpolate_positions(&[Present(sq(10.0)), Present(bad), Present(sq(30.0))])
            .unwrap();
        assert_eq!(out[1], sq(20.0));
    }

    #[test]
    fn all_absent_is_insufficient_data() {
        assert!(matches!(
            interpolate_positions(&[Absent, Absent]),
            Err(TrackError::InsufficientData)
        ));
        assert!(matches!(
            interpolate(&DetectionSequence::new()),
            Err(TrackError::InsufficientData)
        ));
    }

    #[test]
    fn sequence_result_is_total_idempotent_and_deterministic() {
        let input = DetectionSequence::from_ball_positions(&[
            Absent,
            Present(BoundingBox::new(1.0, 2.0, 3.0, 4.0)),
            Absent,
            Absent,
            Present(BoundingBox::new(7.0, 11.0, 13.0, 17.0)),
            Absent,
        ]);
        let once = interpolate(&input).unwrap();
        assert_eq!(once.len(), input.len());
        assert!(once.iter().all(|e| e.ball().is_present() && e.len() == 1));
        assert_eq!(interpolate(&once).unwrap(), once);
        assert_eq!(interpolate(&input).unwrap(), once);
        for (i, entry) in once.iter().enumerate() {
            assert_eq!(entry.frame_index, i);
        }
    }
}
