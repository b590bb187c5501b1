//! Court keypoints.
//!
//! Keypoints are produced by an external annotation step and consumed as-is:
//! count and order are the caller's business. Two JSON layouts are accepted,
//! a list of `[x, y]` pairs or a flat list `[x0, y0, x1, y1, ...]`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::storage::write_atomic;

/// A reference point on the court, in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct CourtKeypoint {
    pub x: f64,
    pub y: f64,
}

impl CourtKeypoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

impl From<[f64; 2]> for CourtKeypoint {
    fn from(p: [f64; 2]) -> Self {
        Self::new(p[0], p[1])
    }
}

impl From<CourtKeypoint> for [f64; 2] {
    fn from(p: CourtKeypoint) -> Self {
        [p.x, p.y]
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeypointsFile {
    Pairs(Vec<[f64; 2]>),
    Flat(Vec<f64>),
}

/// Ordered court keypoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CourtKeypoints(Vec<CourtKeypoint>);

impl CourtKeypoints {
    pub fn new(points: Vec<CourtKeypoint>) -> Self {
        Self(points)
    }

    /// Pair up a flat coordinate list. Odd lengths are rejected.
    pub fn from_flat(values: &[f64]) -> Result<Self, TrackError> {
        if values.len() % 2 != 0 {
            return Err(TrackError::InvalidKeypoints(format!(
                "flat keypoint list has odd length {}",
                values.len()
            )));
        }
        Ok(Self(
            values
                .chunks_exact(2)
                .map(|c| CourtKeypoint::new(c[0], c[1]))
                .collect(),
        ))
    }

    pub fn from_json(raw: &str) -> Result<Self, TrackError> {
        let parsed: KeypointsFile = serde_json::from_str(raw)
            .map_err(|e| TrackError::InvalidKeypoints(e.to_string()))?;
        match parsed {
            KeypointsFile::Pairs(pairs) => Ok(Self(pairs.into_iter().map(Into::into).collect())),
            KeypointsFile::Flat(values) => Self::from_flat(&values),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read keypoints file {}: {}", path.display(), e))?;
        let points = Self::from_json(&raw)
            .with_context(|| format!("invalid keypoints file {}", path.display()))?;
        log::info!("loaded {} court keypoints from {}", points.len(), path.display());
        Ok(points)
    }

    /// Write as a list of pairs.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        write_atomic(path, &json)
    }

    pub fn points(&self) -> &[CourtKeypoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[CourtKeypoint]> for CourtKeypoints {
    fn as_ref(&self) -> &[CourtKeypoint] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_flat_lists() {
        let pairs = CourtKeypoints::from_json("[[1, 2], [3.5, 4]]").unwrap();
        let flat = CourtKeypoints::from_json("[1, 2, 3.5, 4]").unwrap();
        assert_eq!(pairs, flat);
        assert_eq!(pairs.points()[1], CourtKeypoint::new(3.5, 4.0));
    }

    #[test]
    fn rejects_odd_flat_list() {
        let err = CourtKeypoints::from_json("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, TrackError::InvalidKeypoints(_)));
    }

    #[test]
    fn empty_list_is_accepted() {
        assert!(CourtKeypoints::from_json("[]").unwrap().is_empty());
    }

    #[test]
    fn save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("court_keypoints.json");
        let points = CourtKeypoints::new(vec![
            CourtKeypoint::new(10.0, 20.0),
            CourtKeypoint::new(30.0, 40.5),
        ]);
        points.save(&path)?;
        assert_eq!(std::fs::read_to_string(&path)?, "[[10.0,20.0],[30.0,40.5]]");
        assert_eq!(CourtKeypoints::load(&path)?, points);
        Ok(())
    }
}
