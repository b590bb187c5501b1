use serde::{Deserialize, Serialize};

use crate::{BoundingBox, TrackId};

/// One object reported by a detector backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: ObjectClass,
    /// Tracker-assigned id; `None` when the backend does not track.
    #[serde(default)]
    pub track_id: Option<TrackId>,
    pub bbox: BoundingBox,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

impl Detection {
    pub fn new(class: ObjectClass, track_id: Option<TrackId>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            class,
            track_id,
            bbox,
            confidence,
        }
    }
}

fn default_confidence() -> f32 {
    1.0
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    #[serde(alias = "person")]
    Player,
    #[serde(alias = "sports ball", alias = "sports_ball")]
    Ball,
    Other,
}
