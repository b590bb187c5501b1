use thiserror::Error;

/// Domain errors raised by the tracking core.
///
/// Cache misses and corruption are recoverable: `DetectionCache::load` folds
/// both into `None`. The remaining kinds are fatal to the call that raised
/// them and the caller decides whether to abort or skip.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("cache miss for key '{0}'")]
    CacheMiss(String),

    #[error("corrupt cache entry for key '{key}': {reason}")]
    CacheCorrupt { key: String, reason: String },

    #[error("no ball position in any frame; nothing to interpolate from")]
    InsufficientData,

    #[error("requested {requested} players but only {available} candidates are present")]
    InsufficientCandidates { requested: usize, available: usize },

    #[error("detector failed on frame {frame_index}")]
    AdapterFailure {
        frame_index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid court keypoints: {0}")]
    InvalidKeypoints(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("frame index out of order (expected {expected}, got {got})")]
    FrameOutOfOrder { expected: usize, got: usize },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}
