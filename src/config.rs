use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::tracker::{DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_AGE};
use crate::detect::{share, IouTracker, ReplayBackend, SharedBackend};
use crate::session::{AdapterFailurePolicy, DEFAULT_PLAYER_COUNT};

const DEFAULT_CACHE_BACKEND: &str = "sqlite";
const DEFAULT_CACHE_PATH: &str = "rally_cache.db";
const DEFAULT_DETECTOR: &str = "replay";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.2;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const DEFAULT_PLAYER_CLASS_IDS: &[usize] = &[0];
const DEFAULT_BALL_CLASS_IDS: &[usize] = &[32];

pub const CACHE_BACKENDS: &[&str] = &["sqlite", "json", "memory"];
pub const DETECTOR_BACKENDS: &[&str] = &["replay", "tract"];

#[derive(Debug, Deserialize, Default)]
struct RallyConfigFile {
    cache: Option<CacheConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracking: Option<TrackingConfigFile>,
    players: Option<PlayersConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CacheConfigFile {
    enabled: Option<bool>,
    backend: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    replay_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    player_class_ids: Option<Vec<usize>>,
    ball_class_ids: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    iou_threshold: Option<f64>,
    max_age: Option<u32>,
    skip_failed_frames: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PlayersConfigFile {
    count: Option<usize>,
    keypoints_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RallyConfig {
    pub cache: CacheSettings,
    pub detector: DetectorSettings,
    pub tracking: TrackingSettings,
    pub players: PlayerSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: String,
    /// Database file for `sqlite`, directory for `json`, unused for `memory`.
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub replay_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub player_class_ids: Vec<usize>,
    pub ball_class_ids: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub iou_threshold: f64,
    pub max_age: u32,
    pub failure_policy: AdapterFailurePolicy,
}

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub count: usize,
    pub keypoints_path: Option<PathBuf>,
}

impl Default for RallyConfig {
    fn default() -> Self {
        // Defaults are always valid.
        Self::from_file(RallyConfigFile::default())
    }
}

impl RallyConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RALLY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RallyConfigFile) -> Self {
        let cache_file = file.cache.unwrap_or_default();
        let cache = CacheSettings {
            enabled: cache_file.enabled.unwrap_or(true),
            backend: cache_file
                .backend
                .unwrap_or_else(|| DEFAULT_CACHE_BACKEND.to_string()),
            path: cache_file
                .path
                .unwrap_or_else(|| DEFAULT_CACHE_PATH.to_string()),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: detector_file.model_path,
            replay_path: detector_file.replay_path,
            input_width: detector_file.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: detector_file.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            nms_threshold: detector_file.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
            player_class_ids: detector_file
                .player_class_ids
                .unwrap_or_else(|| DEFAULT_PLAYER_CLASS_IDS.to_vec()),
            ball_class_ids: detector_file
                .ball_class_ids
                .unwrap_or_else(|| DEFAULT_BALL_CLASS_IDS.to_vec()),
        };

        let tracking_file = file.tracking.unwrap_or_default();
        let tracking = TrackingSettings {
            iou_threshold: tracking_file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            max_age: tracking_file.max_age.unwrap_or(DEFAULT_MAX_AGE),
            failure_policy: if tracking_file.skip_failed_frames.unwrap_or(false) {
                AdapterFailurePolicy::Skip
            } else {
                AdapterFailurePolicy::Abort
            },
        };

        let players_file = file.players.unwrap_or_default();
        let players = PlayerSettings {
            count: players_file.count.unwrap_or(DEFAULT_PLAYER_COUNT),
            keypoints_path: players_file.keypoints_path,
        };

        Self {
            cache,
            detector,
            tracking,
            players,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("RALLY_CACHE_PATH") {
            if !path.trim().is_empty() {
                self.cache.path = path;
            }
        }
        if let Ok(backend) = std::env::var("RALLY_CACHE_BACKEND") {
            if !backend.trim().is_empty() {
                self.cache.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(detector) = std::env::var("RALLY_DETECTOR") {
            if !detector.trim().is_empty() {
                self.detector.backend = detector.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("RALLY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("RALLY_REPLAY_PATH") {
            if !path.trim().is_empty() {
                self.detector.replay_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(count) = std::env::var("RALLY_PLAYER_COUNT") {
            self.players.count = count
                .trim()
                .parse()
                .map_err(|_| anyhow!("RALLY_PLAYER_COUNT must be a positive integer"))?;
        }
        if let Ok(path) = std::env::var("RALLY_KEYPOINTS") {
            if !path.trim().is_empty() {
                self.players.keypoints_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.cache.backend = self.cache.backend.to_lowercase();
        if !CACHE_BACKENDS.contains(&self.cache.backend.as_str()) {
            return Err(anyhow!(
                "unknown cache backend '{}' (expected one of {})",
                self.cache.backend,
                CACHE_BACKENDS.join(", ")
            ));
        }
        self.detector.backend = self.detector.backend.to_lowercase();
        if !DETECTOR_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of {})",
                self.detector.backend,
                DETECTOR_BACKENDS.join(", ")
            ));
        }
        if self.players.count == 0 {
            return Err(anyhow!("player count must be greater than zero"));
        }
        check_unit_interval("detector.confidence_threshold", self.detector.confidence_threshold as f64)?;
        check_unit_interval("detector.nms_threshold", self.detector.nms_threshold as f64)?;
        check_unit_interval("tracking.iou_threshold", self.tracking.iou_threshold)?;
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        Ok(())
    }

    /// Construct the configured detector, wrapped in an IoU tracker so every
    /// player detection carries a track id.
    pub fn build_backend(&self) -> Result<SharedBackend> {
        let tracking = &self.tracking;
        match self.detector.backend.as_str() {
            "replay" => {
                let path = self.detector.replay_path.as_ref().ok_or_else(|| {
                    anyhow!("replay detector requires detector.replay_path or RALLY_REPLAY_PATH")
                })?;
                let backend = ReplayBackend::from_path(path)?;
                Ok(share(
                    IouTracker::new(backend)
                        .with_iou_threshold(tracking.iou_threshold)
                        .with_max_age(tracking.max_age),
                ))
            }
            "tract" => self.build_tract_backend(),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract_backend(&self) -> Result<SharedBackend> {
        use crate::detect::backends::TractBackend;
        use anyhow::Context;

        let detector = &self.detector;
        let model_path = detector.model_path.as_ref().ok_or_else(|| {
            anyhow!("tract detector requires detector.model_path or RALLY_MODEL_PATH")
        })?;
        let backend = TractBackend::new(model_path, detector.input_width, detector.input_height)
            .with_context(|| format!("failed to load model {}", model_path.display()))?
            .with_threshold(detector.confidence_threshold)
            .with_nms_threshold(detector.nms_threshold)
            .with_class_map(
                detector.player_class_ids.clone(),
                detector.ball_class_ids.clone(),
            );
        Ok(share(
            IouTracker::new(backend)
                .with_iou_threshold(self.tracking.iou_threshold)
                .with_max_age(self.tracking.max_age),
        ))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract_backend(&self) -> Result<SharedBackend> {
        Err(anyhow!("tract detector requires the backend-tract feature"))
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(anyhow!("{} must be in (0, 1], got {}", name, value))
    }
}

fn read_config_file(path: &Path) -> Result<RallyConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = RallyConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.cache.backend, "sqlite");
        assert_eq!(cfg.detector.backend, "replay");
        assert_eq!(cfg.players.count, 4);
        assert_eq!(cfg.detector.ball_class_ids, vec![32]);
        assert_eq!(cfg.tracking.failure_policy, AdapterFailurePolicy::Abort);
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let mut cfg = RallyConfig::default();
        cfg.detector.confidence_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = RallyConfig::default();
        cfg.tracking.iou_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_backends() {
        let mut cfg = RallyConfig::default();
        cfg.cache.backend = "redis".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = RallyConfig::default();
        cfg.detector.backend = "Replay".to_string();
        cfg.validate().unwrap();
        assert_eq!(cfg.detector.backend, "replay");
    }

    #[test]
    fn replay_backend_needs_a_recording() {
        let cfg = RallyConfig::default();
        assert!(cfg.build_backend().is_err());
    }
}
