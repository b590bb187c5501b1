use std::sync::Mutex;

use tempfile::NamedTempFile;

use rally_tracker::config::RallyConfig;
use rally_tracker::AdapterFailurePolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RALLY_CONFIG",
        "RALLY_CACHE_PATH",
        "RALLY_CACHE_BACKEND",
        "RALLY_DETECTOR",
        "RALLY_MODEL_PATH",
        "RALLY_REPLAY_PATH",
        "RALLY_PLAYER_COUNT",
        "RALLY_KEYPOINTS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "cache": { "backend": "json", "path": "/tmp/rally-cache" },
        "detector": {
            "backend": "tract",
            "model_path": "models/yolov8m.onnx",
            "input_width": 1280,
            "input_height": 736,
            "confidence_threshold": 0.35,
            "ball_class_ids": [32, 80]
        },
        "tracking": { "iou_threshold": 0.5, "max_age": 12, "skip_failed_frames": true },
        "players": { "count": 2, "keypoints_path": "court.json" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("RALLY_CONFIG", file.path());
    std::env::set_var("RALLY_PLAYER_COUNT", "4");
    std::env::set_var("RALLY_CACHE_BACKEND", "SQLite");

    let cfg = RallyConfig::load().expect("load config");

    assert_eq!(cfg.cache.backend, "sqlite");
    assert_eq!(cfg.cache.path, "/tmp/rally-cache");
    assert_eq!(cfg.detector.backend, "tract");
    assert_eq!(
        cfg.detector.model_path.as_deref(),
        Some(std::path::Path::new("models/yolov8m.onnx"))
    );
    assert_eq!((cfg.detector.input_width, cfg.detector.input_height), (1280, 736));
    assert_eq!(cfg.detector.confidence_threshold, 0.35);
    assert_eq!(cfg.detector.player_class_ids, vec![0]);
    assert_eq!(cfg.detector.ball_class_ids, vec![32, 80]);
    assert_eq!(cfg.tracking.iou_threshold, 0.5);
    assert_eq!(cfg.tracking.max_age, 12);
    assert_eq!(cfg.tracking.failure_policy, AdapterFailurePolicy::Skip);
    assert_eq!(cfg.players.count, 4);
    assert_eq!(
        cfg.players.keypoints_path.as_deref(),
        Some(std::path::Path::new("court.json"))
    );

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        [cache]
        enabled = false

        [detector]
        backend = "replay"
        replay_path = "recordings/match.json"

        [players]
        count = 2
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("RALLY_CONFIG", file.path());

    let cfg = RallyConfig::load().expect("load config");
    assert!(!cfg.cache.enabled);
    assert_eq!(
        cfg.detector.replay_path.as_deref(),
        Some(std::path::Path::new("recordings/match.json"))
    );
    assert_eq!(cfg.players.count, 2);

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RallyConfig::load().expect("load config");
    assert!(cfg.cache.enabled);
    assert_eq!(cfg.cache.backend, "sqlite");
    assert_eq!(cfg.cache.path, "rally_cache.db");
    assert_eq!(cfg.detector.backend, "replay");
    assert_eq!(cfg.players.count, 4);
    assert!(cfg.players.keypoints_path.is_none());

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RALLY_PLAYER_COUNT", "0");
    assert!(RallyConfig::load().is_err());

    std::env::set_var("RALLY_PLAYER_COUNT", "four");
    assert!(RallyConfig::load().is_err());
    std::env::remove_var("RALLY_PLAYER_COUNT");

    std::env::set_var("RALLY_DETECTOR", "opencv");
    assert!(RallyConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_unreadable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("RALLY_CONFIG", file.path());
    assert!(RallyConfig::load().is_err());

    std::env::set_var("RALLY_CONFIG", "/nonexistent/rally.json");
    assert!(RallyConfig::load().is_err());

    clear_env();
}
