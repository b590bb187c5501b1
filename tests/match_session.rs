use std::sync::{Arc, Mutex};

use rally_tracker::detect::{share, ReplayBackend, SharedBackend};
use rally_tracker::storage::open_cache;
use rally_tracker::{
    BallPosition, BoundingBox, CacheKey, CourtKeypoints, DetectionCache, DetectionSequence,
    IouTracker, MatchSession, SqliteDetectionCache, SyntheticSource,
};

const RECORDING: &str = r#"[
    [
        {"class": "person", "track_id": 1, "bbox": [100, 400, 140, 500], "confidence": 0.9},
        {"class": "person", "track_id": 2, "bbox": [500, 400, 540, 500], "confidence": 0.9},
        {"class": "person", "track_id": 3, "bbox": [900, 50, 940, 150], "confidence": 0.9},
        {"class": "sports ball", "bbox": [300, 200, 310, 210], "confidence": 0.6}
    ],
    [
        {"class": "person", "track_id": 1, "bbox": [102, 400, 142, 500], "confidence": 0.9},
        {"class": "person", "track_id": 2, "bbox": [502, 400, 542, 500], "confidence": 0.9},
        {"class": "person", "track_id": 3, "bbox": [900, 50, 940, 150], "confidence": 0.9}
    ],
    [],
    [
        {"class": "person", "track_id": 1, "bbox": [106, 400, 146, 500], "confidence": 0.9},
        {"class": "person", "track_id": 2, "bbox": [506, 400, 546, 500], "confidence": 0.9},
        {"class": "sports ball", "bbox": [330, 170, 340, 180], "confidence": 0.7},
        {"class": "sports ball", "bbox": [10, 10, 20, 20], "confidence": 0.2}
    ]
]"#;

fn replay_backend(dir: &std::path::Path) -> ReplayBackend {
    let path = dir.join("recording.json");
    std::fs::write(&path, RECORDING).expect("write recording");
    ReplayBackend::from_path(&path).expect("load recording")
}

fn court(dir: &std::path::Path) -> CourtKeypoints {
    let path = dir.join("court_keypoints.json");
    std::fs::write(&path, "[120, 450, 520, 450, 320, 300]").expect("write keypoints");
    CourtKeypoints::load(&path).expect("load keypoints")
}

#[test]
fn full_run_selects_players_and_fills_ball_track() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = MatchSession::with_backend(share(replay_backend(dir.path())))
        .with_keypoints(court(dir.path()))
        .with_player_count(2)
        .unwrap();

    let tracks = session
        .run(&mut SyntheticSource::new(4, 16, 16), "rally_01")
        .unwrap();

    assert_eq!(tracks.players.len(), 4);
    assert_eq!(tracks.ball.len(), 4);
    for frame in [0, 1, 3] {
        let ids: Vec<u32> = tracks.players.get(frame).unwrap().boxes.keys().copied().collect();
        assert_eq!(ids, vec![1, 2], "frame {frame}");
    }
    assert!(tracks.players.get(2).unwrap().is_empty());

    assert!(tracks.ball_interpolated);
    assert_eq!(
        tracks.ball.get(1).unwrap().ball(),
        BallPosition::Present(BoundingBox::new(310.0, 190.0, 320.0, 200.0))
    );
    assert_eq!(
        tracks.ball.get(2).unwrap().ball(),
        BallPosition::Present(BoundingBox::new(320.0, 180.0, 330.0, 190.0))
    );
    assert_eq!(
        tracks.ball.get(3).unwrap().ball(),
        BallPosition::Present(BoundingBox::new(330.0, 170.0, 340.0, 180.0))
    );
}

#[test]
fn persisted_outputs_round_trip_through_json() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = MatchSession::with_backend(share(replay_backend(dir.path())));
    let tracks = session
        .run(&mut SyntheticSource::new(4, 16, 16), "rally_01")
        .unwrap();

    let json = tracks.ball.to_json().unwrap();
    assert!(json.starts_with(r#"[{"1":[300.0,200.0,310.0,210.0]},"#));
    assert_eq!(DetectionSequence::from_json(&json).unwrap(), tracks.ball);

    let players = tracks.players.to_json().unwrap();
    assert_eq!(DetectionSequence::from_json(&players).unwrap(), tracks.players);
}

#[test]
fn sqlite_cache_skips_inference_on_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache.db");
    let db = db.to_str().unwrap();
    let replay = Arc::new(Mutex::new(replay_backend(dir.path())));
    let shared: SharedBackend = replay.clone();

    let first = MatchSession::with_backend(shared.clone())
        .with_cache(open_cache("sqlite", db).unwrap())
        .run(&mut SyntheticSource::new(4, 16, 16), "rally_01")
        .unwrap();
    assert_eq!(replay.lock().unwrap().calls(), 4);

    let second = MatchSession::with_backend(shared)
        .with_cache(open_cache("sqlite", db).unwrap())
        .run(&mut SyntheticSource::new(4, 16, 16), "rally_01")
        .unwrap();
    assert_eq!(replay.lock().unwrap().calls(), 4);
    assert_eq!(first, second);

    let mut cache = SqliteDetectionCache::open(db).unwrap();
    assert_eq!(cache.load(&CacheKey::ball("rally_01")), Some(first.raw_ball));
    assert!(cache.load(&CacheKey::ball("rally_02")).is_none());
}

#[test]
fn tracker_assigns_ids_to_untracked_players() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("untracked.json");
    std::fs::write(
        &path,
        r#"[
            [{"class": "player", "bbox": [0, 0, 10, 20]}, {"class": "player", "bbox": [50, 0, 60, 20]}],
            [{"class": "player", "bbox": [1, 0, 11, 20]}, {"class": "player", "bbox": [51, 0, 61, 20]}]
        ]"#,
    )
    .unwrap();
    let backend = IouTracker::new(ReplayBackend::from_path(&path).unwrap());
    let mut session = MatchSession::with_backend(share(backend));
    let tracks = session
        .run(&mut SyntheticSource::new(2, 8, 8), "untracked")
        .unwrap();

    assert!(!tracks.ball_interpolated);
    let first = tracks.players.get(0).unwrap();
    let second = tracks.players.get(1).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(
        first.boxes.keys().collect::<Vec<_>>(),
        second.boxes.keys().collect::<Vec<_>>()
    );
}
