//! Match session: drives the player and ball pipelines over a frame source.
//!
//! Two modes share the same per-frame path:
//!
//! - `run` consumes a whole source, consulting the detection cache once per
//!   track kind before inference and storing fresh sequences once at the end.
//! - `step` / `finish` process caller-supplied frames one at a time.
//!
//! Both finish the same way: the ball branch is interpolated and, when court
//! keypoints are configured, the player branch is reduced to the selected
//! players per frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::court::CourtKeypoints;
use crate::detect::SharedBackend;
use crate::error::TrackError;
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::interpolate::interpolate;
use crate::pipeline::{infer, DetectionPipeline};
use crate::select::{retain_selected, select_players};
use crate::storage::{CacheKey, DetectionCache};
use crate::{BallPosition, DetectionSequence, FrameDetections, TrackId};

/// Default number of in-play players (doubles).
pub const DEFAULT_PLAYER_COUNT: usize = 4;

/// What to do when the detector fails on a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdapterFailurePolicy {
    /// Stop and return `AdapterFailure`.
    #[default]
    Abort,
    /// Record an empty frame and continue.
    Skip,
}

/// Result of one streamed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub frame_index: usize,
    pub players: FrameDetections,
    /// Raw detector position; gaps are filled only by `finish`.
    pub ball: BallPosition,
    /// Selected player ids, nearest the court first. `None` without keypoints
    /// or with too few candidates.
    pub selected: Option<Vec<TrackId>>,
}

/// Final per-video output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchTracks {
    pub players: DetectionSequence,
    /// Interpolated ball track, or the raw one when `ball_interpolated` is false.
    pub ball: DetectionSequence,
    pub raw_ball: DetectionSequence,
    pub ball_interpolated: bool,
    /// Iteration ended on the stop flag rather than end of stream.
    pub stopped_early: bool,
}

pub struct MatchSession {
    player: DetectionPipeline,
    ball: DetectionPipeline,
    keypoints: CourtKeypoints,
    player_count: usize,
    policy: AdapterFailurePolicy,
    cache: Option<Box<dyn DetectionCache>>,
    stop: Option<Arc<AtomicBool>>,
    players_acc: DetectionSequence,
    ball_acc: DetectionSequence,
}

impl MatchSession {
    pub fn new(player: DetectionPipeline, ball: DetectionPipeline) -> Self {
        Self {
            player,
            ball,
            keypoints: CourtKeypoints::default(),
            player_count: DEFAULT_PLAYER_COUNT,
            policy: AdapterFailurePolicy::default(),
            cache: None,
            stop: None,
            players_acc: DetectionSequence::new(),
            ball_acc: DetectionSequence::new(),
        }
    }

    /// Both pipelines on one backend.
    pub fn with_backend(backend: SharedBackend) -> Self {
        Self::new(
            DetectionPipeline::player(backend.clone()),
            DetectionPipeline::ball(backend),
        )
    }

    pub fn with_keypoints(mut self, keypoints: CourtKeypoints) -> Self {
        self.keypoints = keypoints;
        self
    }

    pub fn with_player_count(mut self, n: usize) -> Result<Self, TrackError> {
        if n == 0 {
            return Err(TrackError::InvalidArgument(
                "player count must be positive".to_string(),
            ));
        }
        self.player_count = n;
        Ok(self)
    }

    pub fn with_failure_policy(mut self, policy: AdapterFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cache(mut self, cache: Box<dyn DetectionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// True when one inference per frame feeds both pipelines.
    pub fn shares_backend(&self) -> bool {
        Arc::ptr_eq(self.player.backend(), self.ball.backend())
    }

    /// Hand the cache back, e.g. to inspect it after a run.
    pub fn take_cache(&mut self) -> Option<Box<dyn DetectionCache>> {
        self.cache.take()
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    // -------------------- Full video --------------------

    /// Process a whole source. `input_id` names the video in the cache.
    pub fn run(&mut self, source: &mut dyn FrameSource, input_id: &str) -> Result<MatchTracks> {
        self.run_with_progress(source, input_id, |_| {})
    }

    /// As `run`, calling `on_frame` with each processed frame index.
    pub fn run_with_progress(
        &mut self,
        source: &mut dyn FrameSource,
        input_id: &str,
        mut on_frame: impl FnMut(usize),
    ) -> Result<MatchTracks> {
        let player_key = CacheKey::player(input_id);
        let ball_key = CacheKey::ball(input_id);
        let (cached_players, cached_ball) =
            self.load_cached(&player_key, &ball_key, source.len_hint());

        let want_players = cached_players.is_none();
        let want_ball = cached_ball.is_none();
        let mut fresh_players = DetectionSequence::new();
        let mut fresh_ball = DetectionSequence::new();
        let mut stopped_early = false;

        if want_players || want_ball {
            self.warm_up(want_players, want_ball)?;
            log::info!("detecting {} from {}", describe_kinds(want_players, want_ball), source.describe());
            loop {
                if self.stop_requested() {
                    stopped_early = true;
                    log::info!("stop requested after {} frames", fresh_players.len().max(fresh_ball.len()));
                    break;
                }
                let Some(frame) = source.next_frame()? else {
                    break;
                };
                let (players, ball) = self.detect_frame(&frame, want_players, want_ball)?;
                if let Some(players) = players {
                    fresh_players.push(players)?;
                }
                if let Some(ball) = ball {
                    fresh_ball.push(ball)?;
                }
                on_frame(frame.index);
            }
        }

        if stopped_early {
            log::info!("interrupted run; detections not cached");
        } else {
            if cached_players.is_none() {
                self.store(&player_key, &fresh_players);
            }
            if cached_ball.is_none() {
                self.store(&ball_key, &fresh_ball);
            }
        }
        let players = cached_players.unwrap_or(fresh_players);
        let raw_ball = cached_ball.unwrap_or(fresh_ball);

        let mut tracks = self.finalize(players, raw_ball)?;
        tracks.stopped_early = stopped_early;
        Ok(tracks)
    }

    /// Cached entries are used only when they cover exactly the source's
    /// frames and agree with each other; anything else is a miss.
    fn load_cached(
        &mut self,
        player_key: &CacheKey,
        ball_key: &CacheKey,
        expected: Option<usize>,
    ) -> (Option<DetectionSequence>, Option<DetectionSequence>) {
        let Some(cache) = self.cache.as_deref_mut() else {
            return (None, None);
        };
        let check = |key: &CacheKey, seq: Option<DetectionSequence>| match (seq, expected) {
            (Some(seq), Some(n)) if seq.len() != n => {
                log::warn!("ignoring cache entry {}: {} frames, source has {}", key, seq.len(), n);
                None
            }
            (seq, _) => seq,
        };
        let players = check(player_key, cache.load(player_key));
        let ball = check(ball_key, cache.load(ball_key));

        match (players, ball) {
            (Some(p), Some(b)) if p.len() != b.len() => {
                log::warn!(
                    "ignoring cache entries for {} and {}: {} vs {} frames",
                    player_key,
                    ball_key,
                    p.len(),
                    b.len()
                );
                (None, None)
            }
            (Some(_), None) | (None, Some(_)) if expected.is_none() => {
                log::warn!(
                    "ignoring partial cache for {}: source length unknown",
                    player_key.source
                );
                (None, None)
            }
            (players, ball) => {
                if let Some(seq) = &players {
                    log::info!("cache hit: {} ({} frames)", player_key, seq.len());
                }
                if let Some(seq) = &ball {
                    log::info!("cache hit: {} ({} frames)", ball_key, seq.len());
                }
                (players, ball)
            }
        }
    }

    fn store(&mut self, key: &CacheKey, sequence: &DetectionSequence) {
        if let Some(cache) = self.cache.as_deref_mut() {
            if let Err(e) = cache.store(key, sequence) {
                log::warn!("failed to cache {}: {:#}", key, e);
            }
        }
    }

    fn warm_up(&self, want_players: bool, want_ball: bool) -> Result<()> {
        let mut backends: Vec<&SharedBackend> = Vec::new();
        if want_players {
            backends.push(self.player.backend());
        }
        if want_ball && !(want_players && self.shares_backend()) {
            backends.push(self.ball.backend());
        }
        for backend in backends {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            log::debug!("warming up backend {}", guard.name());
            guard.warm_up()?;
        }
        Ok(())
    }

    // -------------------- Streaming --------------------

    /// Process the next frame. Frames must arrive in index order from 0.
    pub fn step(&mut self, frame: &Frame) -> Result<FrameReport, TrackError> {
        let expected = self.players_acc.len();
        if frame.index != expected {
            return Err(TrackError::FrameOutOfOrder {
                expected,
                got: frame.index,
            });
        }
        let (players, ball) = self.detect_frame(frame, true, true)?;
        let players = players.unwrap_or_else(|| FrameDetections::new(frame.index));
        let ball = ball.unwrap_or_else(|| FrameDetections::new(frame.index));

        let selected = if self.keypoints.is_empty() {
            None
        } else {
            match select_players(self.keypoints.points(), &players, self.player_count) {
                Ok(ids) => Some(ids),
                Err(TrackError::InsufficientCandidates { available, .. }) => {
                    log::debug!(
                        "frame {}: only {} player candidates",
                        frame.index,
                        available
                    );
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let report = FrameReport {
            frame_index: frame.index,
            players: players.clone(),
            ball: ball.ball(),
            selected,
        };
        self.players_acc.push(players)?;
        self.ball_acc.push(ball)?;
        Ok(report)
    }

    /// Frames accumulated by `step` so far.
    pub fn frames_seen(&self) -> usize {
        self.players_acc.len()
    }

    /// Post-process everything accumulated by `step` and reset the session.
    pub fn finish(&mut self) -> Result<MatchTracks, TrackError> {
        let players = std::mem::take(&mut self.players_acc);
        let raw_ball = std::mem::take(&mut self.ball_acc);
        self.finalize(players, raw_ball)
    }

    // -------------------- Shared --------------------

    fn detect_frame(
        &self,
        frame: &Frame,
        want_players: bool,
        want_ball: bool,
    ) -> Result<(Option<FrameDetections>, Option<FrameDetections>), TrackError> {
        if want_players && want_ball && self.shares_backend() {
            let detections = match infer(self.player.backend(), frame) {
                Ok(detections) => detections,
                Err(e) => {
                    let empty = self.on_failure(frame.index, e)?;
                    return Ok((Some(empty.clone()), Some(empty)));
                }
            };
            return Ok((
                Some(self.player.filter(frame.index, &detections)),
                Some(self.ball.filter(frame.index, &detections)),
            ));
        }

        let players = if want_players {
            Some(
                self.player
                    .detect_one(frame)
                    .or_else(|e| self.on_failure(frame.index, e))?,
            )
        } else {
            None
        };
        let ball = if want_ball {
            Some(
                self.ball
                    .detect_one(frame)
                    .or_else(|e| self.on_failure(frame.index, e))?,
            )
        } else {
            None
        };
        Ok((players, ball))
    }

    fn on_failure(&self, frame_index: usize, err: TrackError) -> Result<FrameDetections, TrackError> {
        match (&err, self.policy) {
            (TrackError::AdapterFailure { source, .. }, AdapterFailurePolicy::Skip) => {
                log::warn!("frame {}: detector failed, skipping: {:#}", frame_index, source);
                Ok(FrameDetections::new(frame_index))
            }
            _ => Err(err),
        }
    }

    fn finalize(
        &self,
        players: DetectionSequence,
        raw_ball: DetectionSequence,
    ) -> Result<MatchTracks, TrackError> {
        let (ball, ball_interpolated) = match interpolate(&raw_ball) {
            Ok(ball) => (ball, true),
            Err(TrackError::InsufficientData) => {
                log::warn!(
                    "no ball detected in {} frames; returning raw ball track",
                    raw_ball.len()
                );
                (raw_ball.clone(), false)
            }
            Err(e) => return Err(e),
        };
        let players = if self.keypoints.is_empty() {
            players
        } else {
            retain_selected(self.keypoints.points(), &players, self.player_count)?
        };
        log::info!(
            "tracks ready: {} player frames ({} with players), {} ball frames ({} detected)",
            players.len(),
            players.frames_with_detections(),
            ball.len(),
            raw_ball.frames_with_detections()
        );
        Ok(MatchTracks {
            players,
            ball,
            raw_ball,
            ball_interpolated,
            stopped_early: false,
        })
    }
}

fn describe_kinds(players: bool, ball: bool) -> &'static str {
    match (players, ball) {
        (true, true) => "players and ball",
        (true, false) => "players",
        _ => "ball",
    }
}
