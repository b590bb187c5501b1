//! rally-track - detect, cache and post-process player and ball tracks for one video

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rally_tracker::config::RallyConfig;
use rally_tracker::storage::{open_cache, write_atomic};
use rally_tracker::{open_source, CourtKeypoints, DetectionSequence, MatchSession};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frame source: a directory of still frames or stub://<count>.
    #[arg(long)]
    input: String,
    /// Cache identifier for this video (defaults to the input file stem).
    #[arg(long)]
    name: Option<String>,
    /// Court keypoints JSON; enables per-frame player selection.
    #[arg(long)]
    keypoints: Option<PathBuf>,
    /// Recorded detector output to replay instead of running a model.
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Output directory for the detection JSON files.
    #[arg(long, default_value = ".")]
    out: PathBuf,
    /// Number of in-play players to keep per frame.
    #[arg(long)]
    players: Option<usize>,
    /// Ignore and do not update the detection cache.
    #[arg(long)]
    no_cache: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = RallyConfig::load()?;
    if let Some(path) = &args.replay {
        cfg.detector.backend = "replay".to_string();
        cfg.detector.replay_path = Some(path.clone());
    }
    if let Some(count) = args.players {
        if count == 0 {
            return Err(anyhow!("--players must be greater than zero"));
        }
        cfg.players.count = count;
    }
    let keypoints_path = args.keypoints.clone().or(cfg.players.keypoints_path.clone());
    let name = match &args.name {
        Some(name) => name.clone(),
        None => default_name(&args.input)?,
    };

    let keypoints = match &keypoints_path {
        Some(path) => {
            let _stage = ui.stage("Load court keypoints");
            CourtKeypoints::load(path)?
        }
        None => {
            log::info!("no court keypoints given; player selection disabled");
            CourtKeypoints::default()
        }
    };

    let backend = {
        let _stage = ui.stage("Load detector");
        cfg.build_backend()?
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let mut session = MatchSession::with_backend(backend)
        .with_keypoints(keypoints)
        .with_player_count(cfg.players.count)?
        .with_failure_policy(cfg.tracking.failure_policy)
        .with_stop_flag(stop);
    if args.no_cache || !cfg.cache.enabled {
        log::info!("detection cache disabled");
    } else {
        let cache = open_cache(&cfg.cache.backend, &cfg.cache.path)
            .with_context(|| format!("failed to open {} cache at {}", cfg.cache.backend, cfg.cache.path))?;
        session = session.with_cache(cache);
    }

    let mut source = open_source(&args.input)?;
    let tracks = {
        let mut progress = ui.frames("Track players and ball", source.len_hint());
        session.run_with_progress(source.as_mut(), &name, |_| progress.tick())?
    };
    if tracks.stopped_early {
        log::warn!("interrupted; writing tracks for the frames processed so far");
    }

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create output dir {}", args.out.display()))?;
    let player_path = args.out.join(format!("{}_player_detections.json", name));
    let ball_path = args.out.join(format!("{}_ball_detections.json", name));
    {
        let _stage = ui.stage("Write detections");
        write_sequence(&player_path, &tracks.players)?;
        write_sequence(&ball_path, &tracks.ball)?;
    }

    println!(
        "{} frames: players -> {}, ball -> {}{}",
        tracks.players.len().max(tracks.ball.len()),
        player_path.display(),
        ball_path.display(),
        if tracks.ball_interpolated {
            ""
        } else {
            " (ball not interpolated: no detections)"
        }
    );
    Ok(())
}

fn default_name(input: &str) -> Result<String> {
    Path::new(input.trim_end_matches('/'))
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| anyhow!("cannot derive a name from {}; pass --name", input))
}

fn write_sequence(path: &Path, sequence: &DetectionSequence) -> Result<()> {
    let json = sequence.to_json()?;
    write_atomic(path, json.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}
