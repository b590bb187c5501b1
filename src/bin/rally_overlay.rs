//! rally-overlay - draw persisted player and ball tracks onto extracted frames

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use rally_tracker::ingest::{FrameSource, ImageSequenceSource};
use rally_tracker::render::{annotate, load_font, system_font};
use rally_tracker::{CourtKeypoints, DetectionSequence};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory of extracted frames, sorted by file name.
    frames_dir: PathBuf,
    /// Player detections JSON written by rally-track.
    player_json: PathBuf,
    /// Ball detections JSON written by rally-track.
    ball_json: PathBuf,
    /// Court keypoints JSON to draw.
    #[arg(long)]
    keypoints: Option<PathBuf>,
    /// TrueType font for track-id and keypoint labels (defaults to a system font).
    #[arg(long, env = "RALLY_FONT")]
    font: Option<PathBuf>,
    /// Output directory for annotated frames.
    #[arg(long, default_value = "overlay_out")]
    out: PathBuf,
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

    let (players, ball) = {
        let _stage = ui.stage("Load detections");
        (read_sequence(&args.player_json)?, read_sequence(&args.ball_json)?)
    };
    let keypoints = match &args.keypoints {
        Some(path) => CourtKeypoints::load(path)?,
        None => CourtKeypoints::default(),
    };

    let font = match &args.font {
        Some(path) => Some(load_font(path)?),
        None => match system_font() {
            Some((path, font)) => {
                log::debug!("label font: {}", path.display());
                Some(font)
            }
            None => {
                log::warn!("no label font found; pass --font to draw track ids");
                None
            }
        },
    };

    let mut source = ImageSequenceSource::open(&args.frames_dir)?;
    if source.files().len() != players.len().max(ball.len()) {
        log::warn!(
            "{} frames on disk but detections cover {} frames",
            source.files().len(),
            players.len().max(ball.len())
        );
    }
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create output dir {}", args.out.display()))?;

    let mut written = 0usize;
    {
        let mut progress = ui.frames("Render overlay", source.len_hint());
        while let Some(frame) = source.next_frame()? {
            let image = annotate(&frame, &players, &ball, keypoints.points(), font.as_ref())?;
            let file_name = source.files()[frame.index]
                .file_name()
                .ok_or_else(|| anyhow!("frame {} has no file name", frame.index))?
                .to_os_string();
            let out_path = args.out.join(file_name);
            image
                .save(&out_path)
                .with_context(|| format!("failed to write {}", out_path.display()))?;
            written += 1;
            progress.tick();
        }
    }
    println!("{} annotated frames written to {}", written, args.out.display());
    Ok(())
}

fn read_sequence(path: &Path) -> Result<DetectionSequence> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    DetectionSequence::from_json(&raw).map_err(|e| anyhow!("invalid detections file {}: {}", path.display(), e))
}
