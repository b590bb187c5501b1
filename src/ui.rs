use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// Plain-mode progress lines are printed every this many frames.
const PLAIN_PROGRESS_EVERY: u64 = 250;

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Per-frame progress for a stage. `total` is the frame count when known.
    pub fn frames(&self, name: &str, total: Option<usize>) -> FrameProgress {
        if self.use_pretty() {
            let bar = match total {
                Some(total) => {
                    let bar = ProgressBar::new(total as u64);
                    let style = ProgressStyle::with_template(
                        "{spinner} {msg} [{bar:30}] {pos}/{len} frames ({per_sec}, eta {eta})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar());
                    bar.set_style(style);
                    bar
                }
                None => {
                    let bar = ProgressBar::new_spinner();
                    let style = ProgressStyle::with_template("{spinner} {msg} {pos} frames ({per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner());
                    bar.set_style(style);
                    bar
                }
            };
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar.set_message(name.to_string());
            FrameProgress::new(name.to_string(), Some(bar))
        } else {
            eprintln!("==> {}", name);
            FrameProgress::new(name.to_string(), None)
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct FrameProgress {
    name: String,
    start: Instant,
    frames: u64,
    bar: Option<ProgressBar>,
}

impl FrameProgress {
    fn new(name: String, bar: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            frames: 0,
            bar,
        }
    }

    pub fn tick(&mut self) {
        self.frames += 1;
        match &self.bar {
            Some(bar) => bar.inc(1),
            None if self.frames % PLAIN_PROGRESS_EVERY == 0 => {
                eprintln!("    {} frames", self.frames);
            }
            None => {}
        }
    }
}

impl Drop for FrameProgress {
    fn drop(&mut self) {
        let message = format!(
            "✔ {} ({} frames, {})",
            self.name,
            self.frames,
            format_duration(self.start.elapsed())
        );
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
