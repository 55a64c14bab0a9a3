//! Progress and ETA arithmetic, and the single-line stage status.
//!
//! `ProgressContext` owns the status line for a whole run and is passed into
//! each pipeline stage; there is no process-wide progress state.

use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// Fraction of `total` covered by `done`, or 0 when the total is zero.
pub fn fraction_done(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64).min(1.0)
}

/// Whole percentage for a fraction, truncated toward zero.
pub fn percent(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0) as u8
}

/// Seconds remaining, extrapolated from the time taken so far.
///
/// Returns `None` while nothing has been transferred yet.
pub fn estimate_remaining(fraction: f64, elapsed: Duration) -> Option<u64> {
    if fraction <= 0.0 {
        return None;
    }
    let elapsed = elapsed.as_secs_f64();
    let total = elapsed / fraction;
    Some((total - elapsed).max(0.0).round() as u64)
}

/// Render `42%` or `42% 01:10`, percentage right-aligned to two columns.
pub fn render_progress(percent: u8, eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        None => format!("{:>2}%", percent),
        Some(secs) => format!("{:>2}% {:02}:{:02}", percent, secs / 60, secs % 60),
    }
}

/// Render a transfer whose total size is unknown.
pub fn render_bytes(bytes: u64) -> String {
    format!("{}", HumanBytes(bytes))
}

/// Owns the overwritable status line for one run.
///
/// `start` opens a stage, `update` redraws its progress suffix, and `ok` or
/// `fail` closes it with a permanent line.
pub struct ProgressContext {
    bar: ProgressBar,
    quiet: bool,
    label: String,
    started: Instant,
}

impl ProgressContext {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [BUSY] {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
        );
        Self {
            bar,
            quiet: false,
            label: String::new(),
            started: Instant::now(),
        }
    }

    /// A context that draws and prints nothing, for `--quiet`, `--json` and tests.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            quiet: true,
            label: String::new(),
            started: Instant::now(),
        }
    }

    pub fn start(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.started = Instant::now();
        self.bar.set_message(self.label.clone());
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Redraw the status line with the current transfer figures.
    pub fn update(&self, suffix: &str) {
        self.bar.set_message(format!("{}  {}", self.label, suffix));
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn ok(&mut self) {
        let line = format!("[ OK ] {} ({:.2?})", self.label, self.elapsed());
        self.finish_with(line);
    }

    pub fn fail(&mut self) {
        let line = format!("[FAIL] {}", self.label);
        self.finish_with(line);
    }

    fn finish_with(&mut self, line: String) {
        self.bar.disable_steady_tick();
        self.bar.set_message(String::new());
        if !self.quiet {
            self.bar.suspend(|| eprintln!("{line}"));
        }
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProgressContext {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}
