//! Terminal progress reporting with indicatif.
//!
//! The engine never calls into the UI. Instead a ticker thread polls an
//! [`EngineHandle`]'s counters and forwards them to a [`ProgressCallback`],
//! which keeps slow terminals from holding up result processing.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::engine::{EngineHandle, RunPhase};

/// Receives scan progress.
pub trait ProgressCallback: Send + Sync {
    /// Latest counter values.
    fn on_counts(&self, found: usize, processed: usize, duplicates: usize);

    /// A line for stdout that must not be overdrawn by the bar.
    fn on_message(&self, _message: &str) {}

    /// The run has ended.
    fn on_finish(&self);
}

/// Progress bar over `processed / found`.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    /// A bar on stderr, or a hidden one when `quiet`.
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
            bar.set_style(Self::style());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        };
        Self { bar }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    /// Whether output is suppressed.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.bar.is_hidden()
    }
}

impl ProgressCallback for Progress {
    fn on_counts(&self, found: usize, processed: usize, duplicates: usize) {
        self.bar.set_length(found as u64);
        self.bar.set_position(processed as u64);
        self.bar.set_message(format!("({duplicates} duplicates)"));
    }

    fn on_message(&self, message: &str) {
        self.bar.suspend(|| println!("{message}"));
    }

    fn on_finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Poll `handle` every `interval` until its run has finished.
pub fn spawn_ticker(
    handle: EngineHandle,
    callback: Arc<dyn ProgressCallback>,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("pixdupe-progress".to_string())
        .spawn(move || {
            loop {
                callback.on_counts(handle.found(), handle.processed(), handle.duplicates());
                if handle.phase() == RunPhase::Finished {
                    break;
                }
                thread::sleep(interval);
            }
            callback.on_finish();
        })
}
