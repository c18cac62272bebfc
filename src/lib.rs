//! PixDupe - Duplicate Image Finder
//!
//! Finds duplicate and near-duplicate images across directory trees and
//! inside zip/cbz archives, using either SHA-256 digests or orientation-aware
//! perceptual hashes. Results stream out as groups form, and the scan can
//! be paused, extended with more roots, or pruned while it runs.

pub mod cli;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod logging;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::cli::Cli;
use crate::config::Settings;
use crate::duplicates::DuplicateGroup;
use crate::engine::{Engine, MatcherEvent, Snapshot};
use crate::error::ExitCode;
use crate::progress::{Progress, ProgressCallback};

/// Final report for `--json`.
#[derive(Debug, Serialize)]
struct Report {
    interrupted: bool,
    #[serde(flatten)]
    snapshot: Snapshot,
}

/// Run the command line application.
///
/// # Errors
///
/// Fails if settings cannot be loaded, the engine cannot start, or the
/// JSON report cannot be written.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);

    if cli.print_config {
        print!("{}", settings.to_toml()?);
        log::debug!("Log level: {}", logging::current_level_name());
        return Ok(ExitCode::Success);
    }

    let mut engine = Engine::new(settings.engine_config()).context("Invalid settings")?;
    let handler = signal::install_handler()?;
    handler.attach(engine.handle());

    let bar = Arc::new(Progress::new(cli.quiet || cli.json));
    let ticker = progress::spawn_ticker(
        engine.handle(),
        Arc::clone(&bar) as Arc<dyn ProgressCallback>,
        Duration::from_millis(100),
    )?;

    let printer = if cli.json {
        None
    } else {
        let events = engine.events();
        let output = Arc::clone(&bar);
        Some(
            thread::Builder::new()
                .name("pixdupe-printer".to_string())
                .spawn(move || {
                    for event in events.iter() {
                        match event {
                            MatcherEvent::NewGroup { group } => output.on_message(&format_group(&group)),
                            MatcherEvent::NewMatch { group, address } => output.on_message(&format!(
                                "  + {} (group {})",
                                address,
                                group.position.unwrap_or_default() + 1
                            )),
                            MatcherEvent::Finished => break,
                        }
                    }
                })?,
        )
    };

    engine.run(&cli.paths).context("Scan failed")?;

    // Both threads exit on their own once the run is over.
    if let Some(printer) = printer {
        let _ = printer.join();
    }
    let _ = ticker.join();

    let interrupted = handler.is_interrupted();
    if cli.json {
        let report = Report {
            interrupted,
            snapshot: engine.snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet {
        eprintln!(
            "{} images scanned, {} duplicates in {} groups{}",
            engine.processed(),
            engine.duplicates(),
            engine.index().group_count(),
            if interrupted { " (interrupted)" } else { "" }
        );
    }

    Ok(ExitCode::for_outcome(engine.duplicates(), interrupted))
}

fn format_group(group: &DuplicateGroup) -> String {
    let mut out = format!(
        "Group {}: {} images",
        group.position.unwrap_or_default() + 1,
        group.len()
    );
    for member in &group.members {
        out.push_str("\n  ");
        out.push_str(&member.to_string());
    }
    out
}
