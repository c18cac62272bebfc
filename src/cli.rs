//! Command-line interface for pixdupe.
//!
//! # Example
//!
//! ```bash
//! # Perceptual scan of two folders
//! pixdupe ~/Pictures ~/Downloads
//!
//! # Byte-identical matches only, JSON report on stdout
//! pixdupe --exact --json ~/Pictures > dupes.json
//!
//! # Stricter matching, PNG and JPEG only, 4 workers
//! pixdupe --strength 9 --ext png,jpg,jpeg --jobs 4 ~/Pictures
//! ```

use clap::Parser;
use std::path::PathBuf;

use crate::config::Settings;

/// Find duplicate and near-duplicate images, including inside zip/cbz archives.
///
/// Groups are printed as they are discovered. Rotated and mirrored copies
/// match in perceptual mode.
#[derive(Debug, Parser)]
#[command(name = "pixdupe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directories to scan, walked in the order given
    #[arg(value_name = "PATHS", required_unless_present = "print_config")]
    pub paths: Vec<PathBuf>,

    /// Perceptual strength from 0 (loose) to 10 (strict)
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u8).range(0..=10))]
    pub strength: Option<u8>,

    /// Match byte-identical files only (SHA-256)
    #[arg(long)]
    pub exact: bool,

    /// Number of fingerprinting threads (default: one per core)
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,

    /// Image extensions to scan (comma separated)
    #[arg(long = "ext", value_name = "EXT", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Archive extensions to look inside (comma separated)
    #[arg(long = "archive-ext", value_name = "EXT", value_delimiter = ',')]
    pub archive_extensions: Vec<String>,

    /// Settings file (default: settings.toml in the platform config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the effective settings as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Print a JSON report at the end instead of groups as they appear;
    /// errors are reported as JSON too
    #[arg(long)]
    pub json: bool,

    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors and results
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// Overlay the flags that were given onto `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(strength) = self.strength {
            settings.strength = strength;
        }
        if self.exact {
            settings.exact = true;
        }
        if let Some(jobs) = self.jobs {
            settings.workers = Some(usize::from(jobs));
        }
        if !self.extensions.is_empty() {
            settings.extensions.clone_from(&self.extensions);
        }
        if !self.archive_extensions.is_empty() {
            settings.archive_extensions.clone_from(&self.archive_extensions);
        }
    }
}
