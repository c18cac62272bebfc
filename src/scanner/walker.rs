//! Pull-based directory walker over a growing root queue.
//!
//! # Overview
//!
//! The [`IngestionWalker`] runs on its own thread. It takes roots from a
//! channel in the order they were added, walks each one with [`walkdir`]
//! (children sorted by file name for reproducible output), and forwards
//! every file whose extension passes the [`ExtensionFilter`] as a
//! [`WalkEvent::Candidate`].
//!
//! Deciding whether a candidate is actually new (already indexed, ignored,
//! under a removed root, already in flight) is left to the single consumer
//! that owns the match index; the walker holds no index state.
//!
//! Before descending into a root and before each file the walker waits on
//! a [`PauseGate`], so pausing the engine also pauses discovery.
//!
//! # Example
//!
//! ```no_run
//! use pixdupe::scanner::walker::candidates;
//! use pixdupe::scanner::ExtensionFilter;
//! use std::path::Path;
//!
//! let filter = ExtensionFilter::default();
//! for candidate in candidates(Path::new("/home/user/Pictures"), &filter) {
//!     println!("{:?}: {}", candidate.class, candidate.path.display());
//! }
//! ```

use std::path::{Path, PathBuf};

use crossbeam_channel::{select, Receiver, Sender};
use walkdir::WalkDir;

use super::{ExtensionFilter, FileClass};

/// A file discovered under a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute path of the file
    pub path: PathBuf,
    /// Image or archive
    pub class: FileClass,
}

/// Progress messages from the walker to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    /// The walker is about to descend into a root.
    RootStarted(PathBuf),
    /// A file passing the extension filter.
    Candidate(Candidate),
    /// Every candidate under the root has been sent.
    RootFinished(PathBuf),
}

/// Blocking gate consulted before each unit of walking work.
pub trait PauseGate: Send + Sync {
    /// Block while paused. Returns `false` once the walk should stop.
    fn wait_until_resumed(&self) -> bool;
}

/// Walks queued roots and streams candidates.
pub struct IngestionWalker<G> {
    roots: Receiver<PathBuf>,
    filter: ExtensionFilter,
    gate: G,
}

impl<G: PauseGate> IngestionWalker<G> {
    /// Create a walker reading roots from `roots`.
    #[must_use]
    pub fn new(roots: Receiver<PathBuf>, filter: ExtensionFilter, gate: G) -> Self {
        Self {
            roots,
            filter,
            gate,
        }
    }

    /// Walk roots until the gate says stop, `stop` disconnects, or the
    /// consumer hangs up.
    pub fn run(&self, events: &Sender<WalkEvent>, stop: &Receiver<()>) {
        loop {
            let root = select! {
                recv(self.roots) -> root => match root {
                    Ok(root) => root,
                    Err(_) => return,
                },
                recv(stop) -> _ => return,
            };

            if !self.gate.wait_until_resumed() {
                return;
            }
            if !self.walk_root(root, events) {
                return;
            }
        }
    }

    /// Walk a single root. Returns `false` if walking should stop entirely.
    fn walk_root(&self, root: PathBuf, events: &Sender<WalkEvent>) -> bool {
        log::debug!("Walking root {}", root.display());
        if events.send(WalkEvent::RootStarted(root.clone())).is_err() {
            return false;
        }

        let mut count = 0usize;
        for candidate in candidates(&root, &self.filter) {
            if !self.gate.wait_until_resumed() {
                log::debug!("Walker: stop requested inside {}", root.display());
                return false;
            }
            if events.send(WalkEvent::Candidate(candidate)).is_err() {
                return false;
            }
            count += 1;
        }

        log::debug!("Finished root {} ({} candidates)", root.display(), count);
        events.send(WalkEvent::RootFinished(root)).is_ok()
    }
}

/// Lazily enumerate the files under `root` that pass `filter`.
///
/// Directory entries are visited in file-name order. Unreadable
/// directories are logged and skipped. Symbolic links are not followed.
pub fn candidates<'a>(
    root: &Path,
    filter: &'a ExtensionFilter,
) -> impl Iterator<Item = Candidate> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                log::warn!("Walker error for {}: {}", path.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| {
            let class = filter.classify(entry.path());
            if class.is_none() {
                log::trace!("Skipping unsupported file: {}", entry.path().display());
            }
            class.map(|class| Candidate {
                path: entry.into_path(),
                class,
            })
        })
}

/// Canonical form of a root: resolved if it exists, else made absolute.
#[must_use]
pub fn normalize_root(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
