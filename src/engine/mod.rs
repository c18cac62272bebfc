//! Scan engine: walker, worker pool and match index wired together.
//!
//! # Overview
//!
//! [`Engine::run`] drives a scan on the calling thread:
//!
//! 1. An [`IngestionWalker`] thread streams candidates from the queued roots.
//! 2. The calling thread filters them and hands new files to a
//!    [`Scheduler`] worker pool.
//! 3. Worker results come back to the calling thread, which files them in
//!    the [`MatchIndex`](crate::duplicates::MatchIndex) and emits
//!    [`MatcherEvent`]s.
//!
//! The match index is only ever touched by the thread inside `run`.
//! [`EngineHandle`]s reach it by sending commands that the run loop answers
//! between results, so removals and snapshots are serialized with result
//! processing.
//!
//! `run` returns once every queued root is walked and every admitted file
//! is processed, or once [`EngineHandle::finish`] is called. An engine runs
//! at most once.
//!
//! # Example
//!
//! ```no_run
//! use pixdupe::engine::{Engine, EngineConfig, MatcherEvent};
//!
//! let mut engine = Engine::new(EngineConfig::new(5)).unwrap();
//! let events = engine.events();
//!
//! engine.run(["/home/user/Pictures"]).unwrap();
//!
//! for event in events.try_iter() {
//!     if let MatcherEvent::NewGroup { group } = event {
//!         println!("{} look alike", group.len());
//!     }
//! }
//! println!("{} duplicates", engine.duplicates());
//! ```

pub mod control;
pub mod events;
pub mod scheduler;
mod state;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, select, unbounded, Receiver};
use serde::Serialize;

pub use control::RunPhase;
pub use events::MatcherEvent;
pub use scheduler::{Job, JobResult, Scheduler};

use control::{Command, Control};
use state::ScanState;

use crate::duplicates::{DuplicateGroup, IndexError, MatchIndex};
use crate::scanner::fingerprint::MAX_STRENGTH;
use crate::scanner::walker::{normalize_root, IngestionWalker, WalkEvent};
use crate::scanner::{normalize_extensions, Address, ExtensionFilter, Fingerprinter};

/// Default perceptual strength.
pub const DEFAULT_STRENGTH: u8 = 5;

/// Errors from engine construction and engine operations.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Strength outside `0..=10`.
    #[error("Strength must be between 0 and 10, got {0}")]
    InvalidStrength(u8),

    /// The address is not in the index.
    #[error("Address is not indexed: {0}")]
    NotIndexed(Address),

    /// `run` was called on an engine that already ran.
    #[error("Engine has already finished; create a new engine to scan again")]
    AlreadyFinished,

    /// A handle command was sent while no run was active.
    #[error("No scan is running")]
    NotRunning,

    /// The worker pool could not be built.
    #[error("Failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<IndexError> for EngineError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::NotIndexed(address) => Self::NotIndexed(address),
        }
    }
}

/// Counters plus a copy of every duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Addresses admitted for work
    pub found: usize,
    /// Addresses whose work is done
    pub processed: usize,
    /// Addresses in duplicate groups
    pub duplicates: usize,
    /// Duplicate groups in position order
    pub matches: Vec<DuplicateGroup>,
}

impl Snapshot {
    /// Admitted but not yet processed.
    #[must_use]
    pub fn left_to_process(&self) -> usize {
        self.found.saturating_sub(self.processed)
    }
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Perceptual strength, `0..=10`
    pub strength: u8,
    /// Byte-exact SHA-256 matching instead of perceptual hashing
    pub exact: bool,
    /// Worker threads; `None` uses one per core
    pub max_workers: Option<usize>,
    /// Which files are images and which are archives
    pub filter: ExtensionFilter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STRENGTH)
    }
}

impl EngineConfig {
    /// Perceptual matching at `strength` with default extensions.
    #[must_use]
    pub fn new(strength: u8) -> Self {
        Self {
            strength,
            exact: false,
            max_workers: None,
            filter: ExtensionFilter::default(),
        }
    }

    /// Switch between exact and perceptual matching.
    #[must_use]
    pub fn with_exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    /// Limit the worker pool.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Replace the image extensions.
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filter = ExtensionFilter::new(
            normalize_extensions(extensions),
            self.filter.archives().clone(),
        );
        self
    }

    /// Replace the archive extensions.
    #[must_use]
    pub fn with_archive_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filter = ExtensionFilter::new(
            self.filter.images().clone(),
            normalize_extensions(extensions),
        );
        self
    }
}

/// The duplicate-matching engine.
pub struct Engine {
    config: EngineConfig,
    fingerprinter: Fingerprinter,
    control: Arc<Control>,
    state: ScanState,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("phase", &self.control.phase())
            .field("found", &self.state.found())
            .field("processed", &self.state.processed())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an idle engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidStrength`] if `strength > 10`.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        if config.strength > MAX_STRENGTH {
            return Err(EngineError::InvalidStrength(config.strength));
        }

        Ok(Self {
            fingerprinter: Fingerprinter::new(config.strength, config.exact),
            config,
            control: Arc::new(Control::new()),
            state: ScanState::new(),
        })
    }

    /// Engine with default settings.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            fingerprinter: Fingerprinter::default(),
            config: EngineConfig::default(),
            control: Arc::new(Control::new()),
            state: ScanState::new(),
        }
    }

    /// Settings the engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A cloneable handle for controlling the engine from other threads.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Receiver for discovery events. Every clone sees each event once
    /// between them.
    #[must_use]
    pub fn events(&self) -> Receiver<MatcherEvent> {
        self.control.events()
    }

    // --- lifecycle ---

    /// Stop workers and walking until [`resume`](Self::resume). Takes effect
    /// at `run` if called before it.
    pub fn pause(&self) {
        self.control.pause();
    }

    /// Continue after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Make `run` return as soon as possible. Terminal.
    pub fn finish(&self) {
        self.control.finish();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Whether finish was requested or the run has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.control.is_finished()
    }

    /// Not paused, and either not finished or still holding unprocessed work.
    #[must_use]
    pub fn running(&self) -> bool {
        !self.is_paused() && (!self.is_finished() || self.left_to_process() > 0)
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.control.phase()
    }

    // --- roots ---

    /// Queue a directory for scanning. Undoes an earlier
    /// [`remove_path`](Self::remove_path) of the same directory when the
    /// walker reaches it.
    pub fn add_path(&self, path: impl AsRef<Path>) {
        let root = normalize_root(path.as_ref());
        log::debug!("Queued root {}", root.display());
        self.control.add_root(root);
    }

    /// Retract everything under `path` and skip it on later walks.
    /// Returns how many indexed addresses were removed.
    pub fn remove_path(&mut self, path: impl AsRef<Path>) -> usize {
        let root = normalize_root(path.as_ref());
        self.control.cancel_revival(&root);
        let removed = self.state.remove_root(root);
        self.publish();
        removed
    }

    // --- removal ---

    /// Retract an indexed address.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotIndexed`] if the address is unknown.
    pub fn remove(&mut self, address: &Address) -> Result<(), EngineError> {
        self.state.remove(address)?;
        self.publish();
        Ok(())
    }

    /// Retract an indexed address and keep it out of later walks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotIndexed`] if the address is unknown.
    pub fn ignore(&mut self, address: &Address) -> Result<(), EngineError> {
        self.state.ignore(address)?;
        self.publish();
        Ok(())
    }

    /// Retract every member of a processed archive. The archive stays
    /// recorded, so it is not expanded again.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotIndexed`] if the archive was never expanded.
    pub fn ignore_archive(&mut self, archive: impl AsRef<Path>) -> Result<usize, EngineError> {
        let archive = normalize_root(archive.as_ref());
        let removed = self.state.ignore_archive(&archive)?;
        self.publish();
        Ok(removed)
    }

    // --- queries ---

    #[must_use]
    pub fn found(&self) -> usize {
        self.state.found()
    }

    #[must_use]
    pub fn processed(&self) -> usize {
        self.state.processed()
    }

    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.state.duplicates()
    }

    #[must_use]
    pub fn left_to_process(&self) -> usize {
        self.state.left_to_process()
    }

    /// Copies of the duplicate groups in position order.
    #[must_use]
    pub fn matches(&self) -> Vec<DuplicateGroup> {
        self.state.matches()
    }

    /// Read-only view of the index.
    #[must_use]
    pub fn index(&self) -> &MatchIndex {
        self.state.index()
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    fn publish(&self) {
        self.state.publish(&self.control.counters);
    }

    // --- run ---

    /// Queue `roots` and scan until all work is done or finish is requested.
    ///
    /// Emits [`MatcherEvent::Finished`] on return.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyFinished`] on a second call and
    /// [`EngineError::ThreadPool`] if workers cannot be started.
    pub fn run<I, P>(&mut self, roots: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        if self.control.phase() != RunPhase::Idle {
            return Err(EngineError::AlreadyFinished);
        }
        for root in roots {
            self.add_path(root);
        }

        let (result_tx, result_rx) = unbounded();
        let scheduler = Scheduler::new(
            self.config.max_workers,
            self.fingerprinter,
            self.config.filter.clone(),
            result_tx,
            self.control.cancel_flag(),
        )?;

        let (walk_tx, walk_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(0);

        log::info!(
            "Scanning with {} workers ({} mode, strength {})",
            scheduler.workers(),
            if self.config.exact { "exact" } else { "perceptual" },
            self.config.strength
        );

        // Handles that observe `Running` must find the command slot open.
        self.control.open_commands(command_tx);
        self.control.set_phase(RunPhase::Running);

        let walker = IngestionWalker::new(
            self.control.roots(),
            self.config.filter.clone(),
            Arc::clone(&self.control),
        );

        thread::scope(|scope| {
            let walker_thread = thread::Builder::new()
                .name("pixdupe-walker".to_string())
                .spawn_scoped(scope, move || walker.run(&walk_tx, &stop_rx));
            if let Err(e) = walker_thread {
                log::error!("Failed to start walker thread: {}", e);
                return;
            }

            self.consume(&scheduler, &walk_rx, &result_rx, &command_rx);
            drop(stop_tx);
        });

        // Answer anything sent before the slot closed.
        self.control.close_commands();
        for command in command_rx.try_iter() {
            self.handle_command(command);
        }

        self.control.finish();
        self.publish();
        self.control.set_phase(RunPhase::Finished);
        let _ = self.control.events_tx().send(MatcherEvent::Finished);

        log::info!(
            "Scan finished: {} found, {} processed, {} duplicates in {} groups",
            self.found(),
            self.processed(),
            self.duplicates(),
            self.state.index().group_count()
        );
        Ok(())
    }

    fn consume(
        &mut self,
        scheduler: &Scheduler,
        walk_rx: &Receiver<WalkEvent>,
        result_rx: &Receiver<JobResult>,
        command_rx: &Receiver<Command>,
    ) {
        loop {
            if self.control.is_finished() {
                log::debug!("Finish requested, leaving run loop");
                break;
            }

            if self.control.is_paused() {
                match command_rx.recv() {
                    Ok(command) => self.handle_command(command),
                    Err(_) => break,
                }
                continue;
            }

            if self.control.pending_roots() == 0
                && walk_rx.is_empty()
                && self.state.left_to_process() == 0
            {
                log::debug!("All roots walked and all work processed");
                break;
            }

            select! {
                recv(command_rx) -> command => match command {
                    Ok(command) => self.handle_command(command),
                    Err(_) => break,
                },
                recv(walk_rx) -> event => match event {
                    Ok(event) => self.handle_walk_event(event, scheduler),
                    Err(_) => {
                        log::warn!("Walker stopped before all roots were walked");
                        break;
                    }
                },
                recv(result_rx) -> result => {
                    if let Ok(result) = result {
                        self.state.handle_result(result, self.control.events_tx());
                    }
                },
            }
            self.publish();
        }
    }

    fn handle_walk_event(&mut self, event: WalkEvent, scheduler: &Scheduler) {
        match event {
            WalkEvent::RootStarted(root) => {
                let revived = self.control.take_revival(&root);
                self.state.start_root(root, revived);
            }
            WalkEvent::Candidate(candidate) => {
                if let Some(job) = self.state.admit(candidate) {
                    scheduler.submit(job);
                }
            }
            WalkEvent::RootFinished(root) => {
                log::debug!("Walked {}", root.display());
                self.control.root_done();
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        // A dropped reply receiver only means the caller gave up waiting.
        match command {
            Command::Wake => {}
            Command::Remove(address, reply) => {
                let _ = reply.send(self.remove(&address));
            }
            Command::Ignore(address, reply) => {
                let _ = reply.send(self.ignore(&address));
            }
            Command::IgnoreArchive(archive, reply) => {
                let _ = reply.send(self.ignore_archive(archive));
            }
            Command::RemovePath(root, reply) => {
                let _ = reply.send(self.remove_path(root));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }
}

/// Cloneable, thread-safe control surface for an [`Engine`].
///
/// Lifecycle calls and counters work at any time. Index operations are
/// forwarded to the running scan and fail with
/// [`EngineError::NotRunning`] outside of [`Engine::run`]; use the
/// `Engine` methods directly then.
#[derive(Clone)]
pub struct EngineHandle {
    control: Arc<Control>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("phase", &self.control.phase())
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn finish(&self) {
        self.control.finish();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.control.is_finished()
    }

    #[must_use]
    pub fn running(&self) -> bool {
        !self.is_paused() && (!self.is_finished() || self.left_to_process() > 0)
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.control.phase()
    }

    #[must_use]
    pub fn events(&self) -> Receiver<MatcherEvent> {
        self.control.events()
    }

    /// Queue another root, also while a scan is running.
    pub fn add_path(&self, path: impl AsRef<Path>) {
        self.control.add_root(normalize_root(path.as_ref()));
    }

    // Counters are published after every message the run loop handles.

    #[must_use]
    pub fn found(&self) -> usize {
        self.control.counters.found.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn processed(&self) -> usize {
        self.control.counters.processed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.control.counters.duplicates.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn left_to_process(&self) -> usize {
        self.found().saturating_sub(self.processed())
    }

    /// See [`Engine::remove_path`].
    ///
    /// # Errors
    ///
    /// [`EngineError::NotRunning`] outside of a run.
    pub fn remove_path(&self, path: impl AsRef<Path>) -> Result<usize, EngineError> {
        let root: PathBuf = normalize_root(path.as_ref());
        self.control.request(|reply| Command::RemovePath(root, reply))
    }

    /// See [`Engine::remove`].
    ///
    /// # Errors
    ///
    /// [`EngineError::NotIndexed`], or [`EngineError::NotRunning`] outside
    /// of a run.
    pub fn remove(&self, address: &Address) -> Result<(), EngineError> {
        let address = address.clone();
        self.control
            .request(|reply| Command::Remove(address, reply))?
    }

    /// See [`Engine::ignore`].
    ///
    /// # Errors
    ///
    /// [`EngineError::NotIndexed`], or [`EngineError::NotRunning`] outside
    /// of a run.
    pub fn ignore(&self, address: &Address) -> Result<(), EngineError> {
        let address = address.clone();
        self.control
            .request(|reply| Command::Ignore(address, reply))?
    }

    /// See [`Engine::ignore_archive`].
    ///
    /// # Errors
    ///
    /// [`EngineError::NotIndexed`], or [`EngineError::NotRunning`] outside
    /// of a run.
    pub fn ignore_archive(&self, archive: impl AsRef<Path>) -> Result<usize, EngineError> {
        let archive = archive.as_ref().to_path_buf();
        self.control
            .request(|reply| Command::IgnoreArchive(archive, reply))?
    }

    /// Counters and groups as the run loop sees them right now.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotRunning`] outside of a run.
    pub fn snapshot(&self) -> Result<Snapshot, EngineError> {
        self.control.request(Command::Snapshot)
    }
}
