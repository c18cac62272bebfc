//! State shared between the engine, its handles, the walker and the workers.
//!
//! Everything here is either atomic or behind a short-lived lock. The
//! match index itself is not shared: it stays with the consumer loop, and
//! handles reach it by sending [`Command`]s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::events::MatcherEvent;
use super::{EngineError, Snapshot};
use crate::scanner::walker::PauseGate;
use crate::scanner::Address;

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Created, `run` not yet called
    Idle,
    /// Inside `run`
    Running,
    /// `run` returned; terminal
    Finished,
}

impl RunPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Finished,
        }
    }
}

/// Requests answered by the consumer loop.
pub(crate) enum Command {
    /// Re-check flags (pause/resume/finish changed).
    Wake,
    Remove(Address, Sender<Result<(), EngineError>>),
    Ignore(Address, Sender<Result<(), EngineError>>),
    IgnoreArchive(PathBuf, Sender<Result<usize, EngineError>>),
    RemovePath(PathBuf, Sender<usize>),
    Snapshot(Sender<Snapshot>),
}

/// Published copies of the consumer's counters.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub found: AtomicUsize,
    pub processed: AtomicUsize,
    pub duplicates: AtomicUsize,
}

pub(crate) struct Control {
    paused: Mutex<bool>,
    gate: Condvar,
    finished: Arc<AtomicBool>,
    phase: AtomicU8,
    roots_tx: Sender<PathBuf>,
    roots_rx: Receiver<PathBuf>,
    pending_roots: AtomicUsize,
    revived: Mutex<HashSet<PathBuf>>,
    commands: Mutex<Option<Sender<Command>>>,
    events_tx: Sender<MatcherEvent>,
    events_rx: Receiver<MatcherEvent>,
    pub counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Control {
    pub fn new() -> Self {
        let (roots_tx, roots_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        Self {
            paused: Mutex::new(false),
            gate: Condvar::new(),
            finished: Arc::new(AtomicBool::new(false)),
            phase: AtomicU8::new(RunPhase::Idle as u8),
            roots_tx,
            roots_rx,
            pending_roots: AtomicUsize::new(0),
            revived: Mutex::new(HashSet::new()),
            commands: Mutex::new(None),
            events_tx,
            events_rx,
            counters: Counters::default(),
        }
    }

    // --- pause gate and terminal flag ---

    pub fn pause(&self) {
        log::debug!("Performing pause");
        *lock(&self.paused) = true;
        self.wake();
    }

    pub fn resume(&self) {
        log::debug!("Performing resume");
        *lock(&self.paused) = false;
        self.gate.notify_all();
        self.wake();
    }

    pub fn finish(&self) {
        log::debug!("Performing finish");
        self.finished.store(true, Ordering::SeqCst);
        // Take the lock so a waiter cannot miss the notification.
        drop(lock(&self.paused));
        self.gate.notify_all();
        self.wake();
    }

    pub fn is_paused(&self) -> bool {
        *lock(&self.paused)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Flag workers poll to skip jobs once the run is over.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: RunPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    // --- root queue ---

    /// Queue a root for the walker. It is revived (un-removed) when the
    /// walker reaches it, unless removed again before then.
    pub fn add_root(&self, root: PathBuf) {
        lock(&self.revived).insert(root.clone());
        self.pending_roots.fetch_add(1, Ordering::SeqCst);
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.roots_tx.send(root);
    }

    pub fn roots(&self) -> Receiver<PathBuf> {
        self.roots_rx.clone()
    }

    pub fn pending_roots(&self) -> usize {
        self.pending_roots.load(Ordering::SeqCst)
    }

    pub fn root_done(&self) {
        let _ = self
            .pending_roots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Whether `root` was added since it was last removed.
    pub fn take_revival(&self, root: &Path) -> bool {
        lock(&self.revived).remove(root)
    }

    pub fn cancel_revival(&self, root: &Path) {
        lock(&self.revived).remove(root);
    }

    // --- command slot ---

    /// Open the command slot for a run.
    pub fn open_commands(&self, sender: Sender<Command>) {
        *lock(&self.commands) = Some(sender);
    }

    /// Close the command slot. Commands already sent stay in the channel.
    pub fn close_commands(&self) {
        lock(&self.commands).take();
    }

    fn wake(&self) {
        if let Some(sender) = lock(&self.commands).as_ref() {
            let _ = sender.send(Command::Wake);
        }
    }

    /// Send a command and wait for the consumer's answer.
    pub fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        {
            let slot = lock(&self.commands);
            let sender = slot.as_ref().ok_or(EngineError::NotRunning)?;
            sender
                .send(make(reply_tx))
                .map_err(|_| EngineError::NotRunning)?;
        }
        reply_rx.recv().map_err(|_| EngineError::NotRunning)
    }

    // --- events ---

    pub fn events_tx(&self) -> &Sender<MatcherEvent> {
        &self.events_tx
    }

    pub fn events(&self) -> Receiver<MatcherEvent> {
        self.events_rx.clone()
    }
}

impl PauseGate for Arc<Control> {
    fn wait_until_resumed(&self) -> bool {
        let paused = lock(&self.paused);
        let _resumed = self
            .gate
            .wait_while(paused, |paused| *paused && !self.is_finished())
            .unwrap_or_else(PoisonError::into_inner);
        !self.is_finished()
    }
}
