//! Ctrl+C handling.
//!
//! The first interrupt sets a flag and asks the attached engine to finish,
//! so `Engine::run` returns with whatever it has indexed so far. The CLI
//! then exits with [`EXIT_CODE_INTERRUPTED`].
//!
//! ```rust,no_run
//! use pixdupe::engine::Engine;
//! use pixdupe::signal::install_handler;
//!
//! let mut engine = Engine::with_defaults();
//! let handler = install_handler().expect("signal handler");
//! handler.attach(engine.handle());
//!
//! engine.run(["."]).unwrap();
//! if handler.is_interrupted() {
//!     eprintln!("partial results");
//! }
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::engine::EngineHandle;

/// Exit code after SIGINT (128 + 2).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Interrupt flag plus the engine to stop when it trips.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
    engine: Arc<Mutex<Option<EngineHandle>>>,
}

impl ShutdownHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish `engine` on interrupt. Replaces any earlier engine.
    pub fn attach(&self, engine: EngineHandle) {
        let mut slot = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_interrupted() {
            engine.finish();
        }
        *slot = Some(engine);
    }

    /// Whether an interrupt arrived.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Behave as if Ctrl+C was pressed.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let slot = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = slot.as_ref() {
            engine.finish();
        }
    }

    /// Clear the flag and detach the engine.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Error installing the Ctrl+C hook.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C hook, or reuse (and reset) the one
/// installed earlier.
///
/// # Errors
///
/// Returns [`SignalError::InstallFailed`] if the hook cannot be registered.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let hooked = handler.clone();
    let installed = ctrlc::set_handler(move || {
        if hooked.is_interrupted() {
            return;
        }
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Finishing up...");
        let _ = std::io::stderr().flush();
        log::info!("Interrupt received, finishing scan");
        hooked.interrupt();
    });

    match installed {
        Ok(()) => Ok(GLOBAL_HANDLER.get_or_init(|| handler).clone()),
        // Lost a race with another caller that installed first.
        Err(e) => GLOBAL_HANDLER
            .get()
            .cloned()
            .ok_or(SignalError::InstallFailed(e)),
    }
}
