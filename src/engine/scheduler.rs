//! Worker pool that fingerprints candidates off the consumer thread.
//!
//! Jobs run on a dedicated [`rayon::ThreadPool`]; each finished job sends
//! exactly one [`JobResult`] back over a channel. A job that panics is
//! reported as [`ScanError::Panicked`] instead of taking the pool down, and
//! jobs still queued when the run ends are skipped without a result.

use std::fs::File;
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::scanner::{
    Address, ArchiveReader, ExtensionFilter, FileClass, Fingerprinter, Fingerprints, MediaKind,
    ScanError,
};

/// A file admitted for fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Plain file address (never an archive member)
    pub address: Address,
    /// How to process it
    pub class: FileClass,
}

/// What a worker sends back.
#[derive(Debug)]
pub enum JobResult {
    /// A single image was fingerprinted.
    Leaf(Address, Fingerprints),
    /// An archive was opened and each supported member was fingerprinted.
    ArchiveExpansion(Address, Vec<(String, Result<Fingerprints, ScanError>)>),
    /// The file could not be processed at all.
    Failure(Address, ScanError),
}

impl JobResult {
    /// The plain file address this result belongs to.
    #[must_use]
    pub fn origin(&self) -> &Address {
        match self {
            Self::Leaf(address, _)
            | Self::ArchiveExpansion(address, _)
            | Self::Failure(address, _) => address,
        }
    }
}

impl Job {
    /// Process the job on the current thread.
    #[must_use]
    pub fn execute(&self, fingerprinter: &Fingerprinter, filter: &ExtensionFilter) -> JobResult {
        match self.class {
            FileClass::Image => match self.fingerprint_image(fingerprinter) {
                Ok(fingerprints) => JobResult::Leaf(self.address.clone(), fingerprints),
                Err(e) => JobResult::Failure(self.address.clone(), e),
            },
            FileClass::Archive => self.expand_archive(fingerprinter, filter),
        }
    }

    fn fingerprint_image(&self, fingerprinter: &Fingerprinter) -> Result<Fingerprints, ScanError> {
        let path = self.address.path();
        let io_error = |source| ScanError::Io {
            address: self.address.clone(),
            source,
        };

        if fingerprinter.is_exact() {
            let file = File::open(path).map_err(io_error)?;
            return fingerprinter
                .fingerprint_exact_reader(BufReader::new(file))
                .map_err(io_error);
        }

        let bytes = std::fs::read(path).map_err(io_error)?;
        fingerprint_bytes(&self.address, &bytes, fingerprinter)
    }

    fn expand_archive(&self, fingerprinter: &Fingerprinter, filter: &ExtensionFilter) -> JobResult {
        let path = self.address.path();
        let mut reader = match ArchiveReader::open(path) {
            Ok(reader) => reader,
            Err(e) => return JobResult::Failure(self.address.clone(), e),
        };

        let names = reader.list_supported_entries(filter);
        log::debug!("{} supported entries in {}", names.len(), path.display());

        let entries = names
            .into_iter()
            .map(|name| {
                let address = Address::entry(path, name.clone());
                let outcome = reader
                    .open_entry(&name)
                    .and_then(|bytes| fingerprint_bytes(&address, &bytes, fingerprinter));
                (name, outcome)
            })
            .collect();

        JobResult::ArchiveExpansion(self.address.clone(), entries)
    }
}

fn fingerprint_bytes(
    address: &Address,
    bytes: &[u8],
    fingerprinter: &Fingerprinter,
) -> Result<Fingerprints, ScanError> {
    let kind = MediaKind::detect(address.extension().as_deref(), bytes);
    fingerprinter
        .fingerprint(bytes, kind)
        .map_err(|e| e.at(address.clone()))
}

/// Owns the worker pool for one run.
pub struct Scheduler {
    pool: ThreadPool,
    fingerprinter: Fingerprinter,
    filter: Arc<ExtensionFilter>,
    results: Sender<JobResult>,
    cancelled: Arc<AtomicBool>,
}

impl Scheduler {
    /// Build a pool of `workers` threads (`None` = one per core).
    ///
    /// # Errors
    ///
    /// Returns the rayon error if the threads cannot be spawned.
    pub fn new(
        workers: Option<usize>,
        fingerprinter: Fingerprinter,
        filter: ExtensionFilter,
        results: Sender<JobResult>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.unwrap_or(0))
            .thread_name(|i| format!("pixdupe-worker-{i}"))
            .build()?;

        log::debug!("Worker pool started with {} threads", pool.current_num_threads());

        Ok(Self {
            pool,
            fingerprinter,
            filter: Arc::new(filter),
            results,
            cancelled,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue a job. Its result arrives on the results channel.
    pub fn submit(&self, job: Job) {
        let fingerprinter = self.fingerprinter;
        let filter = Arc::clone(&self.filter);
        let results = self.results.clone();
        let cancelled = Arc::clone(&self.cancelled);

        self.pool.spawn(move || {
            if cancelled.load(Ordering::SeqCst) {
                log::trace!("Skipping {} after finish", job.address);
                return;
            }

            log::trace!("Fingerprinting {}", job.address);
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                job.execute(&fingerprinter, &filter)
            }))
            .unwrap_or_else(|_| {
                JobResult::Failure(job.address.clone(), ScanError::Panicked(job.address.clone()))
            });

            // A closed channel means the run is over.
            let _ = results.send(result);
        });
    }
}
