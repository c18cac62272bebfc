//! Consumer-side scan state: the match index plus everything that decides
//! whether a candidate or a result still counts.
//!
//! Only the consumer loop touches this, so nothing here is synchronized.
//! The counters follow two rules:
//!
//! - `found` counts every address admitted for work. An archive counts
//!   once until it is expanded, after which each of its members counts.
//! - `processed` counts every address whose work is done, including
//!   failures. Removing or ignoring an indexed address takes one off both.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;

use super::control::Counters;
use super::events::MatcherEvent;
use super::scheduler::{Job, JobResult};
use super::Snapshot;
use crate::duplicates::{DuplicateGroup, IndexError, Insertion, MatchIndex};
use crate::scanner::walker::Candidate;
use crate::scanner::{Address, Fingerprints, ScanError};
use std::sync::atomic::Ordering;

#[derive(Debug, Default)]
pub(crate) struct ScanState {
    index: MatchIndex,
    found: usize,
    processed: usize,
    removed_roots: BTreeSet<PathBuf>,
    active_roots: BTreeSet<PathBuf>,
    ignored: HashSet<Address>,
    archives: BTreeMap<PathBuf, Vec<Address>>,
    in_flight: HashSet<PathBuf>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- roots ---

    /// The walker reached `root`. A revived root is taken off the removed
    /// set first.
    pub fn start_root(&mut self, root: PathBuf, revived: bool) {
        if revived {
            self.removed_roots.remove(&root);
            self.active_roots.insert(root);
        }
    }

    /// Whether `path` falls under a removed root that no more specific
    /// active root overrides.
    pub fn is_removed(&self, path: &Path) -> bool {
        fn deepest<'a>(roots: &'a BTreeSet<PathBuf>, path: &Path) -> Option<usize> {
            roots
                .iter()
                .filter(|root| path.starts_with(root))
                .map(|root| root.components().count())
                .max()
        }

        match (
            deepest(&self.removed_roots, path),
            deepest(&self.active_roots, path),
        ) {
            (Some(removed), Some(active)) => removed > active,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    // --- admission ---

    /// Decide whether a walked candidate becomes a job.
    pub fn admit(&mut self, candidate: Candidate) -> Option<Job> {
        let address = Address::file(candidate.path);
        let path = address.path();

        if self.is_removed(path) {
            log::trace!("Skipping {} under removed root", address);
            return None;
        }
        if self.index.contains(&address) || self.ignored.contains(&address) {
            return None;
        }
        if self.archives.contains_key(path) || self.in_flight.contains(path) {
            return None;
        }

        self.in_flight.insert(path.to_path_buf());
        self.found += 1;
        Some(Job {
            address,
            class: candidate.class,
        })
    }

    // --- results ---

    /// Fold a worker result into the index, emitting events for new groups
    /// and new matches.
    pub fn handle_result(&mut self, result: JobResult, events: &Sender<MatcherEvent>) {
        self.in_flight.remove(result.origin().path());

        let origin = result.origin();
        if self.is_removed(origin.path()) || self.ignored.contains(origin) {
            log::debug!("Discarding stale result for {}", origin);
            self.found = self.found.saturating_sub(1);
            return;
        }

        match result {
            JobResult::Leaf(address, fingerprints) => self.file(address, &fingerprints, events),
            JobResult::Failure(address, error) => self.fail(&address, &error),
            JobResult::ArchiveExpansion(archive, entries) => {
                self.found = self.found.saturating_sub(1);
                let path = archive.path().to_path_buf();
                let mut members = Vec::with_capacity(entries.len());

                for (name, outcome) in entries {
                    let address = Address::entry(path.clone(), name);
                    self.found += 1;
                    members.push(address.clone());
                    match outcome {
                        Ok(fingerprints) => self.file(address, &fingerprints, events),
                        Err(error) => self.fail(&address, &error),
                    }
                }

                log::debug!("Expanded {} into {} entries", archive, members.len());
                self.archives.insert(path, members);
            }
        }
    }

    fn file(&mut self, address: Address, fingerprints: &Fingerprints, events: &Sender<MatcherEvent>) {
        let outcome = self.index.insert(address.clone(), fingerprints);
        if outcome == Insertion::AlreadyIndexed {
            log::warn!("Duplicate submission ignored: {}", address);
            self.found = self.found.saturating_sub(1);
            return;
        }

        self.processed += 1;
        let event = match outcome {
            Insertion::NewGroup { position } => self
                .index
                .group_at(position)
                .map(|group| MatcherEvent::NewGroup {
                    group: group.clone(),
                }),
            Insertion::NewMatch { position } => {
                self.index
                    .group_at(position)
                    .map(|group| MatcherEvent::NewMatch {
                        group: group.clone(),
                        address,
                    })
            }
            Insertion::Singleton | Insertion::AlreadyIndexed => None,
        };

        if let Some(event) = event {
            // Nobody listening is fine; the index is the source of truth.
            let _ = events.send(event);
        }
    }

    fn fail(&mut self, address: &Address, error: &ScanError) {
        log::warn!("Skipping {}: {}", address, error);
        self.processed += 1;
    }

    // --- removal ---

    /// Retract an indexed address.
    pub fn remove(&mut self, address: &Address) -> Result<(), IndexError> {
        self.index.remove(address)?;
        self.processed = self.processed.saturating_sub(1);
        self.found = self.found.saturating_sub(1);
        Ok(())
    }

    /// Retract an indexed address and keep it out of future walks.
    /// Archive members are only retracted; their archive is already
    /// recorded as processed.
    pub fn ignore(&mut self, address: &Address) -> Result<(), IndexError> {
        self.remove(address)?;
        if !address.is_archive_member() {
            self.ignored.insert(address.clone());
        }
        Ok(())
    }

    /// Retract every member of a processed archive. Returns how many
    /// members were still indexed.
    pub fn ignore_archive(&mut self, archive: &Path) -> Result<usize, IndexError> {
        let members = self
            .archives
            .get(archive)
            .ok_or_else(|| IndexError::NotIndexed(Address::file(archive)))?
            .clone();

        Ok(members
            .iter()
            .filter(|member| self.remove(member).is_ok())
            .count())
    }

    /// Retract everything under `root` and skip it on later walks.
    /// Returns how many indexed addresses were removed.
    pub fn remove_root(&mut self, root: PathBuf) -> usize {
        let doomed = self.index.addresses_under(&root);
        let removed = doomed
            .iter()
            .filter(|address| self.remove(address).is_ok())
            .count();

        self.archives.retain(|archive, _| !archive.starts_with(&root));
        self.active_roots.retain(|active| !active.starts_with(&root));
        log::info!("Removed {} ({} indexed addresses)", root.display(), removed);
        self.removed_roots.insert(root);
        removed
    }

    // --- queries ---

    pub fn found(&self) -> usize {
        self.found
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn duplicates(&self) -> usize {
        self.index.duplicates()
    }

    pub fn left_to_process(&self) -> usize {
        self.found.saturating_sub(self.processed)
    }

    pub fn index(&self) -> &MatchIndex {
        &self.index
    }

    pub fn matches(&self) -> Vec<DuplicateGroup> {
        self.index.matches().cloned().collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            found: self.found,
            processed: self.processed,
            duplicates: self.duplicates(),
            matches: self.matches(),
        }
    }

    /// Copy the counters where handles can read them.
    pub fn publish(&self, counters: &Counters) {
        counters.found.store(self.found, Ordering::SeqCst);
        counters.processed.store(self.processed, Ordering::SeqCst);
        counters.duplicates.store(self.duplicates(), Ordering::SeqCst);
    }
}
