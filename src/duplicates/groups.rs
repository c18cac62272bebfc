//! Incremental fingerprint → duplicate group index.
//!
//! # Overview
//!
//! [`MatchIndex`] turns a stream of `(address, fingerprints)` results into
//! duplicate groups, and supports retracting addresses again:
//!
//! - **Forward index**: fingerprint → [`DuplicateGroup`]. Groups live here
//!   for their whole life, singletons included.
//! - **Reverse index**: address → the fingerprint it is filed under, which
//!   may be an orientation variant rather than its own primary.
//! - **Match list**: the fingerprints of every group with two or more
//!   members, in the order they became duplicates. Each of those groups
//!   stores its own `position` in this list.
//!
//! Removing a group from the match list shifts the later entries down and
//! rewrites only their `position` fields.
//!
//! # Example
//!
//! ```
//! use pixdupe::duplicates::{Insertion, MatchIndex};
//! use pixdupe::scanner::{Address, Fingerprint, Fingerprints};
//!
//! let mut index = MatchIndex::new();
//! let fp = Fingerprints::single(Fingerprint::Exact("ab".repeat(32)));
//!
//! assert_eq!(index.insert(Address::file("/a.png"), &fp), Insertion::Singleton);
//! assert_eq!(
//!     index.insert(Address::file("/b.png"), &fp),
//!     Insertion::NewGroup { position: 0 }
//! );
//! assert_eq!(index.duplicates(), 2);
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::scanner::{Address, Fingerprint, Fingerprints};

/// Addresses sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Index in the match list, `None` while fewer than two members
    pub position: Option<usize>,
    /// Fingerprint the members are filed under
    pub fingerprint: Fingerprint,
    /// Members in the order they were matched
    pub members: Vec<Address>,
}

impl DuplicateGroup {
    fn singleton(fingerprint: Fingerprint, first: Address) -> Self {
        Self {
            position: None,
            fingerprint,
            members: vec![first],
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the group currently counts as a duplicate group.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.position.is_some()
    }

    /// Whether `address` is a member.
    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }
}

/// Outcome of [`MatchIndex::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The address was already indexed; nothing changed.
    AlreadyIndexed,
    /// Filed under its primary fingerprint with no match.
    Singleton,
    /// A group just reached two members and was appended to the match list.
    NewGroup {
        /// Position of the new group
        position: usize,
    },
    /// Added to a group that was already a duplicate group.
    NewMatch {
        /// Position of the group
        position: usize,
    },
}

/// Outcome of [`MatchIndex::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The last member left; the fingerprint is gone from the index.
    Emptied,
    /// One member is left; the group left the match list.
    Demoted {
        /// Position the group held before demotion
        position: usize,
    },
    /// Two or more members remain.
    Shrunk {
        /// Position of the group, if it is a duplicate group
        position: Option<usize>,
    },
}

/// Errors from index mutation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The address has no entry in the reverse index.
    #[error("Address is not indexed: {0}")]
    NotIndexed(Address),
}

/// The forward/reverse index plus the ordered match list.
#[derive(Debug, Default, Clone)]
pub struct MatchIndex {
    forward: HashMap<Fingerprint, DuplicateGroup>,
    reverse: HashMap<Address, Fingerprint>,
    matches: Vec<Fingerprint>,
    duplicates: usize,
}

impl MatchIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// File `address` under the first of its candidate fingerprints that is
    /// already known, or under its primary if none is.
    ///
    /// Candidates are tried primary first, then variants in generation
    /// order, so the choice is deterministic when several match.
    pub fn insert(&mut self, address: Address, fingerprints: &Fingerprints) -> Insertion {
        if self.reverse.contains_key(&address) {
            return Insertion::AlreadyIndexed;
        }

        let matched = fingerprints
            .candidates()
            .find(|candidate| self.forward.contains_key(*candidate))
            .cloned();

        let Some(key) = matched else {
            let primary = fingerprints.primary.clone();
            self.reverse.insert(address.clone(), primary.clone());
            self.forward
                .insert(primary.clone(), DuplicateGroup::singleton(primary, address));
            return Insertion::Singleton;
        };

        self.reverse.insert(address.clone(), key.clone());
        let next_position = self.matches.len();
        let Some(group) = self.forward.get_mut(&key) else {
            unreachable!("matched fingerprint vanished from the forward index");
        };
        group.members.push(address);

        match group.position {
            Some(position) => {
                self.duplicates += 1;
                Insertion::NewMatch { position }
            }
            None => {
                group.position = Some(next_position);
                self.matches.push(key);
                self.duplicates += 2;
                Insertion::NewGroup {
                    position: next_position,
                }
            }
        }
    }

    /// Retract an address.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] if the address is unknown.
    pub fn remove(&mut self, address: &Address) -> Result<Removal, IndexError> {
        let key = self
            .reverse
            .remove(address)
            .ok_or_else(|| IndexError::NotIndexed(address.clone()))?;

        let Some(group) = self.forward.get_mut(&key) else {
            unreachable!("reverse entry points at a missing group");
        };
        group.members.retain(|member| member != address);

        match group.members.len() {
            0 => {
                self.forward.remove(&key);
                Ok(Removal::Emptied)
            }
            1 => match group.position.take() {
                Some(position) => {
                    log::debug!("Demoting match group {}", position);
                    self.matches.remove(position);
                    self.duplicates -= 2;
                    self.reindex_from(position);
                    Ok(Removal::Demoted { position })
                }
                None => Ok(Removal::Shrunk { position: None }),
            },
            _ => {
                if group.position.is_some() {
                    self.duplicates -= 1;
                }
                Ok(Removal::Shrunk {
                    position: group.position,
                })
            }
        }
    }

    fn reindex_from(&mut self, start: usize) {
        for (offset, key) in self.matches[start..].iter().enumerate() {
            if let Some(group) = self.forward.get_mut(key) {
                group.position = Some(start + offset);
            }
        }
    }

    /// Whether `address` is indexed.
    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.reverse.contains_key(address)
    }

    /// Fingerprint an address is filed under.
    #[must_use]
    pub fn fingerprint_of(&self, address: &Address) -> Option<&Fingerprint> {
        self.reverse.get(address)
    }

    /// Group filed under `fingerprint`, singleton or not.
    #[must_use]
    pub fn group(&self, fingerprint: &Fingerprint) -> Option<&DuplicateGroup> {
        self.forward.get(fingerprint)
    }

    /// Duplicate group at `position` in the match list.
    #[must_use]
    pub fn group_at(&self, position: usize) -> Option<&DuplicateGroup> {
        self.matches
            .get(position)
            .and_then(|key| self.forward.get(key))
    }

    /// Duplicate groups in match-list order.
    pub fn matches(&self) -> impl Iterator<Item = &DuplicateGroup> + '_ {
        self.matches.iter().filter_map(|key| self.forward.get(key))
    }

    /// Number of duplicate groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.matches.len()
    }

    /// Sum of member counts over all duplicate groups.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Number of indexed addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Indexed addresses whose primary path lies under `root`, sorted.
    #[must_use]
    pub fn addresses_under(&self, root: &Path) -> Vec<Address> {
        let mut found: Vec<Address> = self
            .reverse
            .keys()
            .filter(|address| address.is_under(root))
            .cloned()
            .collect();
        found.sort();
        found
    }

    /// Check the structural invariants, describing the first violation.
    ///
    /// - `duplicates` equals the member total over the match list
    /// - the group at match-list index `i` has `position == Some(i)`
    /// - groups outside the match list have fewer than two members
    /// - every reverse entry names a group containing it exactly once
    ///
    /// # Errors
    ///
    /// Returns a description of the violated invariant.
    pub fn verify(&self) -> Result<(), String> {
        let total: usize = self.matches().map(DuplicateGroup::len).sum();
        if total != self.duplicates {
            return Err(format!(
                "duplicates is {} but groups hold {}",
                self.duplicates, total
            ));
        }

        for (i, key) in self.matches.iter().enumerate() {
            match self.forward.get(key) {
                Some(group) if group.position == Some(i) && group.len() >= 2 => {}
                Some(group) => {
                    return Err(format!(
                        "match {} has position {:?} and {} members",
                        i,
                        group.position,
                        group.len()
                    ))
                }
                None => return Err(format!("match {} has no forward entry", i)),
            }
        }

        for group in self.forward.values() {
            if group.position.is_none() && group.len() >= 2 {
                return Err(format!("{} members but no position", group.len()));
            }
            if group.is_empty() {
                return Err("empty group left in the forward index".to_string());
            }
        }

        for (address, key) in &self.reverse {
            let Some(group) = self.forward.get(key) else {
                return Err(format!("{} points at a missing group", address));
            };
            let count = group.members.iter().filter(|m| *m == address).count();
            if count != 1 {
                return Err(format!("{} appears {} times in its group", address, count));
            }
        }

        let members: usize = self.forward.values().map(DuplicateGroup::len).sum();
        if members != self.reverse.len() {
            return Err(format!(
                "{} group members but {} reverse entries",
                members,
                self.reverse.len()
            ));
        }

        Ok(())
    }
}
